//! `POST /reload`: reload the target, optionally appending query params.
//!
//! Param substitution only applies to http/https URLs; `about:blank` and
//! friends reload plainly or reject the request when params were given.

use argus_cdp::CdpSession;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::error::WatcherError;
use crate::ops::OP_TIMEOUT;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReloadRequest {
    /// Bulk form: `k1=v1&k2=v2`.
    #[serde(default)]
    pub params: Option<String>,
    /// Repeated form: one `key=value` per entry.
    #[serde(default)]
    pub param: Option<Vec<String>>,
}

pub async fn reload(
    session: &CdpSession,
    target_id: &str,
    current_url: &str,
    req: ReloadRequest,
) -> Result<Value, WatcherError> {
    let pairs = collect_pairs(&req)?;

    if pairs.is_empty() {
        session
            .send_and_wait("Page.reload", Some(json!({})), OP_TIMEOUT)
            .await?;
        return Ok(json!({
            "reloaded": target_id,
            "url": current_url,
            "previousUrl": current_url,
        }));
    }

    let new_url = substitute_params(current_url, &pairs)?;
    session
        .send_and_wait("Page.navigate", Some(json!({"url": new_url})), OP_TIMEOUT)
        .await?;
    Ok(json!({
        "reloaded": target_id,
        "url": new_url,
        "previousUrl": current_url,
    }))
}

/// Parse `param` entries and the bulk `params` string into pairs.
/// A missing `=` or an empty key is a validation error.
fn collect_pairs(req: &ReloadRequest) -> Result<Vec<(String, String)>, WatcherError> {
    let mut pairs = Vec::new();
    if let Some(bulk) = req.params.as_deref() {
        for piece in bulk.split('&').filter(|p| !p.is_empty()) {
            pairs.push(parse_pair(piece)?);
        }
    }
    if let Some(singles) = &req.param {
        for piece in singles {
            pairs.push(parse_pair(piece)?);
        }
    }
    Ok(pairs)
}

fn parse_pair(piece: &str) -> Result<(String, String), WatcherError> {
    let Some((key, value)) = piece.split_once('=') else {
        return Err(WatcherError::validation(format!(
            "param {piece:?} is missing '='"
        )));
    };
    if key.is_empty() {
        return Err(WatcherError::validation(format!(
            "param {piece:?} has an empty key"
        )));
    }
    Ok((key.to_owned(), value.to_owned()))
}

fn substitute_params(current_url: &str, pairs: &[(String, String)]) -> Result<String, WatcherError> {
    let mut url = Url::parse(current_url)
        .map_err(|_| WatcherError::validation(format!("target URL {current_url:?} is not parseable")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(WatcherError::validation(format!(
            "target URL {current_url:?} is not http/https"
        )));
    }
    {
        let mut editor = url.query_pairs_mut();
        for (key, value) in pairs {
            editor.append_pair(key, value);
        }
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_append_to_existing_query() {
        let req = ReloadRequest {
            params: Some("foo=bar".into()),
            param: Some(vec!["baz=qux".into()]),
        };
        let pairs = collect_pairs(&req).unwrap();
        let url = substitute_params("http://127.0.0.1:4000/test?initial=1", &pairs).unwrap();
        assert_eq!(url, "http://127.0.0.1:4000/test?initial=1&foo=bar&baz=qux");
    }

    #[test]
    fn missing_equals_is_validation() {
        let req = ReloadRequest {
            params: None,
            param: Some(vec!["foobar".into()]),
        };
        let err = collect_pairs(&req).unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn empty_key_is_validation() {
        let req = ReloadRequest {
            params: Some("=value".into()),
            param: None,
        };
        let err = collect_pairs(&req).unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn non_http_url_rejects_substitution() {
        let err = substitute_params("about:blank", &[("foo".into(), "bar".into())]).unwrap_err();
        assert_eq!(err.code(), "validation");
        assert!(err.to_string().contains("not http/https"));
    }

    #[test]
    fn empty_value_is_allowed() {
        let pairs = collect_pairs(&ReloadRequest {
            params: Some("flag=".into()),
            param: None,
        })
        .unwrap();
        assert_eq!(pairs, vec![("flag".to_owned(), String::new())]);
    }

    #[tokio::test]
    async fn plain_reload_without_params_needs_session() {
        let session = CdpSession::new();
        let err = reload(&session, "T1", "about:blank", ReloadRequest::default())
            .await
            .unwrap_err();
        // No params: about:blank is fine, and we proceed to the CDP call.
        assert_eq!(err.code(), "cdp_not_attached");
    }

    #[tokio::test]
    async fn params_against_about_blank_reject_before_cdp() {
        let session = CdpSession::new();
        let err = reload(
            &session,
            "T1",
            "about:blank",
            ReloadRequest {
                params: None,
                param: Some(vec!["foo=bar".into()]),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "validation");
    }
}
