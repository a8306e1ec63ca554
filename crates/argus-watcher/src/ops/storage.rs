//! `POST /storage/local`: localStorage operations on the page origin.

use argus_cdp::CdpSession;
use serde::Deserialize;
use serde_json::Value;

use crate::error::WatcherError;
use crate::ops::eval_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageAction {
    Get,
    Set,
    Remove,
    List,
    Clear,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StorageRequest {
    pub action: StorageAction,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    /// When present, the page's `location.origin` must match exactly.
    #[serde(default)]
    pub origin: Option<String>,
}

pub async fn local_storage(
    session: &CdpSession,
    req: StorageRequest,
) -> Result<Value, WatcherError> {
    let key = match req.action {
        StorageAction::Get | StorageAction::Remove | StorageAction::Set => Some(
            req.key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| WatcherError::validation("key is required for this action"))?,
        ),
        _ => req.key.as_deref(),
    };
    let value = match req.action {
        StorageAction::Set => Some(
            req.value
                .as_deref()
                .ok_or_else(|| WatcherError::validation("value is required for set"))?,
        ),
        _ => req.value.as_deref(),
    };

    let origin = req
        .origin
        .as_deref()
        .map(json_str)
        .unwrap_or_else(|| "null".to_owned());
    let key_js = key.map(json_str).unwrap_or_else(|| "null".to_owned());
    let value_js = value.map(json_str).unwrap_or_else(|| "null".to_owned());
    let body = match req.action {
        StorageAction::Get => "return { key, value: localStorage.getItem(key) };",
        StorageAction::Set => "localStorage.setItem(key, value); return { key };",
        StorageAction::Remove => {
            "const had = localStorage.getItem(key) !== null; localStorage.removeItem(key); return { removed: had };"
        }
        StorageAction::List => "return { keys: Object.keys(localStorage).sort() };",
        StorageAction::Clear => {
            "const count = localStorage.length; localStorage.clear(); return { cleared: count };"
        }
    };

    let script = format!(
        r#"(() => {{
  const expected = {origin};
  if (expected !== null && location.origin !== expected) {{
    return {{ error: "origin_mismatch", origin: location.origin }};
  }}
  const key = {key_js};
  const value = {value_js};
  {body}
}})()"#
    );

    let result = eval_json(session, &script).await?;
    if result.get("error").and_then(Value::as_str) == Some("origin_mismatch") {
        return Err(WatcherError::OriginMismatch {
            page_origin: result
                .get("origin")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        });
    }
    Ok(result)
}

fn json_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(action: StorageAction) -> StorageRequest {
        StorageRequest {
            action,
            key: None,
            value: None,
            origin: None,
        }
    }

    #[tokio::test]
    async fn get_without_key_is_validation() {
        let session = CdpSession::new();
        let err = local_storage(&session, req(StorageAction::Get))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn set_without_value_is_validation() {
        let session = CdpSession::new();
        let mut request = req(StorageAction::Set);
        request.key = Some("k".into());
        let err = local_storage(&session, request).await.unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn list_needs_no_key() {
        // Unattached session: validation passes, the CDP call then fails
        // with cdp_not_attached, proving we got past input checks.
        let session = CdpSession::new();
        let err = local_storage(&session, req(StorageAction::List))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "cdp_not_attached");
    }

    #[test]
    fn action_parses_lowercase() {
        let request: StorageRequest =
            serde_json::from_str(r#"{"action": "list"}"#).unwrap();
        assert_eq!(request.action, StorageAction::List);
    }
}
