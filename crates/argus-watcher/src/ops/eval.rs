//! `POST /eval`: run a JS expression in the page.

use std::time::Duration;

use argus_cdp::{CdpSession, DEFAULT_COMMAND_TIMEOUT};
use argus_core::preview::{preview_remote, Preview};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WatcherError;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EvalRequest {
    pub expression: String,
    #[serde(default = "default_true")]
    pub await_promise: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub return_by_value: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResponse {
    pub result: Value,
    #[serde(rename = "type")]
    pub kind: String,
    pub exception: Option<Value>,
}

pub async fn eval(session: &CdpSession, req: EvalRequest) -> Result<EvalResponse, WatcherError> {
    if req.expression.trim().is_empty() {
        return Err(WatcherError::validation("expression is required"));
    }
    let timeout = req
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_COMMAND_TIMEOUT);

    let reply = session
        .send_and_wait(
            "Runtime.evaluate",
            Some(serde_json::json!({
                "expression": req.expression,
                "awaitPromise": req.await_promise,
                "returnByValue": req.return_by_value,
                "generatePreview": !req.return_by_value,
            })),
            timeout,
        )
        .await?;

    let remote = reply.get("result").cloned().unwrap_or(Value::Null);
    let kind = remote
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("undefined")
        .to_owned();
    let result = match preview_remote(&remote) {
        Preview::Value(value) => value,
        // Without return-by-value a bare handle is all we have; render
        // its description rather than chase properties here.
        Preview::Fetch(_) => Value::String(
            remote
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("Object")
                .to_owned(),
        ),
    };

    // A thrown page exception is a validated soft failure, not an HTTP
    // error: the caller gets the details alongside `ok: true`.
    let exception = reply.get("exceptionDetails").cloned();

    Ok(EvalResponse {
        result,
        kind,
        exception,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_expression_is_validation() {
        let session = CdpSession::new();
        let err = eval(
            &session,
            EvalRequest {
                expression: "  ".into(),
                await_promise: true,
                timeout_ms: None,
                return_by_value: true,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn detached_session_maps_to_not_attached() {
        let session = CdpSession::new();
        let err = eval(
            &session,
            EvalRequest {
                expression: "1 + 1".into(),
                await_promise: true,
                timeout_ms: None,
                return_by_value: true,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "cdp_not_attached");
    }

    #[test]
    fn request_defaults() {
        let req: EvalRequest = serde_json::from_str(r#"{"expression": "1"}"#).unwrap();
        assert!(req.await_promise);
        assert!(req.return_by_value);
        assert!(req.timeout_ms.is_none());
    }
}
