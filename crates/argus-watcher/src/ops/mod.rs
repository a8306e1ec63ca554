//! One-shot CDP-driven routines backing the HTTP routes.

pub mod dom;
pub mod emulation;
pub mod eval;
pub mod reload;
pub mod screenshot;
pub mod snapshot;
pub mod storage;
pub mod trace;

use std::time::Duration;

use argus_cdp::{CdpError, CdpSession};
use serde_json::Value;

use crate::error::WatcherError;

/// Deadline for the short page-side scripts these ops inject.
pub(crate) const OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Evaluate an injected script with `returnByValue` and unwrap the JSON
/// result. A page-side exception from our own script is an internal
/// error, not user input.
pub(crate) async fn eval_json(session: &CdpSession, script: &str) -> Result<Value, WatcherError> {
    let reply = session
        .send_and_wait(
            "Runtime.evaluate",
            Some(serde_json::json!({
                "expression": script,
                "returnByValue": true,
                "awaitPromise": false,
            })),
            OP_TIMEOUT,
        )
        .await?;
    if let Some(details) = reply.get("exceptionDetails") {
        let description = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("script failed");
        return Err(WatcherError::Cdp(CdpError::RequestFailed {
            method: "Runtime.evaluate".to_owned(),
            message: description.to_owned(),
        }));
    }
    Ok(reply
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}
