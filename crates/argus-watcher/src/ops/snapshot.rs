//! `POST /snapshot`: accessibility tree dump.

use argus_cdp::CdpSession;
use serde_json::{json, Value};

use crate::error::WatcherError;
use crate::ops::OP_TIMEOUT;

pub async fn snapshot(session: &CdpSession) -> Result<Value, WatcherError> {
    session
        .send_and_wait("Accessibility.enable", None, OP_TIMEOUT)
        .await?;
    let reply = session
        .send_and_wait("Accessibility.getFullAXTree", None, OP_TIMEOUT)
        .await?;
    Ok(json!({
        "nodes": reply.get("nodes").cloned().unwrap_or_else(|| json!([])),
    }))
}
