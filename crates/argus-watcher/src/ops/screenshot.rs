//! `POST /screenshot`: capture PNG to an artifact file.

use std::path::Path;

use argus_cdp::CdpSession;
use argus_core::util::now_ms;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::WatcherError;
use crate::ops::{eval_json, OP_TIMEOUT};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScreenshotRequest {
    /// Clip the capture to the first element matching this selector.
    #[serde(default)]
    pub selector: Option<String>,
}

pub async fn screenshot(
    session: &CdpSession,
    artifact_dir: &Path,
    req: ScreenshotRequest,
) -> Result<Value, WatcherError> {
    let mut params = json!({"format": "png"});

    if let Some(selector) = req.selector.as_deref() {
        let selector_js = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_owned());
        let script = format!(
            r#"(() => {{
  let el;
  try {{ el = document.querySelector({selector_js}); }}
  catch (e) {{ return {{ error: "bad_selector", message: String(e) }}; }}
  if (!el) return {{ matches: 0 }};
  const r = el.getBoundingClientRect();
  return {{ matches: 1, rect: {{ x: r.x, y: r.y, width: r.width, height: r.height }} }};
}})()"#
        );
        let probe = eval_json(session, &script).await?;
        if probe.get("error").is_some() {
            return Err(WatcherError::validation(
                probe
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("invalid selector"),
            ));
        }
        if probe.get("matches").and_then(Value::as_u64) == Some(0) {
            // Soft failure: nothing matched, nothing captured.
            return Ok(json!({"matches": 0, "path": Value::Null}));
        }
        let rect = &probe["rect"];
        params["clip"] = json!({
            "x": rect["x"],
            "y": rect["y"],
            "width": rect["width"],
            "height": rect["height"],
            "scale": 1,
        });
    }

    let reply = session
        .send_and_wait("Page.captureScreenshot", Some(params), OP_TIMEOUT)
        .await?;
    let data = reply
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| WatcherError::Internal("screenshot reply carried no data".into()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|err| WatcherError::Internal(format!("invalid screenshot payload: {err}")))?;

    tokio::fs::create_dir_all(artifact_dir)
        .await
        .map_err(|err| WatcherError::Internal(format!("artifact dir: {err}")))?;
    let path = artifact_dir.join(format!("screenshot-{}.png", now_ms()));
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|err| WatcherError::Internal(format!("write artifact: {err}")))?;

    Ok(json!({
        "matches": 1,
        "path": path.to_string_lossy(),
        "bytes": bytes.len(),
    }))
}
