//! `POST /trace/start` and `POST /trace/stop`: Chrome tracing to an
//! artifact file.
//!
//! Trace chunks stream in as `Tracing.dataCollected` events between
//! `start` and the `Tracing.tracingComplete` that follows `Tracing.end`.

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use argus_cdp::{CdpSession, Subscription};
use argus_core::util::now_ms;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};

use crate::error::WatcherError;
use crate::ops::OP_TIMEOUT;

const COMPLETE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Default)]
struct TraceInner {
    active: bool,
    chunks: Arc<StdMutex<Vec<Value>>>,
    complete_rx: Option<oneshot::Receiver<()>>,
    subs: Vec<Subscription>,
}

#[derive(Default)]
pub struct TraceRecorder {
    inner: Mutex<TraceInner>,
}

impl TraceRecorder {
    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.active
    }

    pub async fn start(&self, session: &CdpSession) -> Result<Value, WatcherError> {
        let mut inner = self.inner.lock().await;
        if inner.active {
            return Err(WatcherError::validation("trace already active"));
        }

        let chunks: Arc<StdMutex<Vec<Value>>> = Arc::new(StdMutex::new(Vec::new()));
        let data_sub = {
            let chunks = Arc::clone(&chunks);
            session.on_event("Tracing.dataCollected", move |params: &Value| {
                if let Some(values) = params.get("value").and_then(Value::as_array) {
                    chunks
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .extend(values.iter().cloned());
                }
            })
        };
        let (complete_tx, complete_rx) = oneshot::channel();
        let complete_slot = Arc::new(StdMutex::new(Some(complete_tx)));
        let complete_sub = {
            let slot = Arc::clone(&complete_slot);
            session.on_event("Tracing.tracingComplete", move |_params: &Value| {
                if let Some(tx) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
                    let _ = tx.send(());
                }
            })
        };

        session
            .send_and_wait(
                "Tracing.start",
                Some(json!({"transferMode": "ReportEvents"})),
                OP_TIMEOUT,
            )
            .await?;

        inner.active = true;
        inner.chunks = chunks;
        inner.complete_rx = Some(complete_rx);
        inner.subs = vec![data_sub, complete_sub];
        Ok(json!({"tracing": true}))
    }

    pub async fn stop(
        &self,
        session: &CdpSession,
        artifact_dir: &Path,
    ) -> Result<Value, WatcherError> {
        let (chunks, complete_rx) = {
            let mut inner = self.inner.lock().await;
            if !inner.active {
                return Err(WatcherError::validation("no trace active"));
            }
            inner.active = false;
            (
                std::mem::take(&mut inner.chunks),
                inner.complete_rx.take(),
            )
        };

        session.send_and_wait("Tracing.end", None, OP_TIMEOUT).await?;
        if let Some(rx) = complete_rx {
            if tokio::time::timeout(COMPLETE_TIMEOUT, rx).await.is_err() {
                tracing::warn!("tracingComplete not seen before deadline, writing what arrived");
            }
        }

        // Subscriptions die with the inner state on the next start; drop
        // them now that collection is done.
        self.inner.lock().await.subs.clear();

        let events: Vec<Value> = {
            let guard = chunks.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        tokio::fs::create_dir_all(artifact_dir)
            .await
            .map_err(|err| WatcherError::Internal(format!("artifact dir: {err}")))?;
        let path = artifact_dir.join(format!("trace-{}.json", now_ms()));
        let payload = serde_json::to_vec(&json!({"traceEvents": events}))
            .map_err(|err| WatcherError::Internal(err.to_string()))?;
        tokio::fs::write(&path, payload)
            .await
            .map_err(|err| WatcherError::Internal(format!("write artifact: {err}")))?;

        Ok(json!({
            "path": path.to_string_lossy(),
            "events": events.len(),
        }))
    }
}
