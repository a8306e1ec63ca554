//! CDP session: command/reply correlation and event fan-out over one
//! transport.
//!
//! Command ids are monotonic across the whole process, so event ordering
//! stays globally comparable across re-attachments. All `send_and_wait`
//! callers are serialized onto the transport through its channel; event
//! handlers run inline on the reader task and must not block.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{oneshot, watch};

use crate::error::CdpError;
use crate::transport::{InboundFrame, Transport};

/// Default deadline for one CDP command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Process-wide command id counter, never reused.
static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Clone)]
pub struct CdpSession {
    inner: Arc<SessionInner>,
}

struct PendingEntry {
    method: String,
    tx: oneshot::Sender<Result<Value, CdpError>>,
}

struct SessionInner {
    pending: Mutex<HashMap<u64, PendingEntry>>,
    handlers: Mutex<HashMap<String, Vec<(u64, EventHandler)>>>,
    next_handler_id: AtomicU64,
    outbound: Mutex<Option<tokio::sync::mpsc::UnboundedSender<String>>>,
    /// Attachment generation. A reader from a superseded attachment must
    /// not tear down the transport that replaced it.
    epoch: AtomicU64,
}

/// Guard returned by `on_event`; dropping it unsubscribes.
pub struct Subscription {
    session: Weak<SessionInner>,
    method: String,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.session.upgrade() {
            let mut handlers = inner.handlers.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(list) = handlers.get_mut(&self.method) {
                list.retain(|(id, _)| *id != self.id);
                if list.is_empty() {
                    handlers.remove(&self.method);
                }
            }
        }
    }
}

impl Default for CdpSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CdpSession {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                pending: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
                next_handler_id: AtomicU64::new(1),
                outbound: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Install a transport and spawn the reader loop. Pending state from
    /// a previous attachment is rejected first. The returned receiver
    /// flips to `true` when the transport closes.
    pub fn attach(&self, transport: Transport) -> watch::Receiver<bool> {
        self.inner
            .fail_pending(CdpError::ConnectionClosed("re-attached".into()));
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(transport.outbound);

        let (closed_tx, closed_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let mut inbound = transport.inbound;
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                match frame {
                    InboundFrame::Text(text) => inner.handle_frame(&text),
                    InboundFrame::Closed => break,
                }
            }
            // Only the current attachment's reader may tear down state;
            // a superseded reader just reports its own closure.
            if inner.epoch.load(Ordering::SeqCst) == epoch {
                inner.fail_pending(CdpError::ConnectionClosed("connection closed".into()));
                *inner.outbound.lock().unwrap_or_else(|e| e.into_inner()) = None;
            }
            let _ = closed_tx.send(true);
        });
        closed_rx
    }

    /// Drop the transport and reject everything in flight.
    pub fn detach(&self, reason: &str) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        *self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
        self.inner
            .fail_pending(CdpError::ConnectionClosed(reason.to_owned()));
    }

    pub fn is_attached(&self) -> bool {
        self.inner
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Send `{id, method, params}` and wait for the reply with the same
    /// id. Fails on a protocol error reply, an elapsed deadline, a
    /// closed connection, or an unattached session.
    pub async fn send_and_wait(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        let id = NEXT_COMMAND_ID.fetch_add(1, Ordering::SeqCst);
        let mut frame = json!({ "id": id, "method": method });
        if let Some(params) = params {
            frame["params"] = params;
        }
        let payload = frame.to_string();

        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id,
                PendingEntry {
                    method: method.to_owned(),
                    tx,
                },
            );

        let send_result = {
            let outbound = self
                .inner
                .outbound
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match outbound.as_ref() {
                Some(tx) => tx.send(payload).map_err(|_| CdpError::NotAttached),
                None => Err(CdpError::NotAttached),
            }
        };
        if let Err(err) = send_result {
            self.inner.remove_pending(id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CdpError::ConnectionClosed("reply channel dropped".into())),
            Err(_) => {
                self.inner.remove_pending(id);
                Err(CdpError::Timeout {
                    method: method.to_owned(),
                })
            }
        }
    }

    /// Register an event subscriber. Handlers run in insertion order on
    /// the reader task; a panicking handler is contained so it cannot
    /// break dispatch for the others.
    pub fn on_event(
        &self,
        method: &str,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(method.to_owned())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            session: Arc::downgrade(&self.inner),
            method: method.to_owned(),
            id,
        }
    }
}

impl SessionInner {
    fn handle_frame(&self, text: &str) {
        let Ok(frame) = serde_json::from_str::<Value>(text) else {
            tracing::debug!("ignoring unparsable cdp frame");
            return;
        };

        if let Some(id) = frame.get("id").and_then(Value::as_u64) {
            let Some(entry) = self.remove_pending(id) else {
                tracing::debug!(id, "reply for unknown command id");
                return;
            };
            let result = if let Some(error) = frame.get("error") {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown CDP error")
                    .to_owned();
                Err(CdpError::RequestFailed {
                    method: entry.method,
                    message,
                })
            } else {
                Ok(frame.get("result").cloned().unwrap_or(Value::Null))
            };
            let _ = entry.tx.send(result);
            return;
        }

        if let Some(method) = frame.get("method").and_then(Value::as_str) {
            let params = frame.get("params").cloned().unwrap_or(Value::Null);
            let handlers: Vec<EventHandler> = {
                let map = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
                map.get(method)
                    .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                    .unwrap_or_default()
            };
            for handler in handlers {
                if catch_unwind(AssertUnwindSafe(|| handler(&params))).is_err() {
                    tracing::warn!(method, "event handler panicked");
                }
            }
        }
    }

    fn remove_pending(&self, id: u64) -> Option<PendingEntry> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }

    fn fail_pending(&self, error: CdpError) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().collect()
        };
        for (_, entry) in drained {
            let _ = entry.tx.send(Err(error.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// Fake browser side: feed inbound frames, observe outbound ones.
    struct FakeBrowser {
        to_session: mpsc::UnboundedSender<InboundFrame>,
        from_session: mpsc::UnboundedReceiver<String>,
    }

    fn attach_fake(session: &CdpSession) -> (FakeBrowser, watch::Receiver<bool>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let closed = session.attach(Transport::from_channels(out_tx, in_rx));
        (
            FakeBrowser {
                to_session: in_tx,
                from_session: out_rx,
            },
            closed,
        )
    }

    #[tokio::test]
    async fn send_correlates_reply_by_id() {
        let session = CdpSession::new();
        let (mut browser, _closed) = attach_fake(&session);

        let task = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .send_and_wait("Browser.getVersion", None, DEFAULT_COMMAND_TIMEOUT)
                    .await
            })
        };

        let sent = browser.from_session.recv().await.unwrap();
        let frame: Value = serde_json::from_str(&sent).unwrap();
        let id = frame["id"].as_u64().unwrap();
        assert_eq!(frame["method"], "Browser.getVersion");

        browser
            .to_session
            .send(InboundFrame::Text(
                json!({"id": id, "result": {"product": "Chrome"}}).to_string(),
            ))
            .unwrap();

        let result = task.await.unwrap().unwrap();
        assert_eq!(result["product"], "Chrome");
    }

    #[tokio::test]
    async fn error_reply_fails_with_message() {
        let session = CdpSession::new();
        let (mut browser, _closed) = attach_fake(&session);

        let task = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .send_and_wait("Page.navigate", Some(json!({"url": "x"})), DEFAULT_COMMAND_TIMEOUT)
                    .await
            })
        };

        let sent = browser.from_session.recv().await.unwrap();
        let id = serde_json::from_str::<Value>(&sent).unwrap()["id"]
            .as_u64()
            .unwrap();
        browser
            .to_session
            .send(InboundFrame::Text(
                json!({"id": id, "error": {"code": -32000, "message": "Cannot navigate"}})
                    .to_string(),
            ))
            .unwrap();

        let err = task.await.unwrap().unwrap_err();
        match err {
            CdpError::RequestFailed { message, .. } => assert_eq!(message, "Cannot navigate"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_removes_pending_entry() {
        let session = CdpSession::new();
        let (_browser, _closed) = attach_fake(&session);

        let err = session
            .send_and_wait("Runtime.evaluate", None, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CdpError::Timeout { .. }));
        assert!(
            session
                .inner
                .pending
                .lock()
                .unwrap()
                .is_empty(),
            "timed-out entry must be removed"
        );
    }

    #[tokio::test]
    async fn close_rejects_all_pending() {
        let session = CdpSession::new();
        let (browser, mut closed) = attach_fake(&session);

        let task = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .send_and_wait("Runtime.evaluate", None, DEFAULT_COMMAND_TIMEOUT)
                    .await
            })
        };
        // Let the command register before closing.
        tokio::task::yield_now().await;

        browser.to_session.send(InboundFrame::Closed).unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CdpError::ConnectionClosed(_)));

        closed.changed().await.unwrap();
        assert!(*closed.borrow());
        assert!(!session.is_attached());
    }

    #[tokio::test]
    async fn unattached_send_fails_immediately() {
        let session = CdpSession::new();
        let err = session
            .send_and_wait("Runtime.evaluate", None, DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, CdpError::NotAttached));
    }

    #[tokio::test]
    async fn events_fan_out_in_insertion_order() {
        let session = CdpSession::new();
        let (browser, _closed) = attach_fake(&session);

        let order = Arc::new(Mutex::new(Vec::new()));
        let _first = {
            let order = Arc::clone(&order);
            session.on_event("Runtime.consoleAPICalled", move |_| {
                order.lock().unwrap().push("first");
            })
        };
        let _second = {
            let order = Arc::clone(&order);
            session.on_event("Runtime.consoleAPICalled", move |_| {
                order.lock().unwrap().push("second");
            })
        };

        browser
            .to_session
            .send(InboundFrame::Text(
                json!({"method": "Runtime.consoleAPICalled", "params": {"type": "log"}})
                    .to_string(),
            ))
            .unwrap();
        // Allow the reader task to dispatch.
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_break_dispatch() {
        let session = CdpSession::new();
        let (browser, _closed) = attach_fake(&session);

        let reached = Arc::new(AtomicUsize::new(0));
        let _bad = session.on_event("Log.entryAdded", |_| panic!("bad subscriber"));
        let _good = {
            let reached = Arc::clone(&reached);
            session.on_event("Log.entryAdded", move |_| {
                reached.fetch_add(1, Ordering::SeqCst);
            })
        };

        browser
            .to_session
            .send(InboundFrame::Text(
                json!({"method": "Log.entryAdded", "params": {}}).to_string(),
            ))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let session = CdpSession::new();
        let (browser, _closed) = attach_fake(&session);

        let count = Arc::new(AtomicUsize::new(0));
        let sub = {
            let count = Arc::clone(&count);
            session.on_event("Page.frameNavigated", move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        drop(sub);

        browser
            .to_session
            .send(InboundFrame::Text(
                json!({"method": "Page.frameNavigated", "params": {}}).to_string(),
            ))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unparsable_frames_are_ignored() {
        let session = CdpSession::new();
        let (mut browser, _closed) = attach_fake(&session);

        browser
            .to_session
            .send(InboundFrame::Text("not json {".into()))
            .unwrap();

        // Session still works afterwards.
        let task = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .send_and_wait("Browser.getVersion", None, DEFAULT_COMMAND_TIMEOUT)
                    .await
            })
        };
        let sent = browser.from_session.recv().await.unwrap();
        let id = serde_json::from_str::<Value>(&sent).unwrap()["id"]
            .as_u64()
            .unwrap();
        browser
            .to_session
            .send(InboundFrame::Text(json!({"id": id, "result": {}}).to_string()))
            .unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[test]
    fn command_ids_are_process_monotonic() {
        let a = NEXT_COMMAND_ID.fetch_add(1, Ordering::SeqCst);
        let b = NEXT_COMMAND_ID.fetch_add(1, Ordering::SeqCst);
        assert!(b > a);
    }
}
