//! CDP source: target selection and the attach/re-attach lifecycle.
//!
//! The source owns the reconnect loop. It polls the browser's target
//! list, picks the configured target, attaches the session, enables the
//! domains the pipeline needs, and publishes lifecycle notifications on
//! a broadcast channel. On disconnect it resumes with exponential
//! backoff (250 ms doubling, capped at 5 s).

use std::sync::Arc;
use std::time::Duration;

use argus_core::matching::{CompiledMatch, TargetInfo};
use argus_core::util::backoff_delay_ms;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::discovery::fetch_targets;
use crate::error::CdpError;
use crate::session::{CdpSession, DEFAULT_COMMAND_TIMEOUT};
use crate::transport;

const RECONNECT_BASE_MS: u64 = 250;
const RECONNECT_CAP_MS: u64 = 5_000;

/// Where targets come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Poll the browser's `/json/list` and dial the target directly.
    Cdp,
    /// Targets arrive through the browser-extension bridge; the session
    /// interface is identical but discovery routes are served elsewhere.
    Extension,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub chrome_host: String,
    pub chrome_port: u16,
    pub target_match: CompiledMatch,
}

/// Lifecycle notifications consumed by the supervisor.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Attached { target: TargetInfo },
    Detached { reason: String },
    PageNavigated { url: String, title: Option<String> },
}

pub struct CdpSource {
    session: CdpSession,
    config: SourceConfig,
    events_tx: broadcast::Sender<SourceEvent>,
    cancel: CancellationToken,
    http: reqwest::Client,
    /// Keeps the navigation hook registered for the session's lifetime;
    /// subscriptions survive re-attachment.
    _nav_sub: crate::session::Subscription,
}

impl CdpSource {
    pub fn new(config: SourceConfig, cancel: CancellationToken) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        let session = CdpSession::new();
        let nav_sub = install_navigation_hook(&session, events_tx.clone());
        Self {
            session,
            config,
            events_tx,
            cancel,
            http: reqwest::Client::new(),
            _nav_sub: nav_sub,
        }
    }

    pub fn session(&self) -> CdpSession {
        self.session.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.events_tx.subscribe()
    }

    /// Run the attach loop until cancelled.
    pub async fn run(self: Arc<Self>) {
        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.attach_once().await {
                Ok(mut closed) => {
                    attempt = 0;
                    tokio::select! {
                        _ = closed.changed() => {
                            let _ = self.events_tx.send(SourceEvent::Detached {
                                reason: "connection closed".to_owned(),
                            });
                        }
                        _ = self.cancel.cancelled() => {
                            self.session.detach("shutdown");
                            let _ = self.events_tx.send(SourceEvent::Detached {
                                reason: "shutdown".to_owned(),
                            });
                            break;
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!(error = %err, attempt, "attach failed");
                }
            }

            let delay = backoff_delay_ms(attempt, RECONNECT_BASE_MS, RECONNECT_CAP_MS);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                _ = self.cancel.cancelled() => break,
            }
        }
    }

    /// One discovery → select → dial → enable cycle.
    async fn attach_once(&self) -> Result<tokio::sync::watch::Receiver<bool>, CdpError> {
        let targets = fetch_targets(&self.http, &self.config.chrome_host, self.config.chrome_port)
            .await?;
        let target = self
            .config
            .target_match
            .select(&targets)
            .cloned()
            .ok_or_else(|| {
                CdpError::Discovery(format!(
                    "no target matches [{}] among {} targets",
                    self.config.target_match.raw().describe(),
                    targets.len()
                ))
            })?;
        let ws_url = target
            .web_socket_debugger_url
            .clone()
            .ok_or_else(|| CdpError::Discovery(format!("target {} has no debugger URL", target.id)))?;

        let transport = transport::connect(&ws_url).await?;
        let closed = self.session.attach(transport);

        for method in ["Runtime.enable", "Page.enable", "Log.enable"] {
            if let Err(err) = self
                .session
                .send_and_wait(method, None, DEFAULT_COMMAND_TIMEOUT)
                .await
            {
                self.session.detach("enable failed");
                return Err(err);
            }
        }

        tracing::info!(target = %target.id, url = %target.url, "attached to target");
        let _ = self.events_tx.send(SourceEvent::Attached { target });
        Ok(closed)
    }
}

/// Forward top-frame navigations so downstream consumers can rotate
/// file logs.
fn install_navigation_hook(
    session: &CdpSession,
    events_tx: broadcast::Sender<SourceEvent>,
) -> crate::session::Subscription {
    session.on_event("Page.frameNavigated", move |params: &Value| {
        let frame = &params["frame"];
        // Only the top frame has no parent.
        if frame.get("parentId").and_then(Value::as_str).is_some() {
            return;
        }
        let url = frame
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let title = frame
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let _ = events_tx.send(SourceEvent::PageNavigated { url, title });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::matching::TargetMatch;
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::transport::{InboundFrame, Transport};

    fn source() -> Arc<CdpSource> {
        Arc::new(CdpSource::new(
            SourceConfig {
                chrome_host: "127.0.0.1".into(),
                chrome_port: 9222,
                target_match: TargetMatch::default().compile().unwrap(),
            },
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn navigation_hook_emits_top_frame_only() {
        let source = source();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _closed = source.session().attach(Transport::from_channels(out_tx, in_rx));
        let mut events = source.subscribe();

        // Child frame: no event.
        in_tx
            .send(InboundFrame::Text(
                json!({"method": "Page.frameNavigated", "params": {"frame": {
                    "parentId": "top", "url": "https://child.example/"
                }}})
                .to_string(),
            ))
            .unwrap();
        // Top frame: event.
        in_tx
            .send(InboundFrame::Text(
                json!({"method": "Page.frameNavigated", "params": {"frame": {
                    "url": "https://app.example/next"
                }}})
                .to_string(),
            ))
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            SourceEvent::PageNavigated { url, .. } => {
                assert_eq!(url, "https://app.example/next");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(events.try_recv().is_err(), "child frame must not emit");
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let source = Arc::new(CdpSource::new(
            SourceConfig {
                // Unroutable port: discovery fails, loop backs off.
                chrome_host: "127.0.0.1".into(),
                chrome_port: 1,
                target_match: TargetMatch::default().compile().unwrap(),
            },
            cancel.clone(),
        ));

        let handle = tokio::spawn(Arc::clone(&source).run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("run loop must exit on cancel")
            .unwrap();
    }
}
