//! WebSocket transport pump.
//!
//! The session never touches the socket directly; `connect` bridges a
//! tungstenite stream into a pair of channels so tests can substitute a
//! fake transport made of raw channels.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::CdpError;

/// One frame delivered to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    /// Socket closed or failed; always the last frame.
    Closed,
}

/// Channel pair the session attaches to. Dropping `outbound` shuts the
/// writer down.
#[derive(Debug)]
pub struct Transport {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<InboundFrame>,
}

impl Transport {
    /// Build a transport from bare channels. Used by tests and by the
    /// extension bridge, which feeds frames from its own pipe.
    pub fn from_channels(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<InboundFrame>,
    ) -> Self {
        Self { outbound, inbound }
    }
}

/// Open the WebSocket and spawn the reader/writer pumps.
pub async fn connect(ws_url: &str) -> Result<Transport, CdpError> {
    let (ws, _) = connect_async(ws_url)
        .await
        .map_err(|err| CdpError::Transport(format!("connect {ws_url}: {err}")))?;
    let (mut sink, mut stream) = ws.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<InboundFrame>();

    tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if let Err(err) = sink.send(Message::Text(text)).await {
                tracing::debug!(error = %err, "cdp write failed, stopping writer");
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if in_tx.send(InboundFrame::Text(text)).is_err() {
                        return;
                    }
                }
                // Binary frames are decoded as UTF-8 and parsed like text;
                // undecodable payloads are dropped.
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if in_tx.send(InboundFrame::Text(text)).is_err() {
                            return;
                        }
                    }
                    Err(_) => {
                        tracing::debug!("ignoring non-utf8 binary frame");
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(error = %err, "cdp read failed");
                    break;
                }
            }
        }
        let _ = in_tx.send(InboundFrame::Closed);
    });

    Ok(Transport {
        outbound: out_tx,
        inbound: in_rx,
    })
}
