//! CDP error taxonomy.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CdpError {
    #[error("no CDP session attached")]
    NotAttached,

    #[error("CDP request {method} timed out")]
    Timeout { method: String },

    #[error("CDP request {method} failed: {message}")]
    RequestFailed { method: String, message: String },

    #[error("CDP connection closed: {0}")]
    ConnectionClosed(String),

    #[error("CDP transport error: {0}")]
    Transport(String),

    #[error("target discovery failed: {0}")]
    Discovery(String),
}

impl CdpError {
    /// Stable machine-readable code carried on the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAttached => "cdp_not_attached",
            Self::Timeout { .. } => "cdp_timeout",
            Self::RequestFailed { .. } => "cdp_request_failed",
            Self::ConnectionClosed(_) | Self::Transport(_) | Self::Discovery(_) => "transport",
        }
    }
}
