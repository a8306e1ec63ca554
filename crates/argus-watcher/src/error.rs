//! Watcher-side error taxonomy, carried onto the HTTP envelope.

use argus_cdp::CdpError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("{0}")]
    Validation(String),

    #[error("selector matched multiple elements")]
    MultipleMatches { matches: usize },

    #[error("element is not interactable")]
    NotInteractable,

    #[error("page origin does not match requested origin")]
    OriginMismatch { page_origin: String },

    #[error(transparent)]
    Cdp(#[from] CdpError),

    #[error("{0}")]
    Internal(String),
}

impl WatcherError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::MultipleMatches { .. } => "multiple_matches",
            Self::NotInteractable => "not_interactable",
            Self::OriginMismatch { .. } => "origin_mismatch",
            Self::Cdp(err) => err.code(),
            Self::Internal(_) => "internal",
        }
    }
}
