//! Error types for registry access.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("could not acquire registry lock {path:?} within {waited_ms}ms")]
    LockFailed { path: PathBuf, waited_ms: u64 },

    #[error("registry io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}
