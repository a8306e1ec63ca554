//! Shared on-disk watcher registry.
//!
//! A single JSON file under `$ARGUS_HOME` is mutated by every watcher
//! process and read by the CLI front-end. Writers serialize through a
//! lockfile with staleness recovery; readers never take the lock and
//! treat a torn or corrupt file as empty.
//!
//! All functions here are synchronous; async callers go through
//! `tokio::task::spawn_blocking`.

mod error;
mod lock;
mod store;

pub use error::RegistryError;
pub use lock::LockFile;
pub use store::{read_registry, update_registry};
