//! Shared data model for Argus: watcher records, telemetry events,
//! target matching, buffer filters, and small pure utilities.
//!
//! This crate is deliberately free of async and I/O so every consumer
//! (watcher runtime, registry store, CLI front-end) agrees on one wire
//! format and one set of pure rules.

pub mod filter;
pub mod ignore;
pub mod matching;
pub mod preview;
pub mod record;
pub mod redact;
pub mod types;
pub mod util;

pub use ignore::IgnoreList;
pub use matching::{CompiledMatch, TargetInfo, TargetMatch};
pub use record::{CdpEndpoint, Registry, WatcherRecord, REGISTRY_VERSION};
pub use types::{LogEvent, LogLevel, NetworkRequestSummary, SelectedLocation};
