//! Watcher runtime: attaches to one browser target over CDP, captures
//! console/exception/network telemetry into bounded buffers and rotating
//! files, and serves the localhost HTTP API.

pub mod buffer;
pub mod config;
pub mod controllers;
pub mod error;
pub mod filelog;
pub mod heartbeat;
pub mod http;
pub mod netlog;
pub mod ops;
pub mod pipeline;
pub mod sourcemap;
pub mod supervisor;

pub use config::WatcherOptions;
pub use error::WatcherError;
pub use supervisor::run_watcher;
