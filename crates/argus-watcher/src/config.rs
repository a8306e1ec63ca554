//! Watcher runtime options, assembled by the CLI front-end.

use std::path::PathBuf;

use argus_core::matching::TargetMatch;
use argus_core::util::argus_home;

#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Explicit watcher id; generated from pid + time when absent.
    pub id: Option<String>,
    /// HTTP API port; 0 lets the OS pick.
    pub port: u16,
    pub chrome_host: String,
    pub chrome_port: u16,
    pub target_match: TargetMatch,
    /// Stack-frame ignore patterns (regex).
    pub ignore_patterns: Vec<String>,
    /// Directory for rotating log files; `None` disables file logging.
    /// `ARGUS_LOG_DIR` overrides the default of `<argus_home>/logs`.
    pub log_dir: Option<PathBuf>,
    pub max_log_files: usize,
    pub heartbeat_ms: u64,
    pub capture_network: bool,
    pub include_timestamps: bool,
    pub registry_path: Option<PathBuf>,
    pub artifact_dir: Option<PathBuf>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            id: None,
            port: 0,
            chrome_host: "127.0.0.1".to_owned(),
            chrome_port: 9222,
            target_match: TargetMatch::default(),
            ignore_patterns: Vec::new(),
            log_dir: default_log_dir(),
            max_log_files: crate::filelog::DEFAULT_MAX_FILES,
            heartbeat_ms: 15_000,
            capture_network: true,
            include_timestamps: false,
            registry_path: None,
            artifact_dir: None,
        }
    }
}

fn default_log_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("ARGUS_LOG_DIR")
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    Some(argus_home().join("logs"))
}
