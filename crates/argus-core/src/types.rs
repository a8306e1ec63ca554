//! Telemetry event types shared between the watcher and the front-end.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Log level ───────────────────────────────────────────────────────

/// Normalized severity of a captured log event.
///
/// CDP reports a wider, open set of console types (`log`, `dir`,
/// `assert`, ...); everything is folded into this closed set before it
/// reaches a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Exception,
}

impl LogLevel {
    pub const ALL: [Self; 6] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warning,
        Self::Error,
        Self::Exception,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Exception => "exception",
        }
    }

    /// Fold a CDP console API call type or log entry level into the
    /// closed set.
    pub fn from_console_type(kind: &str) -> Self {
        match kind {
            "trace" => Self::Trace,
            "debug" | "verbose" => Self::Debug,
            "warning" | "warn" => Self::Warning,
            "error" | "assert" => Self::Error,
            // `log`, `info`, `dir`, `table`, ... all read as info.
            _ => Self::Info,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" | "log" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "exception" => Ok(Self::Exception),
            _ => Err(format!("unknown log level: {s}")),
        }
    }
}

// ─── Log event ───────────────────────────────────────────────────────

/// One captured console/exception event. Immutable once emitted; the
/// buffer assigns `id` at insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub id: u64,
    /// Epoch milliseconds at capture time.
    pub ts: i64,
    pub level: LogLevel,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<serde_json::Value>>,
    /// `console`, `exception`, ...
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
}

/// A resolved stack location, 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl LogEvent {
    pub fn set_location(&mut self, loc: Option<SelectedLocation>) {
        match loc {
            Some(loc) => {
                self.file = Some(loc.file);
                self.line = Some(loc.line);
                self.column = Some(loc.column);
            }
            None => {
                self.file = None;
                self.line = None;
                self.column = None;
            }
        }
    }
}

// ─── Network request summary ─────────────────────────────────────────

/// One completed or failed network request, committed when the browser
/// reports `loadingFinished` or `loadingFailed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequestSummary {
    pub id: u64,
    /// Epoch milliseconds when the request was first seen.
    pub ts: i64,
    pub method: String,
    /// Redacted; see `redact::redact_url`.
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_data_length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}
