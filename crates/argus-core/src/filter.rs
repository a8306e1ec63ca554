//! Query filters over the watcher's ring buffers.

use serde::Deserialize;
use thiserror::Error;

use crate::types::{LogEvent, LogLevel, NetworkRequestSummary};

#[derive(Debug, Error)]
#[error("invalid filter regex {pattern:?}: {source}")]
pub struct FilterError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

// ─── Log filter ──────────────────────────────────────────────────────

/// Raw filter parameters as they arrive in an HTTP query or CLI flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilterParams {
    /// Comma-separated in query form; empty means all levels.
    #[serde(default)]
    pub levels: Vec<LogLevel>,
    /// OR-ed regexes over the event text.
    #[serde(default, rename = "match")]
    pub match_patterns: Vec<String>,
    #[serde(default)]
    pub ignore_case: bool,
    /// Substring over the event source.
    #[serde(default)]
    pub source: Option<String>,
    /// Lower bound on the event timestamp, epoch milliseconds.
    #[serde(default)]
    pub since_ts: Option<i64>,
}

/// Compiled form: levels AND (match₁ OR match₂ OR …) AND source AND sinceTs.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    levels: Vec<LogLevel>,
    matchers: Vec<regex::Regex>,
    source: Option<String>,
    since_ts: Option<i64>,
}

impl LogFilterParams {
    pub fn compile(self) -> Result<LogFilter, FilterError> {
        let mut matchers = Vec::with_capacity(self.match_patterns.len());
        for pattern in &self.match_patterns {
            let source = if self.ignore_case {
                format!("(?i){pattern}")
            } else {
                pattern.clone()
            };
            let re = regex::Regex::new(&source).map_err(|source| FilterError {
                pattern: pattern.clone(),
                source,
            })?;
            matchers.push(re);
        }
        Ok(LogFilter {
            levels: self.levels,
            matchers,
            source: self.source,
            since_ts: self.since_ts,
        })
    }
}

impl LogFilter {
    pub fn matches(&self, event: &LogEvent) -> bool {
        if !self.levels.is_empty() && !self.levels.contains(&event.level) {
            return false;
        }
        if !self.matchers.is_empty() && !self.matchers.iter().any(|re| re.is_match(&event.text)) {
            return false;
        }
        if let Some(source) = &self.source
            && !event.source.contains(source.as_str())
        {
            return false;
        }
        if let Some(since) = self.since_ts
            && event.ts < since
        {
            return false;
        }
        true
    }
}

// ─── Network filter ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetFilter {
    #[serde(default)]
    pub since_ts: Option<i64>,
    /// Substring over the redacted URL.
    #[serde(default)]
    pub url: Option<String>,
}

impl NetFilter {
    pub fn matches(&self, summary: &NetworkRequestSummary) -> bool {
        if let Some(since) = self.since_ts
            && summary.ts < since
        {
            return false;
        }
        if let Some(needle) = &self.url
            && !summary.url.contains(needle.as_str())
        {
            return false;
        }
        true
    }
}
