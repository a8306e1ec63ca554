//! Watcher records and the shared registry document.
//!
//! The registry is a single JSON file mutated by many watcher processes;
//! this module holds only the pure shape and pure transformations. All
//! file and lock handling lives in `argus-registry`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::matching::TargetMatch;

/// Wire-stable registry schema version.
pub const REGISTRY_VERSION: u32 = 1;

/// Default staleness TTL applied by the front-end before any dispatch.
pub const DEFAULT_PRUNE_TTL_MS: i64 = 60_000;

/// CDP endpoint a watcher is connected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdpEndpoint {
    pub host: String,
    pub port: u16,
}

/// One live watcher, as announced in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherRecord {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub pid: u32,
    pub cwd: String,
    /// Epoch milliseconds.
    pub started_at: i64,
    /// Epoch milliseconds; refreshed by the heartbeat.
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "match")]
    pub target_match: Option<TargetMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdp: Option<CdpEndpoint>,
    #[serde(default)]
    pub include_timestamps: bool,
}

/// The registry document: id → record, plus a version marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    pub version: u32,
    /// Epoch milliseconds of the last successful update.
    pub updated_at: i64,
    #[serde(default)]
    pub watchers: BTreeMap<String, WatcherRecord>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            version: REGISTRY_VERSION,
            updated_at: 0,
            watchers: BTreeMap::new(),
        }
    }

    /// Insert or replace a record. Returns the new registry.
    pub fn set_watcher(mut self, record: WatcherRecord, now_ms: i64) -> Self {
        self.watchers.insert(record.id.clone(), record);
        self.updated_at = now_ms;
        self
    }

    /// Remove a record by id. Removing an unknown id is a no-op.
    pub fn remove_watcher(mut self, id: &str, now_ms: i64) -> Self {
        self.watchers.remove(id);
        self.updated_at = now_ms;
        self
    }

    /// Refresh one record's `updatedAt`. Unknown ids are left alone.
    pub fn touch_watcher(mut self, id: &str, now_ms: i64) -> Self {
        if let Some(record) = self.watchers.get_mut(id) {
            record.updated_at = now_ms;
        }
        self.updated_at = now_ms;
        self
    }

    /// Drop records whose `updatedAt` is older than `now - ttl`.
    /// Returns the surviving registry and the pruned ids.
    pub fn prune_stale(mut self, now_ms: i64, ttl_ms: i64) -> (Self, Vec<String>) {
        let cutoff = now_ms - ttl_ms;
        let stale: Vec<String> = self
            .watchers
            .values()
            .filter(|w| w.updated_at < cutoff)
            .map(|w| w.id.clone())
            .collect();
        for id in &stale {
            self.watchers.remove(id);
        }
        (self, stale)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, updated_at: i64) -> WatcherRecord {
        WatcherRecord {
            id: id.to_owned(),
            host: "127.0.0.1".to_owned(),
            port: 4100,
            pid: 4242,
            cwd: "/tmp/x".to_owned(),
            started_at: updated_at,
            updated_at,
            target_match: None,
            cdp: None,
            include_timestamps: false,
        }
    }

    #[test]
    fn set_watcher_is_idempotent() {
        let reg = Registry::empty()
            .set_watcher(record("app", 1000), 1000)
            .set_watcher(record("app", 1000), 2000);
        assert_eq!(reg.watchers.len(), 1);
        assert_eq!(reg.watchers["app"].updated_at, 1000);
    }

    #[test]
    fn remove_unknown_is_noop() {
        let reg = Registry::empty().set_watcher(record("app", 1000), 1000);
        let reg = reg.remove_watcher("nope", 2000);
        assert_eq!(reg.watchers.len(), 1);
    }

    #[test]
    fn touch_refreshes_updated_at() {
        let reg = Registry::empty()
            .set_watcher(record("app", 1000), 1000)
            .touch_watcher("app", 9000);
        assert_eq!(reg.watchers["app"].updated_at, 9000);
    }

    #[test]
    fn prune_removes_only_stale() {
        let reg = Registry::empty()
            .set_watcher(record("old", 1_000), 1_000)
            .set_watcher(record("fresh", 70_000), 70_000);
        let (reg, pruned) = reg.prune_stale(100_000, DEFAULT_PRUNE_TTL_MS);
        assert_eq!(pruned, vec!["old".to_owned()]);
        assert!(reg.watchers.contains_key("fresh"));
        assert!(!reg.watchers.contains_key("old"));
    }

    #[test]
    fn wire_shape_has_version() {
        let reg = Registry::empty().set_watcher(record("app", 1000), 1000);
        let json = serde_json::to_value(&reg).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["watchers"]["app"]["port"], 4100);
        assert_eq!(json["watchers"]["app"]["startedAt"], 1000);

        let back: Registry = serde_json::from_value(json).unwrap();
        assert_eq!(back, reg);
    }

    #[test]
    fn missing_watchers_map_defaults_empty() {
        let back: Registry = serde_json::from_str(r#"{"version":1,"updatedAt":5}"#).unwrap();
        assert!(back.watchers.is_empty());
    }
}
