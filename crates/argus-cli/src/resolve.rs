//! Watcher resolution: registry lookup, cwd match, liveness probes.

use std::path::Path;
use std::time::Duration;

use argus_core::record::{Registry, WatcherRecord, DEFAULT_PRUNE_TTL_MS};
use argus_core::util::now_ms;
use futures_util::future::join_all;

const PROBE_TIMEOUT: Duration = Duration::from_millis(1_500);

/// Resolution failure carrying the full candidate list for diagnostics.
#[derive(Debug)]
pub struct ResolveFailure {
    pub message: String,
    pub exit_code: u8,
    pub candidates: Vec<WatcherRecord>,
}

impl std::fmt::Display for ResolveFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Find the intended watcher per the resolution ladder: explicit id,
/// unique cwd match, then a unique liveness probe.
pub async fn resolve_watcher(
    registry_path: &Path,
    id: Option<&str>,
) -> Result<WatcherRecord, ResolveFailure> {
    let registry = pruned_registry(registry_path).await;
    let candidates: Vec<WatcherRecord> = registry.watchers.values().cloned().collect();

    if let Some(id) = id {
        return match registry.watchers.get(id) {
            Some(record) => Ok(record.clone()),
            None => Err(ResolveFailure {
                message: format!("Watcher not found: {id}"),
                exit_code: 2,
                candidates,
            }),
        };
    }

    if let Ok(cwd) = std::env::current_dir() {
        let cwd = cwd.to_string_lossy();
        let mut here = candidates.iter().filter(|w| w.cwd == cwd);
        if let (Some(record), None) = (here.next(), here.next()) {
            return Ok(record.clone());
        }
    }

    let alive = probe_all(&candidates).await;
    if alive.len() == 1 {
        return Ok(alive.into_iter().next().expect("len checked"));
    }

    Err(ResolveFailure {
        message: "Watcher id required.".to_owned(),
        exit_code: 2,
        candidates,
    })
}

/// List registered watchers after pruning.
pub async fn list_watchers(registry_path: &Path) -> Vec<WatcherRecord> {
    pruned_registry(registry_path)
        .await
        .watchers
        .into_values()
        .collect()
}

/// Prune stale records by TTL, persisting when the lock can be had;
/// otherwise prune the in-memory view only.
async fn pruned_registry(registry_path: &Path) -> Registry {
    let path = registry_path.to_path_buf();
    let persisted = tokio::task::spawn_blocking(move || {
        argus_registry::update_registry(&path, |registry| {
            registry.prune_stale(now_ms(), DEFAULT_PRUNE_TTL_MS).0
        })
    })
    .await;

    match persisted {
        Ok(Ok(registry)) => registry,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "registry prune skipped, using read-only view");
            let (registry, warnings) = argus_registry::read_registry(registry_path);
            for warning in warnings {
                tracing::warn!("{warning}");
            }
            registry.prune_stale(now_ms(), DEFAULT_PRUNE_TTL_MS).0
        }
        Err(err) => {
            tracing::warn!(error = %err, "registry prune task failed");
            Registry::empty()
        }
    }
}

async fn probe_all(candidates: &[WatcherRecord]) -> Vec<WatcherRecord> {
    let client = reqwest::Client::new();
    let probes = candidates.iter().map(|record| {
        let client = client.clone();
        let record = record.clone();
        async move {
            let url = format!("http://{}:{}/status", record.host, record.port);
            let ok = client
                .get(&url)
                .timeout(PROBE_TIMEOUT)
                .send()
                .await
                .map(|response| response.status().is_success())
                .unwrap_or(false);
            ok.then_some(record)
        }
    });
    join_all(probes).await.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_registry::update_registry;

    fn record(id: &str, cwd: &str, updated_at: i64, port: u16) -> WatcherRecord {
        WatcherRecord {
            id: id.to_owned(),
            host: "127.0.0.1".to_owned(),
            // Unroutable ports so probes always fail fast in tests.
            port,
            pid: 1,
            cwd: cwd.to_owned(),
            started_at: updated_at,
            updated_at,
            target_match: None,
            cdp: None,
            include_timestamps: false,
        }
    }

    #[tokio::test]
    async fn lookup_miss_reports_exit_2_with_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let err = resolve_watcher(&path, Some("app")).await.unwrap_err();
        assert_eq!(err.message, "Watcher not found: app");
        assert_eq!(err.exit_code, 2);
        assert!(err.candidates.is_empty());
    }

    #[tokio::test]
    async fn explicit_id_hit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let now = now_ms();
        update_registry(&path, |reg| reg.set_watcher(record("app", "/tmp/x", now, 1), now))
            .unwrap();

        let found = resolve_watcher(&path, Some("app")).await.unwrap();
        assert_eq!(found.id, "app");
    }

    #[tokio::test]
    async fn ambiguous_cwd_requires_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let cwd = std::env::current_dir()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let now = now_ms();
        update_registry(&path, |reg| {
            reg.set_watcher(record("a", &cwd, now, 1), now)
                .set_watcher(record("b", &cwd, now, 1), now)
        })
        .unwrap();

        let err = resolve_watcher(&path, None).await.unwrap_err();
        assert_eq!(err.message, "Watcher id required.");
        assert_eq!(err.exit_code, 2);
        assert_eq!(err.candidates.len(), 2);
    }

    #[tokio::test]
    async fn unique_cwd_match_wins_without_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let cwd = std::env::current_dir()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let now = now_ms();
        update_registry(&path, |reg| {
            reg.set_watcher(record("here", &cwd, now, 1), now)
                .set_watcher(record("elsewhere", "/somewhere/else", now, 1), now)
        })
        .unwrap();

        let found = resolve_watcher(&path, None).await.unwrap();
        assert_eq!(found.id, "here");
    }

    #[tokio::test]
    async fn stale_records_are_pruned_before_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        update_registry(&path, |reg| reg.set_watcher(record("old", "/tmp/x", 1_000, 1), 1_000))
            .unwrap();

        let err = resolve_watcher(&path, Some("old")).await.unwrap_err();
        assert_eq!(err.exit_code, 2);
        assert!(err.candidates.is_empty(), "stale record must be pruned");

        let (registry, _) = argus_registry::read_registry(&path);
        assert!(registry.watchers.is_empty(), "prune is persisted");
    }
}
