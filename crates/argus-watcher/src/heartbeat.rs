//! Periodic registry refresh.
//!
//! Announce happens in the supervisor when the port is bound; this task
//! only refreshes `updatedAt`. A failed lock acquisition skips the tick,
//! the front-end's TTL pruning is the backstop.

use std::path::PathBuf;
use std::time::Duration;

use argus_core::util::now_ms;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_HEARTBEAT_MS: u64 = 15_000;

pub async fn run_heartbeat(
    registry_path: PathBuf,
    watcher_id: String,
    interval_ms: u64,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; the announce already covered it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let path = registry_path.clone();
                let id = watcher_id.clone();
                let result = tokio::task::spawn_blocking(move || {
                    argus_registry::update_registry(&path, |registry| {
                        registry.touch_watcher(&id, now_ms())
                    })
                })
                .await;
                match result {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => {
                        tracing::warn!(error = %err, "heartbeat tick skipped");
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "heartbeat task join failed");
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::record::WatcherRecord;
    use argus_registry::{read_registry, update_registry};

    fn record(id: &str) -> WatcherRecord {
        WatcherRecord {
            id: id.to_owned(),
            host: "127.0.0.1".into(),
            port: 4100,
            pid: 1,
            cwd: "/tmp".into(),
            started_at: 1,
            updated_at: 1,
            target_match: None,
            cdp: None,
            include_timestamps: false,
        }
    }

    #[tokio::test]
    async fn heartbeat_refreshes_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        update_registry(&path, |reg| reg.set_watcher(record("hb"), 1)).unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_heartbeat(
            path.clone(),
            "hb".into(),
            25,
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        task.await.unwrap();

        let (registry, _) = read_registry(&path);
        assert!(
            registry.watchers["hb"].updated_at > 1,
            "updatedAt should have been refreshed"
        );
    }

    #[tokio::test]
    async fn heartbeat_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Completes promptly even though the interval is long.
        tokio::time::timeout(
            Duration::from_secs(1),
            run_heartbeat(path, "hb".into(), 60_000, cancel),
        )
        .await
        .expect("cancelled heartbeat must exit");
    }
}
