//! Registry file I/O: lock-free reads, locked read-modify-write.

use std::io::Write;
use std::path::Path;

use argus_core::record::Registry;

use crate::error::RegistryError;
use crate::lock::LockFile;

/// Read the registry without taking the lock.
///
/// An absent, torn, or otherwise unparsable file yields an empty
/// registry plus a warning string; callers must tolerate stale views.
pub fn read_registry(path: &Path) -> (Registry, Vec<String>) {
    let mut warnings = Vec::new();
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return (Registry::empty(), warnings);
        }
        Err(err) => {
            warnings.push(format!("registry unreadable ({err}); treating as empty"));
            return (Registry::empty(), warnings);
        }
    };
    match serde_json::from_str::<Registry>(&raw) {
        Ok(registry) => (registry, warnings),
        Err(err) => {
            warnings.push(format!("registry corrupt ({err}); treating as empty"));
            (Registry::empty(), warnings)
        }
    }
}

/// Apply `f` to the registry under the exclusive lock and persist the
/// result atomically (tmp file, fsync, rename).
///
/// The lock covers only this read-modify-write; `f` must not block on
/// other resources.
pub fn update_registry<F>(path: &Path, f: F) -> Result<Registry, RegistryError>
where
    F: FnOnce(Registry) -> Registry,
{
    let _lock = LockFile::acquire(path)?;

    let (current, warnings) = read_registry(path);
    for warning in warnings {
        tracing::warn!(path = %path.display(), "{warning}");
    }

    let updated = f(current);
    write_atomic(path, &updated)?;
    Ok(updated)
}

fn write_atomic(path: &Path, registry: &Registry) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_vec_pretty(registry)?;
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&payload)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::record::WatcherRecord;

    fn record(id: &str, cwd: &str, updated_at: i64) -> WatcherRecord {
        WatcherRecord {
            id: id.to_owned(),
            host: "127.0.0.1".to_owned(),
            port: 4100,
            pid: std::process::id(),
            cwd: cwd.to_owned(),
            started_at: updated_at,
            updated_at,
            target_match: None,
            cdp: None,
            include_timestamps: false,
        }
    }

    #[test]
    fn read_missing_file_is_empty_without_warning() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, warnings) = read_registry(&dir.path().join("registry.json"));
        assert!(registry.watchers.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn read_corrupt_file_is_empty_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, b"{\"version\":1,\"watch").unwrap();
        let (registry, warnings) = read_registry(&path);
        assert!(registry.watchers.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("corrupt"));
    }

    #[test]
    fn update_persists_and_read_sees_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        update_registry(&path, |reg| reg.set_watcher(record("app", "/tmp/x", 1000), 1000))
            .unwrap();

        let (registry, warnings) = read_registry(&path);
        assert!(warnings.is_empty());
        assert_eq!(registry.watchers["app"].port, 4100);
        assert!(!path.with_extension("json.tmp").exists(), "tmp file renamed away");
        assert!(!crate::lock::lock_path(&path).exists(), "lock released");
    }

    #[test]
    fn update_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        update_registry(&path, |reg| reg.set_watcher(record("app", "/tmp/x", 1000), 1000))
            .unwrap();
        update_registry(&path, |reg| reg.remove_watcher("app", 2000)).unwrap();
        let (registry, _) = read_registry(&path);
        assert!(registry.watchers.is_empty());
    }

    #[test]
    fn concurrent_updates_keep_every_key() {
        const WRITERS: usize = 4;
        const UPDATES_PER_WRITER: usize = 10;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let handles: Vec<_> = (0..WRITERS)
            .map(|w| {
                let path = path.clone();
                std::thread::spawn(move || {
                    for i in 0..UPDATES_PER_WRITER {
                        let id = format!("w{w}-{i}");
                        update_registry(&path, |reg| {
                            reg.set_watcher(record(&id, "/tmp", 1000), 1000)
                        })
                        .expect("update should succeed under contention");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let (registry, warnings) = read_registry(&path);
        assert!(warnings.is_empty(), "final file must parse: {warnings:?}");
        assert_eq!(registry.watchers.len(), WRITERS * UPDATES_PER_WRITER);
    }
}
