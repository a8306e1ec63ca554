//! Cross-process lockfile with staleness recovery.
//!
//! Acquisition opens the lockfile with create-exclusive semantics and
//! polls with jittered backoff up to a deadline. A lockfile whose mtime
//! is older than the staleness window belongs to a dead writer: it is
//! deleted and the acquisition retried. Live writers always recreate the
//! file (fresh mtime) on each acquisition, so a stale takeover never
//! races a healthy one.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use rand::Rng;

use crate::error::RegistryError;

/// Total time budget for one acquisition.
const ACQUIRE_DEADLINE: Duration = Duration::from_secs(2);

/// A lockfile older than this is considered abandoned.
const STALE_AFTER: Duration = Duration::from_secs(10);

/// Backoff: base per attempt, plus jitter, per-step cap.
const BACKOFF_BASE_MS: u64 = 25;
const BACKOFF_JITTER_MS: u64 = 25;
const BACKOFF_STEP_CAP_MS: u64 = 200;

/// Held exclusive lock; the file is removed on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Acquire `<registry>.lock` for the given registry path.
    pub fn acquire(registry_path: &Path) -> Result<Self, RegistryError> {
        let path = lock_path(registry_path);
        let started = Instant::now();
        let mut attempt: u64 = 0;

        loop {
            match try_create(&path) {
                Ok(()) => return Ok(Self { path }),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if remove_if_stale(&path) {
                        continue;
                    }
                }
                Err(err) => return Err(err.into()),
            }

            if started.elapsed() >= ACQUIRE_DEADLINE {
                break;
            }

            attempt += 1;
            let jitter = rand::rng().random_range(0..=BACKOFF_JITTER_MS);
            let delay = (BACKOFF_BASE_MS * attempt + jitter).min(BACKOFF_STEP_CAP_MS);
            std::thread::sleep(Duration::from_millis(delay));
        }

        // One final stale sweep after the deadline.
        if remove_if_stale(&path) && try_create(&path).is_ok() {
            return Ok(Self { path });
        }

        Err(RegistryError::LockFailed {
            path,
            waited_ms: started.elapsed().as_millis() as u64,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove lockfile");
        }
    }
}

pub(crate) fn lock_path(registry_path: &Path) -> PathBuf {
    let mut name = registry_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn try_create(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map(|_| ())
}

/// Delete the lockfile if its mtime is past the staleness window.
/// Returns true when a stale file was removed (acquisition may retry
/// immediately).
fn remove_if_stale(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        // Already gone; the holder released between our attempts.
        return true;
    };
    let Ok(mtime) = meta.modified() else {
        return false;
    };
    let age = SystemTime::now()
        .duration_since(mtime)
        .unwrap_or(Duration::ZERO);
    if age < STALE_AFTER {
        return false;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::warn!(path = %path.display(), age_s = age.as_secs(), "removed stale registry lock");
            true
        }
        // Lost the race with another process doing the same cleanup.
        Err(err) if err.kind() == ErrorKind::NotFound => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_creates_and_drop_removes() {
        let dir = tempfile::tempdir().unwrap();
        let registry = dir.path().join("registry.json");
        let lock = LockFile::acquire(&registry).unwrap();
        assert!(lock.path().exists());
        let path = lock.path().to_path_buf();
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_blocks_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let registry = dir.path().join("registry.json");
        let lock = LockFile::acquire(&registry).unwrap();

        // A fresh lockfile is not stale, so a concurrent acquire must
        // wait out the full deadline and fail.
        let started = Instant::now();
        let second = LockFile::acquire(&registry);
        assert!(matches!(second, Err(RegistryError::LockFailed { .. })));
        assert!(started.elapsed() >= ACQUIRE_DEADLINE);
        drop(lock);

        LockFile::acquire(&registry).unwrap();
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let registry = dir.path().join("registry.json");
        let path = lock_path(&registry);
        std::fs::write(&path, b"").unwrap();

        // Backdate the mtime past the staleness window.
        let old = SystemTime::now() - Duration::from_secs(60);
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(old).unwrap();
        drop(file);

        let started = Instant::now();
        let lock = LockFile::acquire(&registry).unwrap();
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "stale takeover should not wait out the deadline"
        );
        drop(lock);
    }
}
