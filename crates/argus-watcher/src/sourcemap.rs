//! Pluggable source-map resolution.
//!
//! Fetching and decoding a source map is external work (HTTP, build
//! servers, inline data URIs); the pipeline only needs a lookup from a
//! generated position to an original one. The cache keeps a mandatory
//! negative entry per file so a missing map is requested once, not once
//! per event.

use std::collections::HashMap;
use std::sync::Arc;

use argus_core::types::SelectedLocation;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// A decoded source map for one generated file.
pub trait MappedSource: Send + Sync {
    /// Map a 1-based generated position to the original source.
    fn original_position(&self, line: u32, column: u32) -> Option<SelectedLocation>;
}

/// Fetches and decodes the map for a generated file, conventionally at
/// `<file>.map`. `None` means there is no usable map.
#[async_trait]
pub trait SourceMapResolver: Send + Sync {
    async fn fetch(&self, file: &str) -> Option<Arc<dyn MappedSource>>;
}

/// Resolver that never resolves; used when source maps are disabled.
pub struct NoSourceMaps;

#[async_trait]
impl SourceMapResolver for NoSourceMaps {
    async fn fetch(&self, _file: &str) -> Option<Arc<dyn MappedSource>> {
        None
    }
}

/// Per-file cache in front of a resolver. Both hits and misses are
/// remembered for the lifetime of the watcher.
pub struct SourceMapCache {
    resolver: Arc<dyn SourceMapResolver>,
    entries: Mutex<HashMap<String, Option<Arc<dyn MappedSource>>>>,
}

impl SourceMapCache {
    pub fn new(resolver: Arc<dyn SourceMapResolver>) -> Self {
        Self {
            resolver,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, file: &str, line: u32, column: u32) -> Option<SelectedLocation> {
        let map = {
            let mut entries = self.entries.lock().await;
            match entries.get(file) {
                Some(cached) => cached.clone(),
                None => {
                    drop(entries);
                    let fetched = self.resolver.fetch(file).await;
                    let mut entries = self.entries.lock().await;
                    entries
                        .entry(file.to_owned())
                        .or_insert_with(|| fetched.clone());
                    fetched
                }
            }
        };
        map.and_then(|m| m.original_position(line, column))
    }

    #[cfg(test)]
    pub async fn cached_files(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedMap(SelectedLocation);

    impl MappedSource for FixedMap {
        fn original_position(&self, _line: u32, _column: u32) -> Option<SelectedLocation> {
            Some(self.0.clone())
        }
    }

    struct CountingResolver {
        fetches: AtomicUsize,
        known: String,
    }

    #[async_trait]
    impl SourceMapResolver for CountingResolver {
        async fn fetch(&self, file: &str) -> Option<Arc<dyn MappedSource>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            (file == self.known).then(|| {
                Arc::new(FixedMap(SelectedLocation {
                    file: "src/app.ts".into(),
                    line: 10,
                    column: 2,
                })) as Arc<dyn MappedSource>
            })
        }
    }

    #[tokio::test]
    async fn positive_result_is_cached() {
        let resolver = Arc::new(CountingResolver {
            fetches: AtomicUsize::new(0),
            known: "bundle.js".into(),
        });
        let cache = SourceMapCache::new(resolver.clone());

        for _ in 0..3 {
            let loc = cache.resolve("bundle.js", 1, 1).await.unwrap();
            assert_eq!(loc.file, "src/app.ts");
        }
        assert_eq!(resolver.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn negative_result_is_cached() {
        let resolver = Arc::new(CountingResolver {
            fetches: AtomicUsize::new(0),
            known: "bundle.js".into(),
        });
        let cache = SourceMapCache::new(resolver.clone());

        for _ in 0..5 {
            assert!(cache.resolve("vendor.js", 1, 1).await.is_none());
        }
        assert_eq!(
            resolver.fetches.load(Ordering::SeqCst),
            1,
            "a 404'd map must be fetched exactly once"
        );
        assert_eq!(cache.cached_files().await, 1);
    }
}
