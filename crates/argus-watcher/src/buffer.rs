//! Bounded in-memory event buffer with long-poll support.
//!
//! Ids are assigned at insertion, strictly increase for the lifetime of
//! the process, and are never reused; eviction drops the oldest entry
//! without reordering. Long-poll waiters are released edge-triggered:
//! every push wakes all waiters, each re-runs its filter against the
//! buffer and either returns its batch or parks again.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use argus_core::types::{LogEvent, NetworkRequestSummary};
use tokio::sync::Notify;

/// Default buffer capacity.
pub const DEFAULT_CAPACITY: usize = 50_000;

/// Query limit bounds.
pub const DEFAULT_LIMIT: usize = 500;
pub const MAX_LIMIT: usize = 5_000;

/// Long-poll timeout bounds (milliseconds).
pub const DEFAULT_WAIT_MS: u64 = 25_000;
pub const MIN_WAIT_MS: u64 = 1_000;
pub const MAX_WAIT_MS: u64 = 120_000;

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

pub fn clamp_wait_ms(wait_ms: Option<u64>) -> u64 {
    wait_ms
        .unwrap_or(DEFAULT_WAIT_MS)
        .clamp(MIN_WAIT_MS, MAX_WAIT_MS)
}

/// Implemented by entries that receive a buffer-assigned id.
pub trait Sequenced {
    fn assign_id(&mut self, id: u64);
    fn id(&self) -> u64;
}

impl Sequenced for LogEvent {
    fn assign_id(&mut self, id: u64) {
        self.id = id;
    }
    fn id(&self) -> u64 {
        self.id
    }
}

impl Sequenced for NetworkRequestSummary {
    fn assign_id(&mut self, id: u64) {
        self.id = id;
    }
    fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStats {
    pub size: usize,
    pub last_id: u64,
}

pub struct EventBuffer<T> {
    items: Mutex<VecDeque<T>>,
    next_id: AtomicU64,
    capacity: usize,
    notify: Notify,
}

impl<T: Sequenced + Clone> EventBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            next_id: AtomicU64::new(1),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Assign the next id, append, evict if over capacity, wake waiters.
    pub fn push(&self, mut item: T) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        item.assign_id(id);
        {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            items.push_back(item);
            while items.len() > self.capacity {
                items.pop_front();
            }
        }
        self.notify.notify_waiters();
        id
    }

    /// Oldest entries with `id > after_id` passing `filter`, up to
    /// `limit`. The returned cursor is the id of the last entry, or
    /// `after_id` when nothing matched.
    pub fn list_after(
        &self,
        after_id: u64,
        filter: impl Fn(&T) -> bool,
        limit: usize,
    ) -> (Vec<T>, u64) {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::new();
        for item in items.iter() {
            if item.id() <= after_id || !filter(item) {
                continue;
            }
            out.push(item.clone());
            if out.len() >= limit {
                break;
            }
        }
        let next_after = out.last().map_or(after_id, |item| item.id());
        (out, next_after)
    }

    /// Long-poll variant: returns immediately when matching entries
    /// exist, otherwise parks until new entries arrive or the timeout
    /// elapses (then `timed_out` is true and the cursor echoes
    /// `after_id`).
    pub async fn wait_for_after(
        &self,
        after_id: u64,
        filter: impl Fn(&T) -> bool,
        limit: usize,
        timeout: Duration,
    ) -> (Vec<T>, u64, bool) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Arm the waiter before checking so a push between the check
            // and the park cannot be missed.
            let notified = self.notify.notified();
            let (items, next_after) = self.list_after(after_id, &filter, limit);
            if !items.is_empty() {
                return (items, next_after, false);
            }
            if tokio::time::Instant::now() >= deadline {
                return (Vec::new(), after_id, true);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return (Vec::new(), after_id, true);
                }
            }
        }
    }

    pub fn stats(&self) -> BufferStats {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        BufferStats {
            size: items.len(),
            last_id: self.next_id.load(Ordering::SeqCst).saturating_sub(1),
        }
    }
}
