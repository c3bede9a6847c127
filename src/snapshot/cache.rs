//! Write-invalidated cache of the parsed configuration snapshot.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;

use log::{debug, trace};
use tokio::sync::Mutex;

use super::ParsedConfig;
use crate::error::RtxError;

/// The cached snapshot and when it became valid.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub snapshot: Arc<ParsedConfig>,
    pub valid_since: SystemTime,
    generation: u64,
}

impl CacheEntry {
    /// Invalidation generation the entry was fetched under.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Holds at most one parsed snapshot, valid until the next write.
///
/// Validity is write-based, not time-based: [`SnapshotCache::invalidate`] bumps a
/// generation counter, and a fetch that was started before an invalidation is
/// never stored. Concurrent readers share one fetch because the entry lock is
/// held across it.
///
/// The snapshot is the saved startup file. Writes that have not been followed
/// by `save` yet are tracked with [`SnapshotCache::mark_unsaved`]; while any are
/// pending the file lags the running configuration.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    entry: Mutex<Option<CacheEntry>>,
    generation: AtomicU64,
    fetches: AtomicU64,
    unsaved: AtomicBool,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached snapshot, or runs `fetch` and caches its result.
    ///
    /// A failed fetch leaves the cache untouched and returns the error.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<Arc<ParsedConfig>, RtxError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ParsedConfig, RtxError>>,
    {
        let mut entry = self.entry.lock().await;
        let generation = self.generation.load(Ordering::SeqCst);
        if let Some(cached) = entry.as_ref()
            && cached.generation == generation
        {
            trace!("snapshot cache hit (generation {generation})");
            return Ok(cached.snapshot.clone());
        }

        self.fetches.fetch_add(1, Ordering::SeqCst);
        let snapshot = Arc::new(fetch().await?);
        if self.generation.load(Ordering::SeqCst) == generation {
            *entry = Some(CacheEntry {
                snapshot: snapshot.clone(),
                valid_since: SystemTime::now(),
                generation,
            });
            debug!(
                "snapshot cached: {} commands, digest {}",
                snapshot.command_count(),
                snapshot.digest()
            );
        } else {
            debug!("snapshot invalidated during fetch, not cached");
        }
        Ok(snapshot)
    }

    /// Drops the cached snapshot. The next read fetches again.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        // A fetch in progress holds the lock; its result is discarded by the
        // generation check instead.
        if let Ok(mut entry) = self.entry.try_lock() {
            *entry = None;
        }
        trace!("snapshot cache invalidated (generation {generation})");
    }

    /// Records a write to the running configuration that is not saved yet.
    pub fn mark_unsaved(&self) {
        if !self.unsaved.swap(true, Ordering::SeqCst) {
            debug!("running configuration differs from the saved file");
        }
    }

    /// Records a successful `save`.
    pub fn mark_saved(&self) {
        self.unsaved.store(false, Ordering::SeqCst);
    }

    /// Whether a write happened since the last `save`.
    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved.load(Ordering::SeqCst)
    }

    /// The current entry, if any and still valid.
    pub async fn entry(&self) -> Option<CacheEntry> {
        let entry = self.entry.lock().await;
        let generation = self.generation.load(Ordering::SeqCst);
        entry
            .as_ref()
            .filter(|cached| cached.generation == generation)
            .cloned()
    }

    pub async fn is_valid(&self) -> bool {
        self.entry().await.is_some()
    }

    /// How many fetches this cache has started.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
