//! Caching layers.
//!
//! * [`uri`] - short-lived cache of resolved URLs
//! * [`dir`] - directory-backed byte cache implementing [`DiskCache`]
//! * [`selector`] - per-request choice between disk cache and upstream
//! * [`eviction`] - keeps only the current and next tracks on disk

pub mod dir;
pub mod eviction;
pub mod selector;
pub mod uri;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{error::Result, source::DataSpec, track::TrackId};

pub use dir::DirCache;
pub use eviction::{TemporalCacheState, TemporalEvictionPolicy};
pub use selector::CacheSelector;
pub use uri::{ResolvedUri, ResolvedUriCache};

/// Byte cache keyed by track id and position.
///
/// Holds raw bytes only, never track metadata. Implementations must be safe
/// to call concurrently.
#[async_trait]
pub trait DiskCache: Send + Sync {
    /// Whether `length` bytes from `position` are present for `key`.
    async fn is_cached(&self, key: &TrackId, position: u64, length: u64) -> bool;

    /// Reads `length` bytes from `position`.
    async fn read(&self, key: &TrackId, position: u64, length: u64) -> Result<Bytes>;

    /// Stores `data` starting at `position`.
    async fn write(&self, key: &TrackId, position: u64, data: Bytes) -> Result<()>;

    /// Removes everything stored for `key`.
    async fn remove_resource(&self, key: &TrackId) -> Result<()>;

    /// Bytes currently stored.
    async fn space_used(&self) -> u64;
}

/// Decides whether a request goes through the disk cache.
///
/// Clones share the pause flag.
#[derive(Clone, Debug, Default)]
pub struct CachePolicy {
    paused: Arc<AtomicBool>,
}

impl CachePolicy {
    #[must_use]
    pub fn new(paused: bool) -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(paused)),
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// False while caching is paused or for local tracks.
    #[must_use]
    pub fn should_cache(&self, spec: &DataSpec) -> bool {
        !self.is_paused() && !spec.key.is_local()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use super::*;
    use crate::error::Error;

    /// In-memory cache that counts calls and can be made read-only.
    #[derive(Default)]
    pub(crate) struct MemoryCache {
        pub(crate) spans: Mutex<HashMap<TrackId, Vec<(u64, Bytes)>>>,
        pub(crate) read_only: AtomicBool,
        pub(crate) reads: AtomicUsize,
        pub(crate) writes: AtomicUsize,
        pub(crate) removals: Mutex<Vec<TrackId>>,
    }

    impl MemoryCache {
        pub(crate) fn with_span(key: &str, position: u64, data: &'static [u8]) -> Self {
            let cache = Self::default();
            cache
                .spans
                .lock()
                .unwrap()
                .entry(TrackId::from(key))
                .or_default()
                .push((position, Bytes::from_static(data)));
            cache
        }

        fn find(&self, key: &TrackId, position: u64, length: u64) -> Option<Bytes> {
            let spans = self.spans.lock().unwrap();
            spans.get(key)?.iter().find_map(|(start, data)| {
                let end = start + data.len() as u64;
                (*start <= position && position + length <= end).then(|| {
                    let offset = usize::try_from(position - start).unwrap();
                    data.slice(offset..offset + usize::try_from(length).unwrap())
                })
            })
        }
    }

    #[async_trait]
    impl DiskCache for MemoryCache {
        async fn is_cached(&self, key: &TrackId, position: u64, length: u64) -> bool {
            self.find(key, position, length).is_some()
        }

        async fn read(&self, key: &TrackId, position: u64, length: u64) -> Result<Bytes> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.read_only.load(Ordering::SeqCst) {
                return Err(Error::read_only_cache("cache mounted read-only"));
            }
            self.find(key, position, length)
                .ok_or_else(|| Error::not_found(format!("{key} not cached")))
        }

        async fn write(&self, key: &TrackId, position: u64, data: Bytes) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.read_only.load(Ordering::SeqCst) {
                return Err(Error::read_only_cache("cache mounted read-only"));
            }
            self.spans
                .lock()
                .unwrap()
                .entry(key.clone())
                .or_default()
                .push((position, data));
            Ok(())
        }

        async fn remove_resource(&self, key: &TrackId) -> Result<()> {
            self.removals.lock().unwrap().push(key.clone());
            self.spans.lock().unwrap().remove(key);
            Ok(())
        }

        async fn space_used(&self) -> u64 {
            self.spans
                .lock()
                .unwrap()
                .values()
                .flatten()
                .map(|(_, data)| data.len() as u64)
                .sum()
        }
    }

    #[test]
    fn policy_skips_local_tracks_and_pauses() {
        let policy = CachePolicy::new(false);
        assert!(policy.should_cache(&DataSpec::new("abc")));
        assert!(!policy.should_cache(&DataSpec::new(TrackId::local("/a.mp3"))));

        let shared = policy.clone();
        shared.set_paused(true);
        assert!(!policy.should_cache(&DataSpec::new("abc")));
    }
}
