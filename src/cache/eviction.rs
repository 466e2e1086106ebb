//! Temporal eviction of the disk cache.
//!
//! Only the current and the next track are worth keeping on disk. On every
//! transition everything else that was tracked is removed, so previously
//! played content is discarded immediately. Local tracks are never in the
//! disk cache and are never evicted.

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, PoisonError},
};

use crate::{cache::DiskCache, track::TrackId};

/// Tracks known to the eviction policy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemporalCacheState {
    pub current: Option<TrackId>,
    pub next: Option<TrackId>,
    pub tracked: BTreeSet<TrackId>,
}

pub struct TemporalEvictionPolicy {
    cache: Arc<dyn DiskCache>,
    state: Mutex<TemporalCacheState>,
}

impl TemporalEvictionPolicy {
    #[must_use]
    pub fn new(cache: Arc<dyn DiskCache>) -> Self {
        Self {
            cache,
            state: Mutex::new(TemporalCacheState::default()),
        }
    }

    /// Makes `current` and `next` the only tracked remote tracks.
    ///
    /// Returns the tracks that were evicted. Removal failures are logged and
    /// otherwise ignored.
    pub async fn update_current_and_next(
        &self,
        current: Option<TrackId>,
        next: Option<TrackId>,
    ) -> Vec<TrackId> {
        let to_evict = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let keep: BTreeSet<TrackId> = current.iter().chain(next.iter()).cloned().collect();

            let to_evict: Vec<TrackId> = state
                .tracked
                .iter()
                .filter(|id| !keep.contains(*id) && !id.is_local())
                .cloned()
                .collect();

            state.tracked.retain(TrackId::is_local);
            state.tracked.extend(keep);
            state.current = current;
            state.next = next;

            to_evict
        };

        self.evict(&to_evict).await;
        to_evict
    }

    /// Evicts everything tracked and forgets all state.
    pub async fn clear_all(&self) -> Vec<TrackId> {
        let tracked = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *state).tracked
        };

        let to_evict: Vec<TrackId> = tracked.into_iter().filter(|id| !id.is_local()).collect();
        self.evict(&to_evict).await;
        to_evict
    }

    #[must_use]
    pub fn state(&self) -> TemporalCacheState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn evict(&self, ids: &[TrackId]) {
        for id in ids {
            match self.cache.remove_resource(id).await {
                Ok(()) => debug!("evicted {id} from cache"),
                Err(e) => debug!("failed evicting {id} from cache: {e}"),
            }
        }
    }
}
