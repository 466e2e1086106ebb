//! Short-lived cache of resolved URLs.
//!
//! Catalog URLs expire after a while and resolving them costs a rate-limited
//! catalog call. Entries are checked for expiry lazily on read; nothing is
//! swept in the background.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use url::Url;
use veil::Redact;

use crate::track::TrackId;

/// A playable URL for a track, valid until `valid_until`.
#[derive(Clone, PartialEq, Eq, Redact)]
pub struct ResolvedUri {
    pub track_id: TrackId,

    #[redact]
    pub uri: Url,

    pub content_length: Option<u64>,
    pub valid_until: Option<Instant>,
}

impl ResolvedUri {
    /// Whether the entry may still be used at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: Instant) -> bool {
        self.valid_until.is_none_or(|valid_until| now < valid_until)
    }

    /// Remaining validity, if the entry expires at all.
    #[must_use]
    pub fn time_to_live(&self) -> Option<Duration> {
        self.valid_until
            .map(|valid_until| valid_until.saturating_duration_since(Instant::now()))
    }
}

/// At most one entry per track; pushing again supersedes.
///
/// Not synchronized: the engine keeps it behind a mutex.
#[derive(Debug, Default)]
pub struct ResolvedUriCache {
    entries: HashMap<TrackId, ResolvedUri>,
}

impl ResolvedUriCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        track_id: TrackId,
        uri: Url,
        content_length: Option<u64>,
        valid_until: Option<Instant>,
    ) {
        self.entries.insert(
            track_id.clone(),
            ResolvedUri {
                track_id,
                uri,
                content_length,
                valid_until,
            },
        );
    }

    #[must_use]
    pub fn get(&self, track_id: &TrackId) -> Option<ResolvedUri> {
        self.get_at(track_id, Instant::now())
    }

    /// Looks up `track_id` as if the time were `now`.
    #[must_use]
    pub fn get_at(&self, track_id: &TrackId, now: Instant) -> Option<ResolvedUri> {
        self.entries
            .get(track_id)
            .filter(|entry| entry.is_valid_at(now))
            .cloned()
    }

    pub fn remove(&mut self, track_id: &TrackId) -> Option<ResolvedUri> {
        self.entries.remove(track_id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
