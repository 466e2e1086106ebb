//! Events emitted while recovering from playback errors.
//!
//! These events can be used to:
//! * Show that playback is stalled and being recovered
//! * Tell the user a track failed after all retries
//! * Notify that the queue advanced past a failed track
//!
//! # Example
//!
//! ```rust
//! use relayer::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::PlaybackFailed { .. } => eprintln!("{event}"),
//!         Event::SkippedDueToError { track } => println!("skipped {track}"),
//!         _ => (),
//!     }
//! }
//! ```

use std::fmt;

use crate::track::TrackId;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// A retry of the track started.
    Recovering { track: TrackId, attempt: u8 },

    /// Retrying is on hold until the network is back.
    WaitingForNetwork { track: TrackId },

    /// Playback resumed after a retry.
    Recovered { track: TrackId },

    /// Playback of the track failed for good.
    ///
    /// `attempts` is the number of retries that were exhausted, zero for
    /// errors that are not retried.
    PlaybackFailed {
        track: TrackId,
        class: &'static str,
        attempts: u8,
    },

    /// The queue advanced past a failed track.
    SkippedDueToError { track: TrackId },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recovering { track, attempt } => {
                write!(f, "recovering {track} (attempt {attempt})")
            }
            Self::WaitingForNetwork { track } => write!(f, "waiting for network to play {track}"),
            Self::Recovered { track } => write!(f, "recovered {track}"),
            Self::PlaybackFailed {
                track,
                class,
                attempts: 0,
            } => write!(f, "playback of {track} failed: {class}"),
            Self::PlaybackFailed {
                track,
                class,
                attempts,
            } => write!(
                f,
                "playback of {track} failed: {class} ({attempts} attempts exhausted)"
            ),
            Self::SkippedDueToError { track } => write!(f, "skipped {track} due to an error"),
        }
    }
}
