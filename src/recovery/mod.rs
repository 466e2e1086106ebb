//! Playback-level recovery from errors.
//!
//! Sits above the byte sources: by the time a playback error arrives here,
//! the sources have already exhausted their own retries. The recovery state
//! machine decides whether to retry playback of the track, wait for the
//! network to come back, or give up and move on:
//!
//! ```text
//! Playing ── error ──> ErrorObserved ──> Retrying(n) ──> Playing
//!                            │    └────> WaitingForNetwork ──> Retrying(n)
//!                            └─────────────────────────────────> GivenUp
//! ```
//!
//! Attempt 1 pauses briefly and resumes. Attempt 2 re-prepares the player
//! before resuming. Errors beyond the attempt cap, and errors that are not
//! retryable at all, give up: the failure is reported and the queue skips
//! ahead if allowed.
//!
//! At most one recovery job runs at a time. A new error or a media
//! transition cancels the running job; cancellation is checked between
//! steps, never in the middle of one.

pub mod classify;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::RecoveryConfig,
    connectivity::ConnectivityOracle,
    error::{Error, Result},
    events::Event,
    track::TrackId,
};

pub use classify::{Classification, Classifier};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RecoveryState {
    Playing,
    ErrorObserved,
    Retrying(u8),
    WaitingForNetwork,
    GivenUp,
}

/// Control over the host's player.
#[async_trait]
pub trait Playback: Send + Sync {
    async fn pause(&self);

    async fn resume(&self);

    /// Rebuilds the decoder and reopens the current track at its position.
    async fn reprepare(&self) -> Result<()>;

    /// Whether the queue holds an item after the current one.
    fn has_next(&self) -> bool;

    async fn skip_to_next(&self);

    async fn stop(&self);
}

/// Playback-level attempts made for one track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryState {
    pub track_id: TrackId,
    pub attempts: u8,
    pub last_error_class: &'static str,
}

/// Retry states of the most recently failing tracks.
#[derive(Debug)]
struct RetryStates {
    capacity: usize,
    entries: VecDeque<RetryState>,
}

impl RetryStates {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Counts an attempt for `track` and returns the attempt number.
    fn record(&mut self, track: &TrackId, class: &'static str) -> u8 {
        let mut state = self
            .entries
            .iter()
            .position(|state| state.track_id == *track)
            .and_then(|index| self.entries.remove(index))
            .unwrap_or_else(|| RetryState {
                track_id: track.clone(),
                attempts: 0,
                last_error_class: class,
            });

        state.attempts = state.attempts.saturating_add(1);
        state.last_error_class = class;
        let attempts = state.attempts;

        self.entries.push_back(state);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }

        attempts
    }

    fn get(&self, track: &TrackId) -> Option<&RetryState> {
        self.entries.iter().find(|state| state.track_id == *track)
    }

    fn remove(&mut self, track: &TrackId) {
        self.entries.retain(|state| state.track_id != *track);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Action {
    Retry(u8),
    GiveUp { attempts: u8 },
}

enum NetworkWait {
    Available,
    TimedOut,
    Cancelled,
}

struct Job {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Tracking {
    current: Option<TrackId>,
    job: Option<Job>,

    /// Handle of the last cancelled job, awaited by the next one.
    cancelled: Option<JoinHandle<()>>,
}

impl Tracking {
    /// Cancels the job in flight, if any. False if there was none.
    fn cancel_job(&mut self) -> bool {
        let Some(mut job) = self.job.take() else {
            return false;
        };
        job.token.cancel();
        if let Some(handle) = job.handle.take() {
            self.cancelled = Some(handle);
        }
        true
    }
}

struct Shared {
    config: RecoveryConfig,
    classifier: Classifier,
    playback: Arc<dyn Playback>,
    connectivity: Arc<dyn ConnectivityOracle>,
    events: Option<mpsc::UnboundedSender<Event>>,
    state: watch::Sender<RecoveryState>,
    retries: Mutex<RetryStates>,
}

pub struct Recovery {
    shared: Arc<Shared>,
    tracking: Mutex<Tracking>,
}

impl Recovery {
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the transient message markers do not
    /// compile.
    pub fn new(
        config: RecoveryConfig,
        playback: Arc<dyn Playback>,
        connectivity: Arc<dyn ConnectivityOracle>,
        events: Option<mpsc::UnboundedSender<Event>>,
    ) -> Result<Self> {
        let classifier = Classifier::new(&config)?;
        let retries = Mutex::new(RetryStates::new(config.retry_history));
        let (state, _) = watch::channel(RecoveryState::Playing);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                classifier,
                playback,
                connectivity,
                events,
                state,
                retries,
            }),
            tracking: Mutex::new(Tracking::default()),
        })
    }

    #[must_use]
    pub fn state(&self) -> RecoveryState {
        *self.shared.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RecoveryState> {
        self.shared.state.subscribe()
    }

    #[must_use]
    pub fn retry_state(&self, track: &TrackId) -> Option<RetryState> {
        self.shared.retries().get(track).cloned()
    }

    /// Number of tracks with remembered attempts.
    #[must_use]
    pub fn retry_states(&self) -> usize {
        self.shared.retries().entries.len()
    }

    /// Handles an error reported by the player for `track`.
    ///
    /// Cancels any recovery in flight and starts a new one, which runs in the
    /// background. Must be called from within a Tokio runtime.
    pub fn on_playback_error(&self, track: &TrackId, error: &Error) -> Classification {
        let classification = self.shared.classifier.classify(error);
        self.shared.set_state(RecoveryState::ErrorObserved);

        let action = if classification.retryable {
            let attempt = self.shared.retries().record(track, classification.class);
            if attempt > self.shared.config.max_attempts {
                Action::GiveUp {
                    attempts: self.shared.config.max_attempts,
                }
            } else {
                Action::Retry(attempt)
            }
        } else {
            Action::GiveUp { attempts: 0 }
        };

        match action {
            Action::Retry(attempt) => {
                warn!("{track}: {error}; retrying playback (attempt {attempt})");
            }
            Action::GiveUp { .. } => warn!("{track}: {error}; not retrying"),
        }

        let mut tracking = self.tracking();
        tracking.cancel_job();
        let previous = tracking.cancelled.take();
        tracking.current = Some(track.clone());

        let token = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let job_token = token.clone();
        let track = track.clone();
        let handle = tokio::spawn(async move {
            // Strictly one job at a time: let the cancelled one wind down.
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            shared.run(&track, action, classification, &job_token).await;
        });

        tracking.job = Some(Job {
            token,
            handle: Some(handle),
        });

        classification
    }

    /// Handles the player moving to `track`, or to nothing.
    ///
    /// Cancels any recovery in flight and forgets the attempts made for the
    /// track that was left.
    pub fn on_media_transition(&self, track: Option<&TrackId>) {
        let mut tracking = self.tracking();
        if tracking.cancel_job() {
            debug!("media transition: cancelling recovery");
        }

        let previous = std::mem::replace(&mut tracking.current, track.cloned());
        drop(tracking);

        if let Some(previous) = previous.filter(|previous| Some(previous) != track) {
            self.shared.retries().remove(&previous);
        }
        self.shared.set_state(RecoveryState::Playing);
    }

    /// Cancels any recovery in flight.
    pub fn cancel(&self) {
        self.tracking().cancel_job();
    }

    /// Waits until the recovery in flight, or the one last cancelled, has
    /// finished.
    pub async fn settle(&self) {
        let handle = {
            let mut tracking = self.tracking();
            match tracking.job.as_mut().and_then(|job| job.handle.take()) {
                Some(handle) => Some(handle),
                None => tracking.cancelled.take(),
            }
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("recovery job failed: {e}");
            }
        }
    }

    fn tracking(&self) -> MutexGuard<'_, Tracking> {
        self.tracking.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Shared {
    fn retries(&self) -> MutexGuard<'_, RetryStates> {
        self.retries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: RecoveryState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("recovery: {previous:?} -> {state:?}");
        }
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    async fn run(
        &self,
        track: &TrackId,
        action: Action,
        classification: Classification,
        token: &CancellationToken,
    ) {
        if token.is_cancelled() {
            return;
        }

        match action {
            Action::Retry(attempt) => {
                self.retry(track, attempt, classification.class, token)
                    .await;
            }
            Action::GiveUp { attempts } => {
                self.give_up(track, classification.class, attempts, token)
                    .await;
            }
        }
    }

    async fn retry(
        &self,
        track: &TrackId,
        attempt: u8,
        class: &'static str,
        token: &CancellationToken,
    ) {
        if !self.connectivity.is_network_available().await {
            if token.is_cancelled() {
                return;
            }
            self.set_state(RecoveryState::WaitingForNetwork);
            self.emit(Event::WaitingForNetwork {
                track: track.clone(),
            });

            match self.wait_for_network(token).await {
                NetworkWait::Available => info!("network is back; retrying {track}"),
                NetworkWait::Cancelled => return,
                NetworkWait::TimedOut => {
                    warn!("{track}: network did not come back");
                    return self.give_up(track, class, attempt, token).await;
                }
            }
        }

        if token.is_cancelled() {
            return;
        }
        self.set_state(RecoveryState::Retrying(attempt));
        self.emit(Event::Recovering {
            track: track.clone(),
            attempt,
        });

        // Paused from here on: every way out resumes or gives up.
        self.playback.pause().await;

        let delay = if attempt <= 1 {
            self.config.fast_retry_delay
        } else {
            if token.is_cancelled() {
                return self.resume_cancelled(track).await;
            }
            if let Err(e) = self.playback.reprepare().await {
                warn!("{track}: failed to re-prepare: {e}");
                if token.is_cancelled() {
                    return self.resume_cancelled(track).await;
                }
                return self.give_up(track, class, attempt, token).await;
            }
            self.config.retry_delay
        };

        if !sleep_unless_cancelled(delay, token).await {
            return self.resume_cancelled(track).await;
        }

        self.playback.resume().await;
        self.set_state(RecoveryState::Playing);
        self.emit(Event::Recovered {
            track: track.clone(),
        });
        info!("{track}: playback resumed");
    }

    /// Undoes the pause of a retry that was cancelled midway.
    async fn resume_cancelled(&self, track: &TrackId) {
        debug!("{track}: recovery cancelled; resuming");
        self.playback.resume().await;
    }

    async fn wait_for_network(&self, token: &CancellationToken) -> NetworkWait {
        let deadline = Instant::now() + self.config.network_wait_ceiling();

        loop {
            if !sleep_unless_cancelled(self.config.network_poll_interval, token).await {
                return NetworkWait::Cancelled;
            }
            if self.connectivity.is_network_available().await {
                return NetworkWait::Available;
            }
            if Instant::now() >= deadline {
                return NetworkWait::TimedOut;
            }
        }
    }

    async fn give_up(
        &self,
        track: &TrackId,
        class: &'static str,
        attempts: u8,
        token: &CancellationToken,
    ) {
        if token.is_cancelled() {
            return;
        }

        self.set_state(RecoveryState::GivenUp);
        self.retries().remove(track);

        error!("{track}: playback failed ({class}) after {attempts} attempts");
        self.emit(Event::PlaybackFailed {
            track: track.clone(),
            class,
            attempts,
        });

        if self.config.skip_on_error && self.playback.has_next() {
            self.playback.skip_to_next().await;
            self.emit(Event::SkippedDueToError {
                track: track.clone(),
            });
        } else {
            self.playback.stop().await;
        }
    }
}

/// Sleeps for `delay`; false if cancelled first.
async fn sleep_unless_cancelled(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        () = token.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
