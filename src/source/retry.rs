//! Bounded, predicate-driven retries.
//!
//! A [`Retry`] re-opens its inner source while the error matches its
//! predicate, sleeping between attempts. Errors that do not match are
//! returned at once. After `max_retries` retries the last error is returned
//! as is.

use std::{fmt, iter, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};

use crate::{
    error::{Error, Result},
    source::{DataSpec, Media, Source},
};

/// Delay policy between retries.
///
/// Delays are capped: exponential growth never exceeds `max`.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum Backoff {
    Fixed {
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        delay: Duration,
    },
    Exponential {
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        min: Duration,
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        max: Duration,
    },
}

impl Backoff {
    /// The delays before each of `retries` retries.
    #[must_use]
    pub fn delays(&self, retries: u32) -> Vec<Duration> {
        let count = usize::try_from(retries).unwrap_or(usize::MAX);
        match *self {
            Self::Fixed { delay } => vec![delay; count],
            Self::Exponential { min, max } => {
                let max = max.max(min);
                let backoff =
                    exponential_backoff::Backoff::new(retries.saturating_add(1), min, max);

                // The last attempt yields no delay; keep to the cap instead.
                (&backoff)
                    .into_iter()
                    .map(|delay| delay.unwrap_or(max).min(max))
                    .chain(iter::repeat(max))
                    .take(count)
                    .collect()
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            min: Duration::from_millis(500),
            max: Duration::from_secs(5),
        }
    }
}

type RetryHook = Box<dyn Fn(&DataSpec, &Error) + Send + Sync>;

/// Retries the inner source on errors matching `predicate`.
pub struct Retry<S> {
    inner: S,
    name: &'static str,
    predicate: fn(&Error) -> bool,
    max_retries: u32,
    backoff: Backoff,
    on_retry: Option<RetryHook>,
}

impl<S> Retry<S> {
    #[must_use]
    pub fn new(
        inner: S,
        name: &'static str,
        predicate: fn(&Error) -> bool,
        max_retries: u32,
        backoff: Backoff,
    ) -> Self {
        Self {
            inner,
            name,
            predicate,
            max_retries,
            backoff,
            on_retry: None,
        }
    }

    /// Retries errors of kind `Unplayable`.
    #[must_use]
    pub fn unplayable(inner: S, max_retries: u32, backoff: Backoff) -> Self {
        Self::new(
            inner,
            "unplayable",
            |e| e.kind == crate::error::ErrorKind::Unplayable,
            max_retries,
            backoff,
        )
    }

    /// Retries HTTP 403 and the catalog's equivalent refusals.
    #[must_use]
    pub fn forbidden(inner: S, max_retries: u32, backoff: Backoff) -> Self {
        Self::new(inner, "forbidden", Error::is_forbidden, max_retries, backoff)
    }

    /// Runs `hook` before sleeping for each retry.
    #[must_use]
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DataSpec, &Error) + Send + Sync + 'static,
    {
        self.on_retry = Some(Box::new(hook));
        self
    }
}

#[async_trait]
impl<S> Source for Retry<S>
where
    S: Source,
{
    async fn open(&self, spec: DataSpec) -> Result<Media> {
        let delays = self.backoff.delays(self.max_retries);
        let mut attempt = 0;

        loop {
            let err = match self.inner.open(spec.clone()).await {
                Ok(media) => return Ok(media),
                Err(e) => e,
            };

            let Some(delay) = delays.get(attempt).copied() else {
                return Err(err);
            };
            if !(self.predicate)(&err) {
                return Err(err);
            }

            attempt += 1;
            warn!(
                "{} retry {attempt}/{} for {spec} in {}ms: {err}",
                self.name,
                self.max_retries,
                delay.as_millis()
            );

            if let Some(hook) = &self.on_retry {
                hook(&spec, &err);
            }
            tokio::time::sleep(delay).await;
        }
    }
}

impl<S> fmt::Debug for Retry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
