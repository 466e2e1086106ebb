//! Recovery from byte-range failures.

use async_trait::async_trait;

use crate::{
    error::{ErrorKind, Result},
    source::{DataSpec, Media, Source},
};

/// Retries a ranged request once without its range.
///
/// Some upstreams answer ranges they cannot serve with HTTP 416, or close the
/// connection before the window is complete. The full resource is fetched
/// instead and skipped to the requested position client-side, so these
/// errors never reach the caller from a ranged request.
#[derive(Debug)]
pub struct RangeNormalizer<S> {
    inner: S,
}

impl<S> RangeNormalizer<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> Source for RangeNormalizer<S>
where
    S: Source,
{
    async fn open(&self, spec: DataSpec) -> Result<Media> {
        match self.inner.open(spec.clone()).await {
            Err(e)
                if spec.ranged
                    && matches!(
                        e.kind,
                        ErrorKind::RangeNotSatisfiable | ErrorKind::UnexpectedEof
                    ) =>
            {
                warn!("{spec}: {e}; fetching without range");
                self.inner.open(spec.unranged()).await
            }
            result => result,
        }
    }
}
