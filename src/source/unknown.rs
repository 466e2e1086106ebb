//! Wrapping of unclassified errors.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{
    cache::ResolvedUriCache,
    error::{Error, ErrorKind, Result},
    source::{DataSpec, Media, Source},
};

/// Turns errors outside the domain taxonomy into `Unknown`.
///
/// The cause of such an error cannot be told apart from a poisoned URL
/// cache, so every resolved URL is dropped before the error is returned.
#[derive(Debug)]
pub struct UnknownErrors<S> {
    inner: S,
    uris: Arc<Mutex<ResolvedUriCache>>,
}

impl<S> UnknownErrors<S> {
    #[must_use]
    pub fn new(inner: S, uris: Arc<Mutex<ResolvedUriCache>>) -> Self {
        Self { inner, uris }
    }

    fn clear_uris(&self) {
        match self.uris.lock() {
            Ok(mut uris) => uris.clear(),
            Err(e) => error!("resolved uri cache poisoned: {e}"),
        }
    }
}

#[async_trait]
impl<S> Source for UnknownErrors<S>
where
    S: Source,
{
    async fn open(&self, spec: DataSpec) -> Result<Media> {
        match self.inner.open(spec.clone()).await {
            Err(e) if e.kind == ErrorKind::Unknown => {
                warn!("{spec}: {e}; clearing resolved uris");
                self.clear_uris();
                Err(e)
            }
            Err(e) if !e.kind.is_recognized() => {
                warn!("{spec}: unclassified {e}; clearing resolved uris");
                self.clear_uris();
                Err(Error::unknown(e))
            }
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{source::retry::tests::Scripted, track::TrackId};

    fn filled() -> Arc<Mutex<ResolvedUriCache>> {
        let mut cache = ResolvedUriCache::new();
        cache.push(
            TrackId::from("abc"),
            "https://cdn.example.com/abc".parse().unwrap(),
            None,
            Some(Instant::now() + std::time::Duration::from_secs(60)),
        );
        Arc::new(Mutex::new(cache))
    }

    #[tokio::test]
    async fn unclassified_errors_become_unknown_and_clear_the_cache() {
        let uris = filled();
        let source = UnknownErrors::new(
            Scripted::new(vec![Error::internal("socket exploded")]),
            Arc::clone(&uris),
        );

        let err = source.open(DataSpec::new("abc")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(err.to_string().contains("socket exploded"));
        assert!(uris.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn domain_errors_keep_the_cache() {
        let uris = filled();
        let source = UnknownErrors::new(
            Scripted::new(vec![Error::unplayable("nope")]),
            Arc::clone(&uris),
        );

        let err = source.open(DataSpec::new("abc")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unplayable);
        assert_eq!(uris.lock().unwrap().len(), 1);
    }
}
