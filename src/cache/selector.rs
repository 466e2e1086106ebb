//! Per-request choice between the disk cache and the upstream.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    cache::{CachePolicy, DiskCache},
    error::{ErrorKind, Result},
    source::{DataSpec, Media, Source},
};

/// Serves bounded requests from the disk cache when it holds them, and
/// writes bounded upstream responses through to it.
///
/// Unbounded requests, local tracks and requests made while caching is
/// paused go straight to the upstream. A cache that turns out to be
/// read-only is bypassed for that one request; cache failures never fail
/// a request the upstream can serve.
pub struct CacheSelector<U> {
    cache: Arc<dyn DiskCache>,
    upstream: U,
    policy: CachePolicy,
}

impl<U> CacheSelector<U> {
    #[must_use]
    pub fn new(cache: Arc<dyn DiskCache>, upstream: U, policy: CachePolicy) -> Self {
        Self {
            cache,
            upstream,
            policy,
        }
    }
}

#[async_trait]
impl<U> Source for CacheSelector<U>
where
    U: Source,
{
    async fn open(&self, spec: DataSpec) -> Result<Media> {
        let range = match spec.range() {
            Some(range) if range.length > 0 && self.policy.should_cache(&spec) => range,
            _ => return self.upstream.open(spec).await,
        };

        if self.cache.is_cached(&spec.key, range.start, range.length).await {
            match self.cache.read(&spec.key, range.start, range.length).await {
                Ok(bytes) => {
                    debug!("{spec}: served from cache");
                    return Ok(Media::buffered(spec, bytes));
                }
                Err(e) if e.kind == ErrorKind::ReadOnlyCache => {
                    warn!("{spec}: {e}; bypassing cache");
                    return self.upstream.open(spec).await;
                }
                Err(e) => debug!("{spec}: cache read failed: {e}"),
            }
        }

        let media = self.upstream.open(spec).await?;
        if media.len() != Some(range.length) {
            return Ok(media);
        }

        let spec = media.spec().clone();
        let bytes = media.bytes().await?;
        match self.cache.write(&spec.key, range.start, bytes.clone()).await {
            Ok(()) => debug!("{spec}: cached"),
            Err(e) if e.kind == ErrorKind::ReadOnlyCache => warn!("{spec}: not cached: {e}"),
            Err(e) => debug!("{spec}: not cached: {e}"),
        }

        Ok(Media::buffered(spec, bytes))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use bytes::Bytes;

    use super::*;
    use crate::{cache::tests::MemoryCache, source::retry::tests::Scripted, track::TrackId};

    fn bounded(key: &str) -> DataSpec {
        DataSpec::new(key).with_length(2)
    }

    #[tokio::test]
    async fn cached_ranges_skip_the_upstream() {
        let cache = Arc::new(MemoryCache::with_span("abc", 0, b"hi"));
        let upstream = Arc::new(Scripted::new(vec![]));
        let selector = CacheSelector::new(cache, Arc::clone(&upstream), CachePolicy::default());

        let media = selector.open(bounded("abc")).await.unwrap();
        assert_eq!(&media.bytes().await.unwrap()[..], b"hi");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upstream_windows_are_written_through() {
        let cache = Arc::new(MemoryCache::default());
        let upstream = Arc::new(Scripted::new(vec![]));
        let selector = CacheSelector::new(
            Arc::clone(&cache) as Arc<dyn DiskCache>,
            Arc::clone(&upstream),
            CachePolicy::default(),
        );

        selector.open(bounded("abc")).await.unwrap();
        assert!(cache.is_cached(&TrackId::from("abc"), 0, 2).await);

        selector.open(bounded("abc")).await.unwrap();
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn read_only_cache_falls_back_for_that_request() {
        let cache = Arc::new(MemoryCache::with_span("abc", 0, b"hi"));
        cache.read_only.store(true, Ordering::SeqCst);
        let upstream = Arc::new(Scripted::new(vec![]));
        let selector = CacheSelector::new(
            Arc::clone(&cache) as Arc<dyn DiskCache>,
            Arc::clone(&upstream),
            CachePolicy::default(),
        );

        let media = selector.open(bounded("abc")).await.unwrap();
        assert_eq!(&media.bytes().await.unwrap()[..], b"ok");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.reads.load(Ordering::SeqCst), 1);

        // The next request tries the cache again.
        selector.open(bounded("abc")).await.unwrap();
        assert_eq!(cache.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn paused_and_local_requests_bypass_the_cache() {
        let cache = Arc::new(MemoryCache::with_span("abc", 0, b"hi"));
        let upstream = Arc::new(Scripted::new(vec![]));
        let policy = CachePolicy::new(true);
        let selector = CacheSelector::new(
            Arc::clone(&cache) as Arc<dyn DiskCache>,
            Arc::clone(&upstream),
            policy.clone(),
        );

        selector.open(bounded("abc")).await.unwrap();
        policy.set_paused(false);
        selector
            .open(DataSpec::new(TrackId::local("/a.mp3")).with_length(2))
            .await
            .unwrap();

        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.reads.load(Ordering::SeqCst), 0);
        assert_eq!(cache.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn read_only_writes_still_return_the_bytes() {
        let cache = Arc::new(MemoryCache::default());
        cache.read_only.store(true, Ordering::SeqCst);
        let selector = CacheSelector::new(
            Arc::clone(&cache) as Arc<dyn DiskCache>,
            Scripted::new(vec![]),
            CachePolicy::default(),
        );

        let media = selector.open(bounded("abc")).await.unwrap();
        assert_eq!(media.bytes().await.unwrap(), Bytes::from_static(b"ok"));
        assert_eq!(cache.writes.load(Ordering::SeqCst), 1);
    }
}
