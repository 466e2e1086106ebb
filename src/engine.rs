//! The assembled media engine.
//!
//! The [`Engine`] owns all shared state: the resolved URL cache, the cache
//! policy and the eviction state. It stacks the source layers in their fixed
//! order and exposes the one entry point hosts need, [`Engine::open`].

use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    cache::{
        CachePolicy, CacheSelector, DiskCache, ResolvedUriCache, TemporalCacheState,
        TemporalEvictionPolicy,
    },
    config::Config,
    error::{Error, Result},
    http,
    provider::{CatalogProvider, HttpCatalog},
    source::{
        fallback::LocalFallback,
        range::RangeNormalizer,
        resolver::{Resolver, Resolving},
        retry::Retry,
        unknown::UnknownErrors,
        upstream::HttpUpstream,
        ChunkedRangeSource, DataSpec, Media, Source,
    },
    store::MetadataStore,
    track::TrackId,
};

/// The source layers, outermost first.
pub type Chain<U> =
    LocalFallback<RangeNormalizer<Retry<Retry<UnknownErrors<Resolving<U>>>>>>;

pub struct Engine {
    chain: Chain<Arc<dyn Source>>,
    uris: Arc<Mutex<ResolvedUriCache>>,
    policy: CachePolicy,
    eviction: TemporalEvictionPolicy,
}

impl Engine {
    /// Builds an engine fetching bytes through `upstream`.
    #[must_use]
    pub fn new(
        config: &Config,
        provider: Arc<dyn CatalogProvider>,
        store: Arc<dyn MetadataStore>,
        cache: Arc<dyn DiskCache>,
        upstream: Arc<dyn Source>,
    ) -> Self {
        let uris = Arc::new(Mutex::new(ResolvedUriCache::new()));
        let policy = CachePolicy::new(config.pause_cache);

        let resolver = Resolver::new(
            provider,
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&uris),
            ChunkedRangeSource::new(config.chunk_length),
            policy.clone(),
        );
        let selector = CacheSelector::new(Arc::clone(&cache), upstream, policy.clone());
        let resolving = Resolving::new(resolver, selector, Arc::clone(&store));

        let unknown = UnknownErrors::new(resolving, Arc::clone(&uris));
        let unplayable = Retry::unplayable(
            unknown,
            config.unplayable_retries,
            config.backoff.clone(),
        );

        // A refused URL may have been revoked; resolve it again.
        let evict = Arc::clone(&uris);
        let forbidden = Retry::forbidden(
            unplayable,
            config.forbidden_retries,
            config.backoff.clone(),
        )
        .on_retry(move |spec, _| {
            evict
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&spec.key);
        });

        let chain = LocalFallback::new(RangeNormalizer::new(forbidden), store);

        Self {
            chain,
            uris,
            policy,
            eviction: TemporalEvictionPolicy::new(cache),
        }
    }

    /// Builds an engine talking to the HTTP catalog at `config.catalog_url`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` without a catalog URL, or if the HTTP client
    /// cannot be built.
    pub fn with_http(
        config: &Config,
        store: Arc<dyn MetadataStore>,
        cache: Arc<dyn DiskCache>,
    ) -> Result<Self> {
        let catalog_url = config
            .catalog_url
            .clone()
            .ok_or_else(|| Error::invalid_argument("no catalog url configured"))?;

        let client = Arc::new(http::Client::new(config)?);
        let provider = Arc::new(HttpCatalog::new(catalog_url, Arc::clone(&client)));
        let upstream = Arc::new(HttpUpstream::new(client));

        Ok(Self::new(config, provider, store, cache, upstream))
    }

    /// Opens the next window of `spec`.
    ///
    /// Returns only once the bytes are ready to be read, or with a classified
    /// error.
    ///
    /// # Errors
    ///
    /// Returns the error of the innermost failing layer once every retry and
    /// fallback is exhausted.
    pub async fn open(&self, spec: DataSpec) -> Result<Media> {
        self.chain.open(spec).await
    }

    /// Tells the engine which tracks are playing and up next.
    ///
    /// Evicts every other remote track from the disk cache and returns the
    /// evicted ids.
    pub async fn on_transition(
        &self,
        current: Option<TrackId>,
        next: Option<TrackId>,
    ) -> Vec<TrackId> {
        self.eviction.update_current_and_next(current, next).await
    }

    pub fn set_cache_paused(&self, paused: bool) {
        if paused != self.policy.is_paused() {
            info!("disk cache {}", if paused { "paused" } else { "resumed" });
        }
        self.policy.set_paused(paused);
    }

    #[must_use]
    pub fn cache_state(&self) -> TemporalCacheState {
        self.eviction.state()
    }

    /// Evicts everything tracked and forgets all resolved URLs.
    pub async fn shutdown(&self) {
        let evicted = self.eviction.clear_all().await;
        self.uris
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("shut down; evicted {} tracks", evicted.len());
    }
}
