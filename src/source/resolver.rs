//! Resolution of track ids into fetchable, time-bounded URLs.
//!
//! The [`Resolver`] avoids the catalog whenever it can: a window already on
//! disk needs no URL at all, and a URL resolved earlier is reused until it
//! expires. Only then is the catalog asked, its answer validated, the best
//! audio-only format chosen and its URL cached.
//!
//! [`Resolving`] is the innermost [`Source`] of the chain. It routes local
//! and downloaded tracks to disk and everything else through the resolver
//! into the [`CacheSelector`].

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use async_trait::async_trait;
use url::Url;

use crate::{
    cache::{CachePolicy, CacheSelector, DiskCache, ResolvedUri, ResolvedUriCache},
    error::{Error, ErrorKind, Result},
    protocol::catalog::Status,
    provider::CatalogProvider,
    source::{upstream::LocalFiles, ChunkedRangeSource, DataSpec, Media, Source, Window},
    store::{FormatRecord, MetadataStore},
    track::{Locality, TrackId},
};

pub struct Resolver {
    provider: Arc<dyn CatalogProvider>,
    store: Arc<dyn MetadataStore>,
    cache: Arc<dyn DiskCache>,
    uris: Arc<Mutex<ResolvedUriCache>>,
    chunks: ChunkedRangeSource,
    policy: CachePolicy,
}

impl Resolver {
    #[must_use]
    pub fn new(
        provider: Arc<dyn CatalogProvider>,
        store: Arc<dyn MetadataStore>,
        cache: Arc<dyn DiskCache>,
        uris: Arc<Mutex<ResolvedUriCache>>,
        chunks: ChunkedRangeSource,
        policy: CachePolicy,
    ) -> Self {
        Self {
            provider,
            store,
            cache,
            uris,
            chunks,
            policy,
        }
    }

    /// Turns `spec` into the request for its next window.
    ///
    /// When `use_disk_cache` is set and the window is already on disk, the
    /// returned request carries no URL. Otherwise it carries the resolved
    /// URL and is bounded to the window.
    ///
    /// # Errors
    ///
    /// Returns the classified error of the catalog, or `RangeNotSatisfiable`
    /// if the position lies beyond the content.
    pub async fn resolve(&self, spec: DataSpec, use_disk_cache: bool) -> Result<DataSpec> {
        let cached_uri = self.cached_uri(&spec.key)?;
        let content_length = spec
            .content_length
            .or_else(|| cached_uri.as_ref().and_then(|entry| entry.content_length));

        if use_disk_cache && spec.ranged && self.policy.should_cache(&spec) {
            if let Some(length) = self.cached_window(&spec, content_length).await {
                debug!("{}: window on disk, not resolving", spec.key);
                let mut spec = spec;
                spec.length = Some(length);
                spec.content_length = content_length;
                return Ok(spec);
            }
        }

        let (uri, content_length) = match cached_uri {
            Some(entry) => {
                match entry.time_to_live() {
                    Some(ttl) => trace!("{}: reusing resolved uri for {ttl:?}", spec.key),
                    None => trace!("{}: reusing resolved uri", spec.key),
                }
                (entry.uri, content_length)
            }
            None => self.resolve_uri(&spec.key).await?,
        };

        self.chunks.apply(spec.with_uri(uri), content_length)
    }

    fn cached_uri(&self, id: &TrackId) -> Result<Option<ResolvedUri>> {
        Ok(self.uris.lock()?.get(id))
    }

    /// Length of the window at the position of `spec`, if it is on disk.
    async fn cached_window(&self, spec: &DataSpec, content_length: Option<u64>) -> Option<u64> {
        let chunk_length = self.chunks.chunk_length();
        let length = match self
            .chunks
            .window(spec.position, spec.length, content_length)
            .ok()?
        {
            Window::Range(range) => range.length,
            Window::Full => spec.length.unwrap_or(chunk_length).min(chunk_length),
            Window::End => return None,
        };

        if length > 0 && self.cache.is_cached(&spec.key, spec.position, length).await {
            Some(length)
        } else {
            None
        }
    }

    async fn resolve_uri(&self, id: &TrackId) -> Result<(Url, Option<u64>)> {
        let info = self.provider.playable_info(id).await?;

        if info.reported_id != *id {
            return Err(Error::identity_mismatch(format!(
                "requested {id}, catalog answered for {}",
                info.reported_id
            )));
        }

        match &info.status {
            Status::Ok => {}
            Status::Unplayable => {
                return Err(Error::unplayable(format!("{id} is not playable")));
            }
            Status::LoginRequired => {
                return Err(Error::login_required(format!("{id} requires a login")));
            }
            Status::Other(status) => return Err(Error::remote_status(status.clone())),
        }

        let format = info
            .best_audio_format()
            .ok_or_else(|| Error::format_not_found(format!("{id} has no audio-only format")))?;

        let record = FormatRecord {
            track_id: id.clone(),
            bitrate: format.bitrate,
            mime_type: format.mime_type.clone(),
            content_length: format.content_length,
            loudness: info.loudness,
        };
        if let Err(e) = self.store.put_format(record).await {
            warn!("{id}: failed to persist format: {e}");
        }

        let uri = self
            .provider
            .materialize_url(&info, format)
            .await
            .map_err(|e| match e.kind {
                ErrorKind::RestrictedContent => e,
                _ => Error::restricted_content(e),
            })?;

        let valid_until = format
            .expires_in
            .or(info.ttl)
            .and_then(|ttl| Instant::now().checked_add(ttl));
        self.uris
            .lock()?
            .push(id.clone(), uri.clone(), format.content_length, valid_until);

        info!(
            "{id}: resolved {} at {} kbps",
            format.mime_type,
            format.bitrate / 1000
        );
        Ok((uri, format.content_length))
    }
}

/// Opens tracks by where they live.
///
/// Local tracks are read from disk directly. Downloaded tracks open the file
/// recorded in the metadata store. Remote tracks are resolved and served by
/// the cache selector.
pub struct Resolving<U> {
    resolver: Resolver,
    selector: CacheSelector<U>,
    store: Arc<dyn MetadataStore>,
    local: LocalFiles,
}

impl<U> Resolving<U> {
    #[must_use]
    pub fn new(
        resolver: Resolver,
        selector: CacheSelector<U>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            resolver,
            selector,
            store,
            local: LocalFiles,
        }
    }
}

#[async_trait]
impl<U> Source for Resolving<U>
where
    U: Source,
{
    async fn open(&self, spec: DataSpec) -> Result<Media> {
        let download = match spec.key.locality() {
            Locality::Local(_) => return self.local.open(spec).await,
            Locality::Downloaded(id) => Some(id.to_owned()),
            Locality::Remote(_) => None,
        };

        if let Some(id) = download {
            let Some(path) = self.store.download_path(&id).await? else {
                return Err(Error::not_found(format!("no download recorded for {id}")));
            };
            return self.local.open_path(&path, spec).await;
        }

        let request = self.resolver.resolve(spec.clone(), true).await?;
        if request.uri.is_some() {
            return self.selector.open(request).await;
        }

        // Served from disk without a URL; resolve if the copy is unusable.
        match self.selector.open(request).await {
            Ok(media) => Ok(media),
            Err(e) => {
                debug!("{spec}: cached window unusable ({e}); resolving");
                let request = self.resolver.resolve(spec, false).await?;
                self.selector.open(request).await
            }
        }
    }
}
