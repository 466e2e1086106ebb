//! Last-resort fallback to the local library.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::{ErrorKind, Result},
    source::{upstream::LocalFiles, DataSpec, Media, Source},
    store::MetadataStore,
    track::{Locality, TrackId},
};

/// Opens a local file instead when everything else failed.
///
/// The library is searched for a title containing the failing catalog id.
/// This is a heuristic: substring containment against arbitrary titles can
/// match the wrong file.
// TODO: match on a stored catalog id instead of title containment once the
// library records one.
pub struct LocalFallback<S> {
    inner: S,
    store: Arc<dyn MetadataStore>,
    local: LocalFiles,
}

impl<S> LocalFallback<S> {
    #[must_use]
    pub fn new(inner: S, store: Arc<dyn MetadataStore>) -> Self {
        Self {
            inner,
            store,
            local: LocalFiles,
        }
    }
}

#[async_trait]
impl<S> Source for LocalFallback<S>
where
    S: Source,
{
    async fn open(&self, spec: DataSpec) -> Result<Media> {
        let err = match self.inner.open(spec.clone()).await {
            Ok(media) => return Ok(media),
            Err(e) => e,
        };

        let needle = match spec.key.locality() {
            Locality::Remote(id) | Locality::Downloaded(id) => id.to_owned(),
            Locality::Local(_) => return Err(err),
        };
        if err.kind == ErrorKind::Cancelled {
            return Err(err);
        }

        let file = match self.store.find_local_by_title_substring(&needle).await {
            Ok(Some(file)) => file,
            Ok(None) => return Err(err),
            Err(e) => {
                debug!("{}: library search failed: {e}", spec.key);
                return Err(err);
            }
        };

        warn!(
            "{}: {err}; falling back to local file {}",
            spec.key,
            file.path.display()
        );
        let mut local = spec.clone();
        local.key = TrackId::local(&file.path);
        local.uri = None;
        local.content_length = None;

        match self.local.open_path(&file.path, local).await {
            Ok(media) => Ok(media),
            Err(e) => {
                debug!("{}: local fallback failed: {e}", spec.key);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{atomic::Ordering, Arc};

    use super::*;
    use crate::{
        error::Error,
        source::retry::tests::Scripted,
        store::{LocalFile, MemoryStore},
    };

    #[tokio::test]
    async fn falls_back_to_a_title_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, b"local bytes").unwrap();

        let store = Arc::new(MemoryStore::new());
        store.add_local(LocalFile {
            path: path.clone(),
            title: "Live abc123".into(),
        });
        let fallback = LocalFallback::new(
            Scripted::new(vec![Error::unplayable("nope")]),
            store,
        );

        let media = fallback.open(DataSpec::new("abc123").at(6)).await.unwrap();
        assert_eq!(media.spec().key, TrackId::local(&path));
        assert_eq!(&media.bytes().await.unwrap()[..], b"bytes");
    }

    #[tokio::test]
    async fn original_error_when_nothing_matches() {
        let inner = Arc::new(Scripted::new(vec![Error::http_status(404, "gone")]));
        let fallback = LocalFallback::new(Arc::clone(&inner), Arc::new(MemoryStore::new()));

        let err = fallback.open(DataSpec::new("abc123")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::HttpStatus(404));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn original_error_when_the_match_cannot_be_opened() {
        let store = Arc::new(MemoryStore::new());
        store.add_local(LocalFile {
            path: "/nonexistent/abc123.mp3".into(),
            title: "abc123".into(),
        });
        let fallback = LocalFallback::new(
            Scripted::new(vec![Error::unplayable("nope")]),
            store,
        );

        let err = fallback.open(DataSpec::new("abc123")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unplayable);
    }
}
