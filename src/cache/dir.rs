//! Directory-backed byte cache.
//!
//! Layout: one subdirectory per key, named by the hex encoding of the key,
//! holding one file per cached span, named by its start offset:
//!
//! ```text
//! <root>/616263/00000000000000000000.bin
//! <root>/616263/00000000000000524288.bin
//! ```
//!
//! Spans are written to a temporary file first and renamed into place, so a
//! reader never sees a partial span.

use std::{
    io::{self, SeekFrom},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt},
};

use crate::{
    cache::DiskCache,
    error::{Error, Result},
    track::TrackId,
};

#[derive(Debug)]
pub struct DirCache {
    root: PathBuf,
    temp_counter: AtomicU64,
}

/// A cached span: start offset and length.
type Span = (u64, u64);

impl DirCache {
    const SPAN_EXTENSION: &'static str = "bin";

    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_counter: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key: &TrackId) -> PathBuf {
        let name: String = key
            .as_str()
            .bytes()
            .map(|byte| format!("{byte:02x}"))
            .collect();
        self.root.join(name)
    }

    fn span_path(dir: &Path, start: u64) -> PathBuf {
        dir.join(format!("{start:020}.{}", Self::SPAN_EXTENSION))
    }

    async fn spans(&self, key: &TrackId) -> Result<Vec<Span>> {
        let mut entries = match fs::read_dir(self.key_dir(key)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(cache_error(e)),
        };

        let mut spans = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(cache_error)? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(Self::SPAN_EXTENSION) {
                continue;
            }
            let Some(start) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse().ok())
            else {
                continue;
            };
            let length = entry.metadata().await.map_err(cache_error)?.len();
            spans.push((start, length));
        }

        Ok(spans)
    }

    async fn covering_span(
        &self,
        key: &TrackId,
        position: u64,
        length: u64,
    ) -> Result<Option<Span>> {
        let end = position.saturating_add(length);
        let spans = self.spans(key).await?;
        Ok(spans
            .into_iter()
            .find(|&(start, len)| start <= position && end <= start.saturating_add(len)))
    }
}

/// Maps I/O errors of the cache directory.
///
/// Permission problems are reported as a read-only cache so callers can
/// bypass the cache instead of failing.
fn cache_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
            Error::read_only_cache(e)
        }
        _ => e.into(),
    }
}

#[async_trait]
impl DiskCache for DirCache {
    async fn is_cached(&self, key: &TrackId, position: u64, length: u64) -> bool {
        matches!(self.covering_span(key, position, length).await, Ok(Some(_)))
    }

    async fn read(&self, key: &TrackId, position: u64, length: u64) -> Result<Bytes> {
        let Some((start, _)) = self.covering_span(key, position, length).await? else {
            return Err(Error::not_found(format!(
                "{key} [{position}..{}] not cached",
                position.saturating_add(length)
            )));
        };

        let path = Self::span_path(&self.key_dir(key), start);
        let mut file = fs::File::open(&path).await.map_err(cache_error)?;
        file.seek(SeekFrom::Start(position - start))
            .await
            .map_err(cache_error)?;

        let length_bytes = usize::try_from(length)
            .map_err(|_| Error::invalid_argument(format!("{length} bytes do not fit in memory")))?;
        let mut buffer = vec![0; length_bytes];
        file.read_exact(&mut buffer).await.map_err(cache_error)?;

        trace!("cache read {key} [{position}..{}]", position + length);
        Ok(Bytes::from(buffer))
    }

    async fn write(&self, key: &TrackId, position: u64, data: Bytes) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let dir = self.key_dir(key);
        fs::create_dir_all(&dir).await.map_err(cache_error)?;

        let temp = dir.join(format!(
            ".{position}.{}.tmp",
            self.temp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(e) = fs::write(&temp, &data).await {
            let _ = fs::remove_file(&temp).await;
            return Err(cache_error(e));
        }
        fs::rename(&temp, Self::span_path(&dir, position))
            .await
            .map_err(cache_error)?;

        trace!("cache write {key} [{position}..{}]", position + data.len() as u64);
        Ok(())
    }

    async fn remove_resource(&self, key: &TrackId) -> Result<()> {
        match fs::remove_dir_all(self.key_dir(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(cache_error(e)),
        }
    }

    async fn space_used(&self) -> u64 {
        let mut used = 0;
        let Ok(mut dirs) = fs::read_dir(&self.root).await else {
            return 0;
        };

        while let Ok(Some(dir)) = dirs.next_entry().await {
            let Ok(mut files) = fs::read_dir(dir.path()).await else {
                continue;
            };
            while let Ok(Some(file)) = files.next_entry().await {
                if let Ok(metadata) = file.metadata().await {
                    used += metadata.len();
                }
            }
        }

        used
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn cache() -> (tempfile::TempDir, DirCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = DirCache::new(dir.path().join("cache"));
        (dir, cache)
    }

    #[tokio::test]
    async fn spans_are_readable_after_writing() {
        let (_dir, cache) = cache();
        let key = TrackId::from("abc");

        assert!(!cache.is_cached(&key, 0, 4).await);
        cache
            .write(&key, 100, Bytes::from_static(b"0123456789"))
            .await
            .unwrap();

        assert!(cache.is_cached(&key, 100, 10).await);
        assert!(cache.is_cached(&key, 102, 3).await);
        assert!(!cache.is_cached(&key, 95, 10).await);
        assert!(!cache.is_cached(&key, 105, 10).await);
        assert_eq!(&cache.read(&key, 102, 3).await.unwrap()[..], b"234");
        assert_eq!(cache.space_used().await, 10);
    }

    #[tokio::test]
    async fn missing_spans_are_not_found() {
        let (_dir, cache) = cache();
        let err = cache.read(&TrackId::from("abc"), 0, 1).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn removal_is_per_key_and_idempotent() {
        let (_dir, cache) = cache();
        let a = TrackId::from("a/b");
        let b = TrackId::from("b");
        cache.write(&a, 0, Bytes::from_static(b"aa")).await.unwrap();
        cache.write(&b, 0, Bytes::from_static(b"bbb")).await.unwrap();

        cache.remove_resource(&a).await.unwrap();
        cache.remove_resource(&a).await.unwrap();

        assert!(!cache.is_cached(&a, 0, 2).await);
        assert!(cache.is_cached(&b, 0, 3).await);
        assert_eq!(cache.space_used().await, 3);
    }

    #[test]
    fn permission_errors_mean_read_only() {
        let err = cache_error(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(err.kind, ErrorKind::ReadOnlyCache);
        let err = cache_error(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
