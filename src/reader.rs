//! Blocking reads over the engine.
//!
//! Decoders usually want `Read + Seek`. [`MediaReader`] provides that by
//! opening one window at a time through a runtime [`Handle`]. Each window is
//! opened in full before any of it is handed out, so a read either returns
//! bytes or the classified error of the open.

use std::{
    io::{self, Read, Seek, SeekFrom},
    sync::Arc,
};

use bytes::Bytes;
use tokio::runtime::Handle;

use crate::{
    engine::Engine,
    error::{Error, ErrorKind},
    source::DataSpec,
    track::TrackId,
};

/// `Read + Seek` over one track.
///
/// Reads block on the runtime and must not be made from within an async
/// context; use `spawn_blocking` or a dedicated thread.
pub struct MediaReader {
    engine: Arc<Engine>,
    handle: Handle,
    key: TrackId,

    position: u64,
    content_length: Option<u64>,

    window: Bytes,
    window_start: u64,
}

impl MediaReader {
    #[must_use]
    pub fn new(engine: Arc<Engine>, handle: Handle, key: TrackId) -> Self {
        Self {
            engine,
            handle,
            key,
            position: 0,
            content_length: None,
            window: Bytes::new(),
            window_start: 0,
        }
    }

    /// Total length of the track, once the first window is open.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Unread bytes of the current window at the current position.
    fn buffered(&self) -> &[u8] {
        let Some(offset) = self.position.checked_sub(self.window_start) else {
            return &[];
        };
        usize::try_from(offset)
            .ok()
            .and_then(|offset| self.window.get(offset..))
            .unwrap_or_default()
    }

    /// Opens the window at the current position. False at the end.
    fn fill(&mut self) -> io::Result<bool> {
        if self
            .content_length
            .is_some_and(|total| self.position >= total)
        {
            return Ok(false);
        }

        let spec = DataSpec::new(self.key.clone()).at(self.position);
        let engine = &self.engine;
        let bytes = self
            .handle
            .block_on(async move {
                let media = engine.open(spec).await?;
                let content_length = media.content_length();
                Ok::<_, Error>((media.bytes().await?, content_length))
            })
            .map_err(into_io)?;

        let (bytes, content_length) = bytes;
        if content_length.is_some() {
            self.content_length = content_length;
        }
        self.window_start = self.position;
        self.window = bytes;

        Ok(!self.window.is_empty())
    }
}

fn into_io(e: Error) -> io::Error {
    let kind = match e.kind {
        ErrorKind::NotFound => io::ErrorKind::NotFound,
        ErrorKind::UnexpectedEof => io::ErrorKind::UnexpectedEof,
        ErrorKind::RangeNotSatisfiable | ErrorKind::InvalidArgument => {
            io::ErrorKind::InvalidInput
        }
        ErrorKind::Cancelled => io::ErrorKind::Interrupted,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, e)
}

impl Read for MediaReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.buffered().is_empty() && !self.fill()? {
            return Ok(0);
        }

        let available = self.buffered();
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n as u64;

        Ok(n)
    }
}

impl Seek for MediaReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                if self.content_length.is_none() {
                    self.fill()?;
                }
                let total = self.content_length.ok_or_else(|| {
                    io::Error::new(io::ErrorKind::Unsupported, "content length unknown")
                })?;
                total.checked_add_signed(delta)
            }
        };

        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of track")
        })?;
        trace!("{}: seek to {target}", self.key);

        self.position = target;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{
        cache::{tests::MemoryCache, DiskCache},
        config::Config,
        protocol::catalog::Status,
        provider::CatalogProvider,
        source::{
            resolver::tests::{MockProvider, StaticUpstream},
            Source,
        },
        store::{MemoryStore, MetadataStore},
    };

    const BODY: &[u8] = b"0123456789abcdefghij";

    fn reader(
        runtime: &tokio::runtime::Runtime,
        provider: MockProvider,
        upstream: Arc<StaticUpstream>,
    ) -> MediaReader {
        let config = Config {
            chunk_length: 8,
            ..Config::default()
        };
        let engine = Engine::new(
            &config,
            Arc::new(provider) as Arc<dyn CatalogProvider>,
            Arc::new(MemoryStore::new()) as Arc<dyn MetadataStore>,
            Arc::new(MemoryCache::default()) as Arc<dyn DiskCache>,
            upstream as Arc<dyn Source>,
        );
        MediaReader::new(Arc::new(engine), runtime.handle().clone(), TrackId::from("abc"))
    }

    #[test]
    fn reads_across_windows() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let upstream = Arc::new(StaticUpstream::new(BODY));
        let mut reader = reader(&runtime, MockProvider::ok(), Arc::clone(&upstream));

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(out, BODY);
        assert_eq!(reader.content_length(), Some(20));
        // 8 + 8 + 4 bytes
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn seeks_relative_to_the_end() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut reader = reader(
            &runtime,
            MockProvider::ok(),
            Arc::new(StaticUpstream::new(BODY)),
        );

        assert_eq!(reader.seek(SeekFrom::End(-5)).unwrap(), 15);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "fghij");

        assert_eq!(reader.seek(SeekFrom::Current(-8)).unwrap(), 12);
        let mut buf = [0; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"cde");

        let err = reader.seek(SeekFrom::Current(-100)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn open_errors_surface_on_read() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut reader = reader(
            &runtime,
            MockProvider::new([Status::LoginRequired]),
            Arc::new(StaticUpstream::new(BODY)),
        );

        let err = reader.read(&mut [0; 4]).unwrap_err();
        let inner = err.into_inner().unwrap().downcast::<Error>().unwrap();
        assert_eq!(inner.kind, ErrorKind::LoginRequired);
    }
}
