//! Byte sources and the layers stacked on top of them.
//!
//! Every layer implements [`Source`]: given a [`DataSpec`] it resolves to an
//! open [`Media`] or a classified error, before any byte is read by the
//! caller. Layers compose by wrapping one another:
//!
//! ```text
//! LocalFallback
//!   └ RangeNormalizer
//!       └ Retry (403-class)
//!           └ Retry (unplayable)
//!               └ UnknownErrors
//!                   └ Resolving ── Resolver ── CacheSelector ── HttpUpstream
//!                                                 └ DiskCache
//! ```

pub mod chunk;
pub mod fallback;
pub mod range;
pub mod resolver;
pub mod retry;
pub mod unknown;
pub mod upstream;

use std::{fmt, pin::Pin};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{future, stream, Stream, StreamExt, TryStreamExt};
use url::Url;
use veil::Redact;

use crate::{
    error::{Error, Result},
    track::TrackId,
};

pub use chunk::{ByteRange, ChunkedRangeSource, Window};

/// A stream of bytes from an opened source.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Description of the bytes to open.
///
/// Callers fill in `key`, `position` and optionally `length`. The resolver
/// adds the `uri` and the total `content_length` once it knows them.
#[derive(Clone, PartialEq, Eq, Redact)]
pub struct DataSpec {
    pub key: TrackId,
    pub position: u64,
    pub length: Option<u64>,

    #[redact]
    pub uri: Option<Url>,
    pub content_length: Option<u64>,

    /// Whether an explicit byte range may be requested upstream.
    pub ranged: bool,
}

impl DataSpec {
    #[must_use]
    pub fn new(key: impl Into<TrackId>) -> Self {
        Self {
            key: key.into(),
            position: 0,
            length: None,
            uri: None,
            content_length: None,
            ranged: true,
        }
    }

    #[must_use]
    pub fn at(mut self, position: u64) -> Self {
        self.position = position;
        self
    }

    #[must_use]
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    #[must_use]
    pub fn with_uri(mut self, uri: Url) -> Self {
        self.uri = Some(uri);
        self
    }

    /// The same request without an explicit byte range.
    #[must_use]
    pub fn unranged(mut self) -> Self {
        self.ranged = false;
        self.length = None;
        self
    }

    /// The `Range` header value for this request, if it is bounded.
    #[must_use]
    pub fn range(&self) -> Option<ByteRange> {
        if !self.ranged {
            return None;
        }
        self.length.map(|length| ByteRange {
            start: self.position,
            length,
        })
    }
}

impl fmt::Display for DataSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.length {
            Some(length) => write!(
                f,
                "{} [{}..{}]",
                self.key,
                self.position,
                self.position.saturating_add(length)
            ),
            None => write!(f, "{} [{}..]", self.key, self.position),
        }
    }
}

enum Body {
    Buffered(Bytes),
    Streaming(ByteStream),
}

/// An opened source, ready to be read.
pub struct Media {
    spec: DataSpec,
    body: Body,
}

impl Media {
    /// Media whose bytes are already in memory.
    #[must_use]
    pub fn buffered(spec: DataSpec, bytes: Bytes) -> Self {
        Self {
            spec,
            body: Body::Buffered(bytes),
        }
    }

    /// Media that is read as it arrives.
    #[must_use]
    pub fn streaming(spec: DataSpec, stream: ByteStream) -> Self {
        Self {
            spec,
            body: Body::Streaming(stream),
        }
    }

    /// The request this media answers.
    #[must_use]
    pub fn spec(&self) -> &DataSpec {
        &self.spec
    }

    /// Total length of the resource, when known.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.spec.content_length
    }

    /// Number of bytes in this media, when known up front.
    #[must_use]
    pub fn len(&self) -> Option<u64> {
        match &self.body {
            Body::Buffered(bytes) => Some(bytes.len() as u64),
            Body::Streaming(_) => None,
        }
    }

    /// Whether this media is known to hold no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Reads all bytes into memory.
    ///
    /// # Errors
    ///
    /// Propagates errors of a streaming body.
    pub async fn bytes(self) -> Result<Bytes> {
        match self.body {
            Body::Buffered(bytes) => Ok(bytes),
            Body::Streaming(stream) => read_window(stream, 0, None).await,
        }
    }

    #[must_use]
    pub fn into_stream(self) -> ByteStream {
        match self.body {
            Body::Buffered(bytes) => Box::pin(stream::once(future::ready(Ok(bytes)))),
            Body::Streaming(stream) => stream,
        }
    }
}

impl fmt::Debug for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Media")
            .field("spec", &self.spec)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Something that opens [`DataSpec`]s.
#[async_trait]
pub trait Source: Send + Sync {
    /// Opens the requested bytes.
    ///
    /// Returns only after the source is ready to be read, or with a
    /// classified error.
    async fn open(&self, spec: DataSpec) -> Result<Media>;
}

#[async_trait]
impl<S> Source for std::sync::Arc<S>
where
    S: Source + ?Sized,
{
    async fn open(&self, spec: DataSpec) -> Result<Media> {
        (**self).open(spec).await
    }
}

/// Collects `take` bytes after skipping `skip` bytes of `stream`.
///
/// With `take` set, ending early is an `UnexpectedEof`. Without it the rest
/// of the stream is collected.
pub(crate) async fn read_window(
    mut stream: ByteStream,
    mut skip: u64,
    take: Option<u64>,
) -> Result<Bytes> {
    if take == Some(0) {
        return Ok(Bytes::new());
    }

    let capacity = take.map_or(0, |take| usize::try_from(take).unwrap_or(usize::MAX));
    let mut buffer = BytesMut::with_capacity(capacity);

    while let Some(chunk) = stream.next().await {
        let mut chunk = chunk?;

        if skip > 0 {
            let skipped = usize::try_from(skip).unwrap_or(usize::MAX).min(chunk.len());
            let _ = chunk.split_to(skipped);
            skip -= skipped as u64;
        }

        if let Some(take) = take {
            let wanted = usize::try_from(take).unwrap_or(usize::MAX) - buffer.len();
            buffer.extend_from_slice(&chunk[..chunk.len().min(wanted)]);
            if buffer.len() as u64 == take {
                return Ok(buffer.freeze());
            }
        } else {
            buffer.extend_from_slice(&chunk);
        }
    }

    match take {
        Some(take) => Err(Error::unexpected_eof(format!(
            "stream ended after {} of {take} bytes",
            buffer.len()
        ))),
        None => Ok(buffer.freeze()),
    }
}

/// Drops the first `skip` bytes of `stream`.
pub(crate) fn skip_bytes(stream: ByteStream, skip: u64) -> ByteStream {
    if skip == 0 {
        return stream;
    }

    let skipped = stream
        .scan(skip, |remaining, chunk| {
            let chunk = chunk.map(|mut bytes| {
                let n = usize::try_from(*remaining)
                    .unwrap_or(usize::MAX)
                    .min(bytes.len());
                *remaining -= n as u64;
                bytes.split_off(n)
            });
            future::ready(Some(chunk))
        })
        .try_filter(|bytes| future::ready(!bytes.is_empty()));

    Box::pin(skipped)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn chunks(parts: &[&'static [u8]]) -> ByteStream {
        let items: Vec<Result<Bytes>> = parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn read_window_skips_and_takes_across_chunks() {
        let bytes = read_window(chunks(&[b"abc", b"defg", b"hij"]), 2, Some(5))
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"cdefg");
    }

    #[tokio::test]
    async fn read_window_reports_short_bodies() {
        let err = read_window(chunks(&[b"abc"]), 0, Some(10))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn skip_bytes_drops_the_prefix() {
        let stream = skip_bytes(chunks(&[b"ab", b"cdef", b"g"]), 3);
        let bytes = read_window(stream, 0, None).await.unwrap();
        assert_eq!(&bytes[..], b"defg");
    }

    #[test]
    fn range_requires_a_bounded_ranged_spec() {
        let spec = DataSpec::new("abc").at(10).with_length(5);
        assert_eq!(
            spec.range(),
            Some(ByteRange {
                start: 10,
                length: 5
            })
        );
        assert_eq!(spec.clone().unranged().range(), None);
        assert_eq!(DataSpec::new("abc").range(), None);
    }

    #[test]
    fn debug_output_hides_urls() {
        let spec = DataSpec::new("abc")
            .with_uri("https://cdn.example.com/secret".parse().unwrap())
            .with_length(4);
        let debug = format!("{spec:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.starts_with("DataSpec"));
        assert_eq!(spec.to_string(), "abc [0..4]");
    }
}
