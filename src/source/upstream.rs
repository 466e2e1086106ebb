//! The sources that actually produce bytes.
//!
//! * [`HttpUpstream`] fetches resolved URLs, ranged when the request is
//!   bounded
//! * [`LocalFiles`] reads files from disk for local and downloaded tracks

use std::{io::SeekFrom, path::Path, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{
    header::{HeaderValue, CONTENT_RANGE, RANGE},
    StatusCode,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::{
    error::{self, Error, Result},
    http,
    source::{read_window, skip_bytes, ByteStream, DataSpec, Media, Source},
    track::Locality,
};

/// Fetches the resolved URL of a request.
///
/// Bounded requests carry an explicit `Range` header and are read to the
/// end before `open` returns, so a truncated window surfaces as
/// `UnexpectedEof` here rather than mid-playback. Unbounded requests stream.
/// A server that ignores the range is tolerated: the body is skipped to the
/// requested position client-side.
pub struct HttpUpstream {
    client: Arc<http::Client>,
}

impl HttpUpstream {
    #[must_use]
    pub fn new(client: Arc<http::Client>) -> Self {
        Self { client }
    }

    fn range_header(spec: &DataSpec) -> Option<String> {
        match spec.range() {
            Some(range) => Some(range.header_value()),
            None if spec.ranged && spec.position > 0 => Some(format!("bytes={}-", spec.position)),
            None => None,
        }
    }
}

/// Total length of the resource behind `response`.
fn total_length(response: &reqwest::Response) -> Option<u64> {
    if response.status() == StatusCode::PARTIAL_CONTENT {
        // bytes 0-99/1234
        let value = response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
        value.rsplit_once('/')?.1.parse().ok()
    } else {
        response.content_length()
    }
}

/// Total length carried by a 416 answer: `bytes */1234`.
fn unsatisfied_length(response: &reqwest::Response) -> Option<u64> {
    let value = response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
    value.strip_prefix("bytes */")?.parse().ok()
}

#[async_trait]
impl Source for HttpUpstream {
    async fn open(&self, mut spec: DataSpec) -> Result<Media> {
        if spec.length == Some(0) {
            return Ok(Media::buffered(spec, Bytes::new()));
        }

        let Some(uri) = spec.uri.clone() else {
            return Err(Error::invalid_argument(format!("{spec}: no resolved uri")));
        };

        let mut request = self.client.get(uri);
        if let Some(range) = Self::range_header(&spec) {
            request
                .headers_mut()
                .insert(RANGE, HeaderValue::from_str(&range)?);
        }

        trace!("fetching {spec}");
        let response = self.client.execute_unlimited(request).await?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE
            && unsatisfied_length(&response) == Some(spec.position)
        {
            trace!("{spec}: at the end of the track");
            spec.content_length = Some(spec.position);
            return Ok(Media::buffered(spec, Bytes::new()));
        }
        if !status.is_success() {
            return Err(error::from_status(
                status,
                format!("upstream answered {status} for {spec}"),
            ));
        }

        if spec.content_length.is_none() {
            spec.content_length = total_length(&response);
        }

        let skip = if status == StatusCode::PARTIAL_CONTENT {
            0
        } else {
            spec.position
        };
        let body: ByteStream = Box::pin(response.bytes_stream().map_err(Error::from));

        match spec.range() {
            Some(range) => {
                let bytes = read_window(body, skip, Some(range.length)).await?;
                Ok(Media::buffered(spec, bytes))
            }
            None => Ok(Media::streaming(spec, skip_bytes(body, skip))),
        }
    }
}

/// Opens files from disk.
#[derive(Copy, Clone, Debug, Default)]
pub struct LocalFiles;

impl LocalFiles {
    /// Opens `path` at the position of `spec`.
    ///
    /// Bounded requests are read into memory; unbounded ones stream.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist and
    /// `RangeNotSatisfiable` if the position lies beyond its end.
    pub async fn open_path(&self, path: &Path, mut spec: DataSpec) -> Result<Media> {
        let mut file = tokio::fs::File::open(path).await?;
        let total = file.metadata().await?.len();

        if spec.position > total {
            return Err(Error::range_not_satisfiable(format!(
                "{}: position {} beyond length {total}",
                path.display(),
                spec.position
            )));
        }

        spec.content_length = Some(total);
        file.seek(SeekFrom::Start(spec.position)).await?;

        match spec.length {
            Some(length) => {
                let length = length.min(total - spec.position);
                let mut buffer = Vec::with_capacity(usize::try_from(length).unwrap_or(0));
                file.take(length).read_to_end(&mut buffer).await?;
                Ok(Media::buffered(spec, Bytes::from(buffer)))
            }
            None => {
                let stream = ReaderStream::new(file).map(|chunk| chunk.map_err(Error::from));
                Ok(Media::streaming(spec, Box::pin(stream)))
            }
        }
    }
}

#[async_trait]
impl Source for LocalFiles {
    async fn open(&self, spec: DataSpec) -> Result<Media> {
        let path = match spec.key.locality() {
            Locality::Local(path) => path.to_path_buf(),
            _ => {
                return Err(Error::invalid_argument(format!(
                    "{} is not a local track",
                    spec.key
                )))
            }
        };
        self.open_path(&path, spec).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use tokio::{io::AsyncWriteExt, net::TcpListener};
    use url::Url;

    use super::*;
    use crate::{config::Config, error::ErrorKind, track::TrackId};

    /// A minimal HTTP/1.1 server answering every request with `handler`.
    pub(crate) struct TestServer {
        pub(crate) url: Url,
        pub(crate) requests: Arc<Mutex<Vec<String>>>,
    }

    impl TestServer {
        pub(crate) fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    pub(crate) async fn serve<F>(handler: F) -> TestServer
    where
        F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap())
            .parse()
            .unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let handler = Arc::clone(&handler);
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&head).into_owned();
                    log.lock().unwrap().push(head.clone());
                    let _ = socket.write_all(&handler(&head)).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        TestServer { url, requests }
    }

    pub(crate) fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
        head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    pub(crate) fn response(status: &str, headers: &[(&str, String)], body: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n",
            body.len()
        );
        for (name, value) in headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        let mut out = out.into_bytes();
        out.extend_from_slice(body);
        out
    }

    /// Answers like a server honoring `Range` requests for `body`.
    pub(crate) fn ranged(head: &str, body: &[u8]) -> Vec<u8> {
        let total = body.len();
        let Some(range) = header(head, "range").and_then(|r| r.strip_prefix("bytes=")) else {
            return response("200 OK", &[], body);
        };
        let (start, end) = range.split_once('-').unwrap();
        let start: usize = start.parse().unwrap();
        let end: usize = if end.is_empty() {
            total - 1
        } else {
            end.parse::<usize>().unwrap().min(total - 1)
        };
        if start >= total {
            return response(
                "416 Range Not Satisfiable",
                &[("Content-Range", format!("bytes */{total}"))],
                b"",
            );
        }
        response(
            "206 Partial Content",
            &[("Content-Range", format!("bytes {start}-{end}/{total}"))],
            &body[start..=end],
        )
    }

    fn upstream() -> HttpUpstream {
        HttpUpstream::new(Arc::new(http::Client::new(&Config::default()).unwrap()))
    }

    const BODY: &[u8] = b"0123456789abcdefghij";

    #[tokio::test]
    async fn bounded_requests_send_a_range() {
        let server = serve(|head| ranged(head, BODY)).await;
        let spec = DataSpec::new("abc")
            .with_uri(server.url.join("abc").unwrap())
            .at(5)
            .with_length(4);

        let media = upstream().open(spec).await.unwrap();
        assert_eq!(media.content_length(), Some(20));
        assert_eq!(&media.bytes().await.unwrap()[..], b"5678");

        let requests = server.requests.lock().unwrap();
        assert_eq!(header(&requests[0], "range"), Some("bytes=5-8"));
    }

    #[tokio::test]
    async fn ignored_ranges_are_skipped_client_side() {
        let server = serve(|_| response("200 OK", &[], BODY)).await;
        let spec = DataSpec::new("abc")
            .with_uri(server.url.clone())
            .at(10)
            .with_length(3);

        let media = upstream().open(spec).await.unwrap();
        assert_eq!(&media.bytes().await.unwrap()[..], b"abc");
    }

    #[tokio::test]
    async fn unranged_requests_stream_from_the_position() {
        let server = serve(|head| ranged(head, BODY)).await;
        let spec = DataSpec::new("abc")
            .with_uri(server.url.clone())
            .at(16)
            .unranged();

        let media = upstream().open(spec).await.unwrap();
        assert_eq!(&media.bytes().await.unwrap()[..], b"ghij");

        let requests = server.requests.lock().unwrap();
        assert_eq!(header(&requests[0], "range"), None);
    }

    #[tokio::test]
    async fn requests_at_the_end_are_empty() {
        let server = serve(|head| ranged(head, BODY)).await;
        let spec = DataSpec::new("abc").with_uri(server.url.clone()).at(20);

        let media = upstream().open(spec).await.unwrap();
        assert_eq!(media.content_length(), Some(20));
        assert!(media.bytes().await.unwrap().is_empty());

        let requests = server.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(header(&requests[0], "range"), Some("bytes=20-"));
    }

    #[tokio::test]
    async fn statuses_are_classified() {
        let server = serve(|head| ranged(head, BODY)).await;
        let spec = DataSpec::new("abc")
            .with_uri(server.url.clone())
            .at(40)
            .with_length(4);
        let err = upstream().open(spec).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RangeNotSatisfiable);

        let server = serve(|_| response("403 Forbidden", &[], b"")).await;
        let spec = DataSpec::new("abc").with_uri(server.url.clone());
        let err = upstream().open(spec).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::HttpStatus(403));
        assert!(err.is_forbidden());
    }

    #[tokio::test]
    async fn local_files_honor_position_and_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.flac");
        std::fs::write(&path, BODY).unwrap();

        let spec = DataSpec::new(TrackId::local(&path)).at(2).with_length(3);
        let media = LocalFiles.open(spec).await.unwrap();
        assert_eq!(media.content_length(), Some(20));
        assert_eq!(&media.bytes().await.unwrap()[..], b"234");

        let spec = DataSpec::new(TrackId::local(&path)).at(18);
        let media = LocalFiles.open(spec).await.unwrap();
        assert_eq!(&media.bytes().await.unwrap()[..], b"ij");

        let spec = DataSpec::new(TrackId::local(dir.path().join("missing.flac")));
        let err = LocalFiles.open(spec).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
