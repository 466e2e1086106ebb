//! Error handling for relayer.
//!
//! Provides a unified error type whose [`ErrorKind`] is the classification
//! every retry, fallback and recovery decision in the engine is based on.
//!
//! # Error Categories
//!
//! * Resolution failures reported by the catalog: identity mismatch,
//!   unplayable, login required, restricted content, unknown remote status
//! * Format selection: no audio-only format available
//! * Transport: transient network failures, HTTP status codes, range errors,
//!   truncated bodies
//! * Cache: read-only disk cache
//! * Player-reported decoder failures
//! * Ambient failures (invalid arguments, missing files, internal errors)
//!   that the engine does not recognize as domain errors
//!
//! # Example
//!
//! ```rust
//! use relayer::error::{Error, ErrorKind, Result};
//!
//! fn select() -> Result<()> {
//!     Err(Error::format_not_found("no audio-only format for track abc"))
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
///
/// Provides:
/// * Classified error types ([`ErrorKind`])
/// * Underlying error details
/// * Conversion from common error types
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    ///
    /// # Returns
    /// * `Some(&E)` - If the underlying error is of type `E`
    /// * `None` - If the underlying error is not of type `E`
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

/// Standard result type for relayer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error classification.
///
/// The first group of variants is the domain taxonomy: errors the engine
/// knows how to handle. The last group holds ambient failures that are not
/// recognized and get wrapped into [`ErrorKind::Unknown`] before they leave
/// the resolving source.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum ErrorKind {
    /// The catalog answered for a different track than requested.
    #[error("identity mismatch")]
    IdentityMismatch,

    /// No audio-only format was offered.
    #[error("format not found")]
    FormatNotFound,

    /// The catalog reported the track as unplayable.
    #[error("unplayable")]
    Unplayable,

    /// The catalog requires a signed-in session for this track.
    #[error("login required")]
    LoginRequired,

    /// The playable URL could not be materialized.
    #[error("restricted content")]
    RestrictedContent,

    /// The catalog reported a status that is not otherwise recognized.
    #[error("remote status {0}")]
    RemoteStatus(String),

    /// HTTP 416 Range Not Satisfiable.
    #[error("range not satisfiable")]
    RangeNotSatisfiable,

    /// The upstream ended before delivering the requested bytes.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// DNS, connect, TLS or timeout failure.
    #[error("transient network failure")]
    NetworkTransient,

    /// Non-successful HTTP status.
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// The disk cache cannot be written or read in its current state.
    #[error("read-only cache")]
    ReadOnlyCache,

    /// Decoder or container failure reported by the player, with its code.
    #[error("decoder error {0}")]
    Decoder(u16),

    /// The operation was cancelled because playback moved on.
    #[error("operation was cancelled")]
    Cancelled,

    /// Unclassified failure.
    #[error("unknown error")]
    Unknown,

    /// Invalid argument specified.
    #[error("invalid argument specified")]
    InvalidArgument,

    /// File or resource not found.
    #[error("not found")]
    NotFound,

    /// Unexpected internal failure.
    #[error("internal error")]
    Internal,
}

impl ErrorKind {
    /// Whether this kind belongs to the domain taxonomy.
    ///
    /// Errors of any other kind are unclassified from the engine's point of
    /// view.
    #[must_use]
    pub fn is_recognized(&self) -> bool {
        !matches!(
            self,
            Self::InvalidArgument | Self::NotFound | Self::Internal
        )
    }

    /// A short, stable name for user-facing messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            IdentityMismatch => "IdentityMismatch",
            FormatNotFound => "FormatNotFound",
            Unplayable => "Unplayable",
            LoginRequired => "LoginRequired",
            RestrictedContent => "RestrictedContent",
            RemoteStatus(_) => "RemoteStatus",
            RangeNotSatisfiable => "RangeNotSatisfiable",
            UnexpectedEof => "UnexpectedEof",
            NetworkTransient => "NetworkTransient",
            HttpStatus(_) => "HttpStatus",
            ReadOnlyCache => "ReadOnlyCache",
            Decoder(_) => "Decoder",
            Cancelled => "Cancelled",
            Unknown => "Unknown",
            InvalidArgument => "InvalidArgument",
            NotFound => "NotFound",
            Internal => "Internal",
        }
    }
}

macro_rules! constructors {
    ($($(#[$meta:meta])* $name:ident => $kind:expr;)+) => {
        $(
            $(#[$meta])*
            pub fn $name<E>(error: E) -> Self
            where
                E: Into<Box<dyn std::error::Error + Send + Sync>>,
            {
                Self::new($kind, error)
            }
        )+
    };
}

impl Error {
    /// Creates a new error with specified kind and details.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::new(ErrorKind::HttpStatus(503), "catalog unavailable");
    /// assert_eq!(err.kind, ErrorKind::HttpStatus(503));
    /// ```
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    constructors! {
        /// Creates an error for a catalog response about another track.
        identity_mismatch => ErrorKind::IdentityMismatch;
        /// Creates an error for a response without audio-only formats.
        format_not_found => ErrorKind::FormatNotFound;
        /// Creates an error for tracks the catalog reports as unplayable.
        unplayable => ErrorKind::Unplayable;
        /// Creates an error for tracks that need a signed-in session.
        login_required => ErrorKind::LoginRequired;
        /// Creates an error for URLs that could not be materialized.
        restricted_content => ErrorKind::RestrictedContent;
        /// Creates an error for HTTP 416 responses.
        range_not_satisfiable => ErrorKind::RangeNotSatisfiable;
        /// Creates an error for truncated bodies.
        unexpected_eof => ErrorKind::UnexpectedEof;
        /// Creates an error for DNS, connect, TLS and timeout failures.
        network_transient => ErrorKind::NetworkTransient;
        /// Creates an error for a disk cache that refuses reads or writes.
        read_only_cache => ErrorKind::ReadOnlyCache;
        /// Creates an error for jobs cancelled by a track transition.
        cancelled => ErrorKind::Cancelled;
        /// Creates an error that does not fit any other category.
        unknown => ErrorKind::Unknown;
        /// Creates an error for invalid arguments.
        invalid_argument => ErrorKind::InvalidArgument;
        /// Creates an error for missing resources.
        not_found => ErrorKind::NotFound;
        /// Creates an error for unexpected internal failures.
        internal => ErrorKind::Internal;
    }

    /// Creates an error for a catalog status that is not recognized.
    pub fn remote_status(status: impl Into<String>) -> Self {
        let status = status.into();
        Self::new(
            ErrorKind::RemoteStatus(status.clone()),
            format!("catalog reported status {status}"),
        )
    }

    /// Creates an error for a non-successful HTTP status code.
    pub fn http_status<E>(code: u16, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::HttpStatus(code), error)
    }

    /// Creates an error for a decoder failure reported by the player.
    pub fn decoder<E>(code: u16, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Decoder(code), error)
    }

    /// Whether the catalog refused access in a 403-like way.
    ///
    /// Besides HTTP 403 itself, a catalog status of `FORBIDDEN` counts.
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        match &self.kind {
            ErrorKind::HttpStatus(code) => *code == 403,
            ErrorKind::RemoteStatus(status) => status.eq_ignore_ascii_case("forbidden"),
            _ => false,
        }
    }
}

/// Returns the underlying error source.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display, showing both kind and details.
///
/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
///
/// Connection level failures are transient, truncated reads are
/// `UnexpectedEof`, and a read-only filesystem is reported as such.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            ReadOnlyFilesystem => Self::read_only_cache(err),
            AddrNotAvailable | ConnectionRefused | ConnectionReset | ConnectionAborted
            | NotConnected | BrokenPipe | TimedOut | HostUnreachable | NetworkUnreachable
            | NetworkDown => Self::network_transient(err),
            UnexpectedEof => Self::unexpected_eof(err),
            Interrupted => Self::cancelled(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            _ => Self::internal(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// * Connect and timeout errors -> `NetworkTransient`
/// * Status errors -> `HttpStatus`, with 416 as `RangeNotSatisfiable`
/// * Body errors -> `UnexpectedEof`
/// * Decode errors -> `InvalidArgument`
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return from_status(status, err);
        }

        if err.is_connect() || err.is_timeout() || err.is_request() {
            return Self::network_transient(err);
        }

        if err.is_body() {
            return Self::unexpected_eof(err);
        }

        if err.is_decode() {
            return Self::invalid_argument(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        Self::unknown(err)
    }
}

/// Classifies a non-successful status code.
pub(crate) fn from_status<E>(status: http::StatusCode, error: E) -> Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if status == http::StatusCode::RANGE_NOT_SATISFIABLE {
        Error::range_not_satisfiable(error)
    } else {
        Error::http_status(status.as_u16(), error)
    }
}

/// Converts timeout errors to `NetworkTransient`.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::network_transient(e.to_string())
    }
}

/// Converts URL parsing errors to `InvalidArgument`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts JSON errors to `InvalidArgument`.
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_argument(e)
    }
}

/// Converts TOML errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e)
    }
}

/// Converts invalid header errors to `Internal`.
impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts mutex poisoning errors to `Internal`.
impl<T> From<std::sync::PoisonError<std::sync::MutexGuard<'_, T>>> for Error {
    fn from(e: std::sync::PoisonError<std::sync::MutexGuard<'_, T>>) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts task join errors to `Cancelled` or `Internal`.
impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Self::cancelled(e.to_string())
        } else {
            Self::internal(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_shows_kind_and_details() {
        let err = Error::http_status(503, "catalog down");
        assert_eq!(err.to_string(), "HTTP status 503: catalog down");

        let err = Error::remote_status("AGE_RESTRICTED");
        assert_eq!(err.kind, ErrorKind::RemoteStatus("AGE_RESTRICTED".into()));
    }

    #[test]
    fn io_errors_are_classified() {
        let err = Error::from(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert_eq!(err.kind, ErrorKind::NetworkTransient);

        let err = Error::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert_eq!(err.kind, ErrorKind::UnexpectedEof);

        let err = Error::from(std::io::Error::from(std::io::ErrorKind::ReadOnlyFilesystem));
        assert_eq!(err.kind, ErrorKind::ReadOnlyCache);

        let err = Error::from(std::io::Error::from(std::io::ErrorKind::Other));
        assert!(!err.kind.is_recognized());
    }

    #[test]
    fn status_416_is_a_range_error() {
        let err = from_status(http::StatusCode::RANGE_NOT_SATISFIABLE, "bad range");
        assert_eq!(err.kind, ErrorKind::RangeNotSatisfiable);

        let err = from_status(http::StatusCode::FORBIDDEN, "expired");
        assert!(err.is_forbidden());
    }

    #[test]
    fn forbidden_catalog_status_counts_as_403() {
        assert!(Error::remote_status("FORBIDDEN").is_forbidden());
        assert!(!Error::remote_status("GEO_BLOCKED").is_forbidden());
        assert!(!Error::unplayable("nope").is_forbidden());
    }

    #[test]
    fn downcast_reaches_the_source() {
        let err = Error::from(std::io::Error::other("disk"));
        assert!(err.downcast::<std::io::Error>().is_some());
    }
}
