//! Byte-range windows.
//!
//! Large upstream resources are fetched one window at a time so memory per
//! request stays bounded and each window can be cached on its own. The price
//! is one round trip per window boundary.

use std::fmt;

use crate::{
    error::{Error, Result},
    source::DataSpec,
};

/// A half-open byte range `[start, start + length)`.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub length: u64,
}

impl ByteRange {
    /// Exclusive end offset.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    /// Value of the HTTP `Range` header, whose end offset is inclusive.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end().saturating_sub(1))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end())
    }
}

/// Outcome of windowing a request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Window {
    /// Fetch exactly this range.
    Range(ByteRange),
    /// Content length unknown: stream everything from the position.
    Full,
    /// The position is at the end of the content.
    End,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChunkedRangeSource {
    chunk_length: u64,
}

impl ChunkedRangeSource {
    /// # Panics
    ///
    /// Panics if `chunk_length` is zero.
    #[must_use]
    pub fn new(chunk_length: u64) -> Self {
        assert!(chunk_length > 0, "chunk length is zero");
        Self { chunk_length }
    }

    #[must_use]
    pub fn chunk_length(&self) -> u64 {
        self.chunk_length
    }

    /// Computes the window to fetch from `position`.
    ///
    /// The window never exceeds the chunk length, the remaining content, or
    /// the `requested` length, and is never empty.
    ///
    /// # Errors
    ///
    /// Returns `RangeNotSatisfiable` when `position` lies beyond the content.
    pub fn window(
        &self,
        position: u64,
        requested: Option<u64>,
        content_length: Option<u64>,
    ) -> Result<Window> {
        let Some(total) = content_length else {
            return Ok(Window::Full);
        };

        if position > total {
            return Err(Error::range_not_satisfiable(format!(
                "position {position} beyond content length {total}"
            )));
        }

        let length = self
            .chunk_length
            .min(total - position)
            .min(requested.unwrap_or(u64::MAX));

        if length == 0 {
            Ok(Window::End)
        } else {
            Ok(Window::Range(ByteRange {
                start: position,
                length,
            }))
        }
    }

    /// Bounds `spec` to its next window, given the total content length.
    ///
    /// Requests that may not be ranged are passed through unbounded.
    ///
    /// # Errors
    ///
    /// Returns `RangeNotSatisfiable` when the position lies beyond the
    /// content.
    pub fn apply(&self, mut spec: DataSpec, content_length: Option<u64>) -> Result<DataSpec> {
        spec.content_length = content_length.or(spec.content_length);
        if !spec.ranged {
            spec.length = None;
            return Ok(spec);
        }

        spec.length = match self.window(spec.position, spec.length, spec.content_length)? {
            Window::Range(range) => Some(range.length),
            Window::Full => None,
            Window::End => Some(0),
        };

        Ok(spec)
    }
}

impl Default for ChunkedRangeSource {
    fn default() -> Self {
        Self::new(crate::config::Config::DEFAULT_CHUNK_LENGTH)
    }
}
