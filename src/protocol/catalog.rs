//! Playable-info responses of the HTTP catalog.
//!
//! # Wire Format
//!
//! ```json
//! {
//!     "id": "abc",
//!     "status": "OK",
//!     "ttl": 3600,
//!     "loudness": -7.5,
//!     "formats": [{
//!         "mime_type": "audio/mpeg",
//!         "bitrate": 128000,
//!         "content_length": 4194304,
//!         "url": "https://cdn.example.com/abc.mp3",
//!         "is_audio": true,
//!         "expires_in": 600
//!     }]
//! }
//! ```
//!
//! `url` may be relative to the catalog base URL. `is_audio` defaults to
//! whether the MIME type is `audio/*`.

use std::{fmt, str::FromStr, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DeserializeFromStr, DurationSeconds};
use veil::Redact;

use crate::{error::Error, track::TrackId};

/// Availability of a track as reported by the catalog.
#[derive(Clone, Debug, Hash, PartialEq, Eq, DeserializeFromStr)]
pub enum Status {
    Ok,
    Unplayable,
    LoginRequired,
    Other(String),
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "OK" => Self::Ok,
            "UNPLAYABLE" => Self::Unplayable,
            "LOGIN_REQUIRED" => Self::LoginRequired,
            other => Self::Other(other.to_owned()),
        };
        Ok(status)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Unplayable => write!(f, "UNPLAYABLE"),
            Self::LoginRequired => write!(f, "LOGIN_REQUIRED"),
            Self::Other(status) => write!(f, "{status}"),
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PlayableInfo {
    /// Identity the catalog answered for.
    #[serde(rename = "id")]
    pub reported_id: TrackId,

    pub status: Status,

    #[serde(default)]
    pub formats: Vec<PlayableFormat>,

    /// Validity of the URLs in this response.
    #[serde(default)]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub ttl: Option<Duration>,

    /// Integrated loudness in LUFS.
    #[serde(default)]
    pub loudness: Option<f64>,
}

impl PlayableInfo {
    /// The audio-only format with the highest bitrate.
    ///
    /// Of formats with equal bitrates the first listed wins.
    #[must_use]
    pub fn best_audio_format(&self) -> Option<&PlayableFormat> {
        self.formats
            .iter()
            .filter(|format| format.is_audio())
            .fold(None, |best: Option<&PlayableFormat>, format| match best {
                Some(best) if best.bitrate >= format.bitrate => Some(best),
                _ => Some(format),
            })
    }
}

#[serde_as]
#[derive(Clone, PartialEq, Eq, Deserialize, Redact)]
pub struct PlayableFormat {
    pub mime_type: String,

    /// Bits per second.
    #[serde(default)]
    pub bitrate: u32,

    #[serde(default)]
    pub content_length: Option<u64>,

    #[serde(default)]
    #[redact]
    pub url: Option<String>,

    #[serde(default)]
    pub is_audio: Option<bool>,

    /// Validity of this format's URL, overriding the response's.
    #[serde(default)]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub expires_in: Option<Duration>,
}

impl PlayableFormat {
    #[must_use]
    pub fn is_audio(&self) -> bool {
        self.is_audio
            .unwrap_or_else(|| self.mime_type.starts_with("audio/"))
    }
}
