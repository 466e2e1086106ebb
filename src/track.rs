//! Track identifiers.
//!
//! A [`TrackId`] is an opaque catalog identifier. Two reserved prefixes
//! change how a track is opened:
//!
//! * `local:` - the remainder is a path on disk; the track bypasses all
//!   network and caching logic
//! * `downloaded:` - the remainder is a catalog id that was downloaded
//!   earlier; it opens from the file recorded in the metadata store

use std::{fmt, path::Path, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::error::Error;

/// Opaque identifier of a track in the catalog.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub struct TrackId(String);

/// How a [`TrackId`] is to be opened.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Locality<'a> {
    /// Resolved through the catalog.
    Remote(&'a str),
    /// A file in the local library.
    Local(&'a Path),
    /// A catalog track with a downloaded copy.
    Downloaded(&'a str),
}

impl TrackId {
    pub const LOCAL_PREFIX: &'static str = "local:";
    pub const DOWNLOADED_PREFIX: &'static str = "downloaded:";

    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier of a file in the local library.
    #[must_use]
    pub fn local(path: impl AsRef<Path>) -> Self {
        Self(format!(
            "{}{}",
            Self::LOCAL_PREFIX,
            path.as_ref().to_string_lossy()
        ))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn locality(&self) -> Locality<'_> {
        if let Some(path) = self.0.strip_prefix(Self::LOCAL_PREFIX) {
            Locality::Local(Path::new(path))
        } else if let Some(id) = self.0.strip_prefix(Self::DOWNLOADED_PREFIX) {
            Locality::Downloaded(id)
        } else {
            Locality::Remote(&self.0)
        }
    }

    /// Local tracks never touch the network or the disk cache.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.locality(), Locality::Local(_))
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TrackId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::invalid_argument("track id cannot be empty"));
        }
        Ok(Self(s.to_owned()))
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for TrackId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_select_locality() {
        assert_eq!(TrackId::from("abc").locality(), Locality::Remote("abc"));
        assert_eq!(
            TrackId::from("downloaded:abc").locality(),
            Locality::Downloaded("abc")
        );
        let local = TrackId::local("/music/song.mp3");
        assert_eq!(local.as_str(), "local:/music/song.mp3");
        assert_eq!(local.locality(), Locality::Local(Path::new("/music/song.mp3")));
        assert!(local.is_local());
        assert!(!TrackId::from("downloaded:abc").is_local());
    }

    #[test]
    fn empty_ids_are_rejected() {
        assert!("".parse::<TrackId>().is_err());
        assert_eq!("abc".parse::<TrackId>().unwrap(), TrackId::from("abc"));
    }
}
