//! Engine configuration.
//!
//! All settings have defaults, so a configuration file only needs to list
//! what it changes. Durations are written in milliseconds:
//!
//! ```toml
//! chunk_length = 262144
//! catalog_url = "https://catalog.example.com/v1/"
//!
//! [recovery]
//! skip_on_error = false
//! retry_delay = 5000
//! ```

use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use url::Url;

use crate::{
    error::{Error, Result},
    source::retry::Backoff,
};

#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub user_agent: String,

    /// Base URL of the HTTP catalog.
    pub catalog_url: Option<Url>,

    /// Catalog calls allowed per `rate_limit_interval`.
    pub rate_limit_calls: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub rate_limit_interval: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub read_timeout: Duration,

    /// Size of the byte window fetched per request.
    pub chunk_length: u64,

    pub cache_dir: PathBuf,

    /// Serve every request from the upstream without touching the cache.
    pub pause_cache: bool,

    /// Retries of `Unplayable` resolutions.
    pub unplayable_retries: u32,

    /// Retries of HTTP 403 and equivalent refusals.
    pub forbidden_retries: u32,

    pub backoff: Backoff,

    pub recovery: RecoveryConfig,
}

/// Settings of the playback recovery state machine.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Playback-level attempts per track before giving up.
    pub max_attempts: u8,

    /// Pause before resuming on the first attempt.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub fast_retry_delay: Duration,

    /// Pause after re-preparing on later attempts.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_delay: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub network_poll_interval: Duration,

    /// Skip to the next queued item after giving up.
    pub skip_on_error: bool,

    /// Number of tracks whose attempt counters are remembered.
    pub retry_history: usize,

    pub retryable_statuses: Vec<u16>,
    pub transient_decoder_codes: Vec<u16>,

    /// Case-insensitive message fragments of transient upstream failures.
    pub transient_markers: Vec<String>,
}

impl RecoveryConfig {
    /// Multiple of `retry_delay` to wait for connectivity before giving up.
    const NETWORK_WAIT_FACTOR: u32 = 10;

    /// How long to wait for the network to come back.
    #[must_use]
    pub fn network_wait_ceiling(&self) -> Duration {
        self.retry_delay * Self::NETWORK_WAIT_FACTOR
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            fast_retry_delay: Duration::from_millis(200),
            retry_delay: Duration::from_secs(3),
            network_poll_interval: Duration::from_secs(2),
            skip_on_error: true,
            retry_history: 3,
            retryable_statuses: vec![500, 502, 503, 504, 429, 403, 404, 410, 412],
            transient_decoder_codes: vec![3001, 3002, 4001, 4003],
            transient_markers: [
                "source error",
                "response code",
                "connection reset",
                "unable to connect",
                "stream ended",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl Config {
    /// Default size of a fetched byte window: 512 KiB.
    pub const DEFAULT_CHUNK_LENGTH: u64 = 512 * 1024;

    /// Configuration files are small; refuse anything larger.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Reads a TOML configuration file on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is too large, or is not
    /// valid TOML for this structure.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::invalid_argument(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        let config = toml::from_str::<Self>(&contents)?;
        config.validate()?;

        Ok(config)
    }

    /// Checks values that would make the engine misbehave.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero chunk length, zero rate limit or
    /// zero poll interval.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_length == 0 {
            return Err(Error::invalid_argument("chunk length cannot be zero"));
        }
        if self.rate_limit_calls == 0 || self.rate_limit_interval.is_zero() {
            return Err(Error::invalid_argument("rate limit cannot be zero"));
        }
        if self.recovery.network_poll_interval.is_zero() {
            return Err(Error::invalid_argument(
                "network poll interval cannot be zero",
            ));
        }
        Ok(())
    }

    fn user_agent(app_name: &str, app_version: &str) -> String {
        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));

        // `/` and `;` would break the product tokens.
        let os_version = os_version.replace(['/', ';'], "_");
        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");

        user_agent
    }
}

impl Default for Config {
    fn default() -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let user_agent = Self::user_agent(&app_name, &app_version);

        Self {
            app_name,
            app_version,
            user_agent,

            catalog_url: None,
            rate_limit_calls: 50,
            rate_limit_interval: Duration::from_secs(5),

            connect_timeout: Duration::from_secs(16),
            read_timeout: Duration::from_secs(8),

            chunk_length: Self::DEFAULT_CHUNK_LENGTH,
            cache_dir: std::env::temp_dir().join(env!("CARGO_PKG_NAME")),
            pause_cache: false,

            unplayable_retries: 2,
            forbidden_retries: 1,
            backoff: Backoff::default(),

            recovery: RecoveryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.chunk_length, 512 * 1024);
        assert_eq!(config.connect_timeout, Duration::from_secs(16));
        assert_eq!(config.read_timeout, Duration::from_secs(8));
        assert_eq!(config.unplayable_retries, 2);
        assert_eq!(config.forbidden_retries, 1);
        assert_eq!(config.recovery.max_attempts, 2);
        assert_eq!(config.recovery.retry_history, 3);
        assert_eq!(
            config.recovery.network_wait_ceiling(),
            Duration::from_secs(30)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_overrides_only_what_it_lists() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
chunk_length = 1024
catalog_url = "https://catalog.example.com/v1/"

[recovery]
skip_on_error = false
retry_delay = 500
retryable_statuses = [503]

[backoff]
policy = "fixed"
delay = 250
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.chunk_length, 1024);
        assert_eq!(
            config.catalog_url.unwrap().as_str(),
            "https://catalog.example.com/v1/"
        );
        assert!(!config.recovery.skip_on_error);
        assert_eq!(config.recovery.retry_delay, Duration::from_millis(500));
        assert_eq!(config.recovery.retryable_statuses, vec![503]);
        assert_eq!(config.recovery.max_attempts, 2);
        assert_eq!(
            config.backoff,
            Backoff::Fixed {
                delay: Duration::from_millis(250)
            }
        );
    }

    #[test]
    fn example_file_lists_the_defaults() {
        let example: Config = toml::from_str(include_str!("../relayer.toml.example")).unwrap();
        assert_eq!(example, Config::default());
    }

    #[test]
    fn zero_chunk_length_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chunk_length = 0").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
    }
}
