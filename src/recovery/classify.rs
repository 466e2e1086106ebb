//! Classification of playback errors into retryable and fatal.

use regex_lite::Regex;

use crate::{
    config::RecoveryConfig,
    error::{Error, ErrorKind, Result},
};

/// Outcome of classifying an error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Classification {
    /// Name of the error class, shown to the user on failure.
    pub class: &'static str,
    pub retryable: bool,
}

/// Decides whether a playback error is worth retrying.
///
/// A pure function of the error's kind and message: the same error always
/// gets the same classification.
#[derive(Clone, Debug)]
pub struct Classifier {
    retryable_statuses: Vec<u16>,
    transient_decoder_codes: Vec<u16>,
    transient_markers: Option<Regex>,
}

impl Classifier {
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the message markers do not compile.
    pub fn new(config: &RecoveryConfig) -> Result<Self> {
        let transient_markers = if config.transient_markers.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = config
                .transient_markers
                .iter()
                .map(|marker| regex_lite::escape(marker))
                .collect();
            let pattern = format!("(?i){}", alternatives.join("|"));
            Some(Regex::new(&pattern).map_err(Error::invalid_argument)?)
        };

        Ok(Self {
            retryable_statuses: config.retryable_statuses.clone(),
            transient_decoder_codes: config.transient_decoder_codes.clone(),
            transient_markers,
        })
    }

    #[must_use]
    #[allow(clippy::enum_glob_use)]
    pub fn classify(&self, error: &Error) -> Classification {
        use ErrorKind::*;

        let retryable = match &error.kind {
            IdentityMismatch | LoginRequired | FormatNotFound | Cancelled => false,
            NetworkTransient | Unplayable => true,
            HttpStatus(code) => self.retryable_statuses.contains(code),
            RemoteStatus(_) if error.is_forbidden() => true,
            Decoder(code) => {
                self.transient_decoder_codes.contains(code) || self.is_transient_message(error)
            }
            _ => self.is_transient_message(error),
        };

        Classification {
            class: error.kind.name(),
            retryable,
        }
    }

    fn is_transient_message(&self, error: &Error) -> bool {
        self.transient_markers
            .as_ref()
            .is_some_and(|markers| markers.is_match(&error.to_string()))
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&RecoveryConfig::default()).unwrap_or_else(|_| Self {
            retryable_statuses: Vec::new(),
            transient_decoder_codes: Vec::new(),
            transient_markers: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retryable(error: &Error) -> bool {
        Classifier::default().classify(error).retryable
    }

    #[test]
    fn fatal_kinds_are_never_retried() {
        for error in [
            Error::identity_mismatch("stream ended"),
            Error::login_required("connection reset"),
            Error::format_not_found("source error"),
            Error::http_status(401, "response code 401"),
        ] {
            assert!(!retryable(&error), "{error}");
        }
    }

    #[test]
    fn transient_kinds_and_statuses_are_retried() {
        for code in [500, 502, 503, 504, 429, 403, 404, 410, 412] {
            assert!(retryable(&Error::http_status(code, "status")));
        }
        assert!(retryable(&Error::network_transient("dns")));
        assert!(retryable(&Error::unplayable("later")));
        assert!(retryable(&Error::remote_status("FORBIDDEN")));
        assert!(retryable(&Error::decoder(3001, "malformed container")));
        assert!(!retryable(&Error::decoder(9999, "unsupported codec")));
    }

    #[test]
    fn message_markers_catch_the_rest() {
        assert!(retryable(&Error::unknown("Source error: Connection RESET by peer")));
        assert!(retryable(&Error::unexpected_eof("stream ended after 3 of 10 bytes")));
        assert!(!retryable(&Error::internal("disk full")));
    }

    #[test]
    fn configured_status_set_applies() {
        let config = RecoveryConfig {
            retryable_statuses: vec![418],
            transient_markers: Vec::new(),
            ..RecoveryConfig::default()
        };
        let classifier = Classifier::new(&config).unwrap();
        assert!(classifier.classify(&Error::http_status(418, "teapot")).retryable);
        assert!(!classifier.classify(&Error::http_status(503, "busy")).retryable);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = Classifier::default();
        let errors = [
            Error::http_status(503, "busy"),
            Error::unknown("connection reset"),
            Error::login_required("sign in"),
            Error::decoder(4001, "decoder"),
        ];
        for error in &errors {
            let first = classifier.classify(error);
            for _ in 0..10 {
                assert_eq!(classifier.classify(error), first);
            }
            assert_eq!(first.class, error.kind.name());
        }
    }
}
