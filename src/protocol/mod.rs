//! Wire types of the services relayer talks to.
//!
//! * [`catalog`] - playable-info responses of the HTTP catalog

pub mod catalog;

use std::fmt::Debug;

use serde::Deserialize;

use crate::error::Result;

/// Parses a JSON response body, logging it for protocol analysis.
///
/// Parsed responses are logged at TRACE level. When parsing fails, the body
/// is logged at TRACE level if it is valid JSON, or at ERROR level if not.
///
/// # Errors
///
/// Returns `InvalidArgument` if `body` does not deserialize into `T`.
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                error!("{origin}: failed parsing response ({e:?})");
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}
