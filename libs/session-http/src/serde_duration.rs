//! Serde adapter that reads and writes `Duration` as humantime strings
//! (`"30s"`, `"500ms"`, `"1m 30s"`).
//!
//! ```
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Timeouts {
//!     #[serde(with = "session_http::serde_duration")]
//!     request: Duration,
//! }
//! ```

use serde::{Deserialize, Deserializer, Serializer, de};
use std::time::Duration;

/// Serializes a `Duration` via the humantime crate.
///
/// # Errors
///
/// Propagates serializer errors.
pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&humantime::format_duration(*d))
}

/// Deserializes a `Duration` via the humantime crate.
///
/// # Errors
///
/// Returns an error if the input is not a valid humantime duration.
pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(d)?;
    humantime::parse_duration(&raw).map_err(de::Error::custom)
}

/// Same as the parent module for `Option<Duration>`; `null` maps to `None`.
pub mod option {
    use super::{Deserialize, Deserializer, Duration, Serializer, de};

    /// # Errors
    ///
    /// Propagates serializer errors.
    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.collect_str(&humantime::format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the input is neither `null` nor a valid humantime duration.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|raw| humantime::parse_duration(&raw).map_err(de::Error::custom))
            .transpose()
    }
}
