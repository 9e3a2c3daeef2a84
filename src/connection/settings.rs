//! Liveness and framing limits for a connection.

use std::time::Duration;

use serde::Deserialize;

use crate::codec::DEFAULT_MAX_FRAME_LENGTH;

/// Per-connection configuration.
///
/// `None` for either duration means the limit is disabled. Settings
/// deserialise from any serde format with durations written in
/// [`humantime`](https://docs.rs/humantime) notation:
///
/// ```
/// use std::time::Duration;
///
/// use wiremux::connection::ConnectionSettings;
///
/// let settings: ConnectionSettings =
///     toml::from_str("max_lifetime = \"10m\"\nmax_idle_time = \"30s\"").expect("valid settings");
/// assert_eq!(settings.max_lifetime(), Some(Duration::from_secs(600)));
/// assert_eq!(settings.max_idle_time(), Some(Duration::from_secs(30)));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionSettings {
    #[serde(with = "humantime_serde")]
    max_lifetime: Option<Duration>,
    #[serde(with = "humantime_serde")]
    max_idle_time: Option<Duration>,
    max_frame_length: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_lifetime: None,
            max_idle_time: None,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl ConnectionSettings {
    /// Expire the connection this long after it started opening.
    #[must_use]
    pub fn with_max_lifetime(mut self, limit: Option<Duration>) -> Self {
        self.max_lifetime = limit;
        self
    }

    /// Expire the connection after this long without a completed send or
    /// receive.
    #[must_use]
    pub fn with_max_idle_time(mut self, limit: Option<Duration>) -> Self {
        self.max_idle_time = limit;
        self
    }

    /// Reject inbound frames longer than `length` bytes.
    ///
    /// Values below the frame header length are raised to it.
    #[must_use]
    pub fn with_max_frame_length(mut self, length: usize) -> Self {
        self.max_frame_length = length.max(crate::frame::HEADER_LEN);
        self
    }

    /// Maximum lifetime, if limited.
    #[must_use]
    pub fn max_lifetime(&self) -> Option<Duration> { self.max_lifetime }

    /// Maximum idle time, if limited.
    #[must_use]
    pub fn max_idle_time(&self) -> Option<Duration> { self.max_idle_time }

    /// Largest inbound frame accepted before the handshake narrows it.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }
}
