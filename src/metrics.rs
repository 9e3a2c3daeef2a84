//! Metric helpers for `wiremux`.
//!
//! This module defines metric names and simple helper functions wrapping
//! the [`metrics`](https://docs.rs/metrics) crate. Without the `metrics`
//! feature every helper is a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking open connections.
pub const CONNECTIONS_OPEN: &str = "wiremux_connections_open";
/// Name of the counter tracking frames transferred.
pub const FRAMES_TOTAL: &str = "wiremux_frames_total";
/// Name of the counter tracking frame bytes transferred.
pub const BYTES_TOTAL: &str = "wiremux_bytes_total";
/// Name of the counter tracking connections that failed.
pub const FAILURES_TOTAL: &str = "wiremux_connection_failures_total";

/// Direction of a frame relative to this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frames read from the peer.
    Inbound,
    /// Frames written to the peer.
    Outbound,
}

impl Direction {
    /// Label value used for the `direction` label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the open connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_OPEN).increment(1.0);
}

/// Decrement the open connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_OPEN).decrement(1.0);
}

/// Record one frame of `bytes` bytes moving in `direction`.
#[cfg_attr(not(feature = "metrics"), expect(unused_variables, reason = "metrics disabled"))]
pub fn inc_frames(direction: Direction, bytes: usize) {
    #[cfg(feature = "metrics")]
    {
        counter!(FRAMES_TOTAL, "direction" => direction.as_str()).increment(1);
        counter!(BYTES_TOTAL, "direction" => direction.as_str()).increment(bytes as u64);
    }
}

/// Record a connection moving into the failed state.
pub fn inc_failures() {
    #[cfg(feature = "metrics")]
    counter!(FAILURES_TOTAL).increment(1);
}
