//! Process-wide count of open connections.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static OPEN_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

/// Tracks whether one connection is currently counted as open.
///
/// The count goes up once when the connection opens and down once when it
/// fails or is disposed, whichever happens first.
#[derive(Debug, Default)]
pub(super) struct OpenCount(AtomicBool);

impl OpenCount {
    pub(super) fn mark_open(&self) {
        if !self.0.swap(true, Ordering::AcqRel) {
            OPEN_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
            crate::metrics::inc_connections();
        }
    }

    pub(super) fn mark_closed(&self) {
        if self.0.swap(false, Ordering::AcqRel) {
            OPEN_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
            crate::metrics::dec_connections();
        }
    }
}

/// Number of connections in this process that are currently open.
#[must_use]
pub fn open_connection_count() -> u64 { OPEN_CONNECTIONS.load(Ordering::Relaxed) }
