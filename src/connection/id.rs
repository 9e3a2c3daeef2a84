//! Connection identity.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one connection.
///
/// `local` is unique within the process and assigned at construction.
/// `server` is the identity the peer assigned during the handshake, when it
/// reports one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    /// Process-unique identifier.
    pub local: u64,
    /// Identifier assigned by the peer.
    pub server: Option<i32>,
}

impl ConnectionId {
    /// Allocate a fresh local identifier with no server identity.
    #[must_use]
    pub fn next_local() -> Self {
        Self {
            local: NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed),
            server: None,
        }
    }

    /// Attach the identity assigned by the peer.
    #[must_use]
    pub fn with_server(self, server: i32) -> Self {
        Self {
            server: Some(server),
            ..self
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.server {
            Some(server) => write!(f, "{}:{server}", self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionId;

    #[test]
    fn local_ids_are_unique() {
        let a = ConnectionId::next_local();
        let b = ConnectionId::next_local();
        assert_ne!(a.local, b.local);
    }

    #[test]
    fn display_includes_server_id_when_known() {
        let id = ConnectionId {
            local: 7,
            server: None,
        };
        assert_eq!(id.to_string(), "7");
        assert_eq!(id.with_server(42).to_string(), "7:42");
    }
}
