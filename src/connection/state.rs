//! Lifecycle states and the atomic cell that guards transitions between them.
//!
//! States are ordered: anything past [`ConnectionState::Open`] is terminal.
//! Every transition is a compare-and-swap so concurrent callers can never
//! both believe they moved the connection out of the same state.

use std::fmt;

#[cfg(loom)]
use loom::sync::atomic::{AtomicU8, Ordering};
#[cfg(not(loom))]
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a [`Connection`](super::Connection).
///
/// ```text
/// Initial → Connecting → Initializing → Open
///               │             │           │
///               └─────────────┴───────────┴──▶ Failed
///
/// any state ──▶ Disposed
/// ```
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    /// Created but never opened.
    Initial = 0,
    /// Establishing the byte stream.
    Connecting = 1,
    /// Stream established; the handshake is running.
    Initializing = 2,
    /// Ready for traffic.
    Open = 3,
    /// A fatal error occurred.
    Failed = 4,
    /// Closed by its owner.
    Disposed = 5,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initial,
            1 => Self::Connecting,
            2 => Self::Initializing,
            3 => Self::Open,
            4 => Self::Failed,
            _ => Self::Disposed,
        }
    }

    /// Returns `true` for [`Failed`](Self::Failed) and
    /// [`Disposed`](Self::Disposed).
    #[must_use]
    pub fn is_terminal(self) -> bool { self > Self::Open }

    /// Returns `true` when frames may be exchanged: during the handshake and
    /// once open.
    #[must_use]
    pub fn carries_traffic(self) -> bool { matches!(self, Self::Initializing | Self::Open) }

    /// Returns `true` when `self → Failed` is a legal transition.
    #[must_use]
    pub fn can_fail(self) -> bool {
        matches!(self, Self::Connecting | Self::Initializing | Self::Open)
    }

    /// Returns `true` when `self → next` is a legal lifecycle step.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        match next {
            Self::Failed => self.can_fail(),
            Self::Disposed => self != Self::Disposed,
            _ => matches!(
                (self, next),
                (Self::Initial, Self::Connecting)
                    | (Self::Connecting, Self::Initializing)
                    | (Self::Initializing, Self::Open)
            ),
        }
    }

    /// Lower-case name used in logs and metrics labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Connecting => "connecting",
            Self::Initializing => "initializing",
            Self::Open => "open",
            Self::Failed => "failed",
            Self::Disposed => "disposed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Atomic holder for a [`ConnectionState`].
///
/// # Examples
///
/// ```
/// use wiremux::connection::{ConnectionState, StateCell};
///
/// let cell = StateCell::new();
/// assert!(cell.transition(ConnectionState::Initial, ConnectionState::Connecting).is_ok());
/// assert_eq!(
///     cell.transition(ConnectionState::Initial, ConnectionState::Connecting),
///     Err(ConnectionState::Connecting)
/// );
/// assert_eq!(cell.fail(), Ok(ConnectionState::Connecting));
/// assert_eq!(cell.dispose(), Some(ConnectionState::Failed));
/// assert_eq!(cell.dispose(), None);
/// ```
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Create a cell in [`ConnectionState::Initial`].
    #[must_use]
    pub fn new() -> Self { Self(AtomicU8::new(ConnectionState::Initial as u8)) }

    /// Current state.
    #[must_use]
    pub fn load(&self) -> ConnectionState { ConnectionState::from_u8(self.0.load(Ordering::Acquire)) }

    /// Move from `from` to `to` if the cell still holds `from`.
    ///
    /// # Errors
    ///
    /// Returns the state actually observed when it differs from `from`.
    pub fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ConnectionState::from_u8)
    }

    /// Move into [`ConnectionState::Failed`] from any state that may fail.
    ///
    /// Returns the state the cell left. Exactly one of any number of
    /// concurrent callers succeeds.
    ///
    /// # Errors
    ///
    /// Returns the observed state when it is terminal or
    /// [`ConnectionState::Initial`].
    pub fn fail(&self) -> Result<ConnectionState, ConnectionState> {
        let mut current = self.load();
        loop {
            if !current.can_fail() {
                return Err(current);
            }
            match self.transition(current, ConnectionState::Failed) {
                Ok(()) => return Ok(current),
                Err(observed) => current = observed,
            }
        }
    }

    /// Move into [`ConnectionState::Disposed`].
    ///
    /// Returns the previous state, or `None` if the cell was already
    /// disposed.
    pub fn dispose(&self) -> Option<ConnectionState> {
        let previous =
            ConnectionState::from_u8(self.0.swap(ConnectionState::Disposed as u8, Ordering::AcqRel));
        (previous != ConnectionState::Disposed).then_some(previous)
    }
}

impl Default for StateCell {
    fn default() -> Self { Self::new() }
}
