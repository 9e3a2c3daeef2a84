//! Errors surfaced by [`Connection`](super::Connection) operations.

use std::{error::Error as StdError, io, sync::Arc};

use thiserror::Error;

use super::ConnectionState;
use crate::{
    codec::{CodecError, FramingError},
    dropbox::{DropboxError, ReceiveError},
};

/// Boxed cause of a failed open, shared between every caller of
/// [`Connection::open`](super::Connection::open).
pub type ConnectCause = Arc<dyn StdError + Send + Sync>;

/// Failure of a connection operation.
///
/// Cloning is cheap: underlying causes sit behind [`Arc`], so every
/// concurrent caller of [`open`](super::Connection::open) and
/// [`failure`](super::Connection::failure) sees the same error.
#[derive(Clone, Debug, Error)]
pub enum ConnectionError {
    /// The stream could not be established or the handshake failed.
    #[error("failed to open connection: {0}")]
    ConnectFailed(#[source] ConnectCause),

    /// A read or write on the open stream failed.
    #[error("connection I/O failed: {0}")]
    IoFailed(#[source] Arc<io::Error>),

    /// The peer sent a header the codec cannot trust.
    #[error("protocol desynchronised: {0}")]
    ProtocolDesync(#[source] FramingError),

    /// The connection has been disposed.
    #[error("connection is closed")]
    AlreadyClosed,

    /// The connection failed earlier.
    #[error("connection has failed")]
    AlreadyFailed,

    /// The connection has not finished opening.
    #[error("connection is not open (state: {0})")]
    NotOpen(ConnectionState),

    /// A lifecycle transition was attempted from the wrong state.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// State observed.
        from: ConnectionState,
        /// State requested.
        to: ConnectionState,
    },

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Another caller is already waiting for this correlation id.
    #[error("correlation id {0} is already awaited")]
    DuplicateWaiter(i32),
}

impl ConnectionError {
    /// Wrap any error as [`ConnectionError::ConnectFailed`].
    pub fn connect_failed(cause: impl StdError + Send + Sync + 'static) -> Self {
        Self::ConnectFailed(Arc::new(cause))
    }

    /// Returns `true` for errors that fail the connection when they occur
    /// on its stream.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed(_) | Self::IoFailed(_) | Self::ProtocolDesync(_)
        )
    }

    /// Error reported to callers arriving after the connection reached
    /// `state`.
    pub(crate) fn for_state(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Failed => Self::AlreadyFailed,
            ConnectionState::Disposed => Self::AlreadyClosed,
            other => Self::NotOpen(other),
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(error: io::Error) -> Self { Self::IoFailed(Arc::new(error)) }
}

impl From<CodecError> for ConnectionError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Framing(inner) => Self::ProtocolDesync(inner),
            other => Self::IoFailed(Arc::new(other.into())),
        }
    }
}

impl From<DropboxError<i32>> for ConnectionError {
    fn from(error: DropboxError<i32>) -> Self {
        match error {
            DropboxError::DuplicateWaiter(id) => Self::DuplicateWaiter(id),
            DropboxError::Closed => Self::AlreadyClosed,
        }
    }
}

impl From<ReceiveError<i32, ConnectionError>> for ConnectionError {
    fn from(error: ReceiveError<i32, ConnectionError>) -> Self {
        match error {
            ReceiveError::DuplicateWaiter(id) => Self::DuplicateWaiter(id),
            ReceiveError::Closed => Self::AlreadyClosed,
            ReceiveError::Cancelled => Self::Cancelled,
            ReceiveError::Source(inner) => inner,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::codec::EofError;

    #[rstest]
    #[case(ConnectionState::Failed, "connection has failed")]
    #[case(ConnectionState::Disposed, "connection is closed")]
    #[case(ConnectionState::Connecting, "connection is not open (state: connecting)")]
    fn state_errors_name_the_state(#[case] state: ConnectionState, #[case] message: &str) {
        assert_eq!(ConnectionError::for_state(state).to_string(), message);
    }

    #[test]
    fn framing_errors_become_desync() {
        let err = ConnectionError::from(CodecError::Framing(FramingError::TooShort {
            length: 3,
            min: 16,
        }));
        assert!(matches!(err, ConnectionError::ProtocolDesync(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn eof_is_an_io_failure() {
        let err = ConnectionError::from(CodecError::Eof(EofError::CleanClose));
        let ConnectionError::IoFailed(inner) = err else {
            panic!("expected IoFailed");
        };
        assert_eq!(inner.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn cancellation_is_not_fatal() {
        assert!(!ConnectionError::Cancelled.is_fatal());
        assert!(!ConnectionError::AlreadyFailed.is_fatal());
    }
}
