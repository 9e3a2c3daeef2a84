//! Lifecycle and traffic notifications for an optional observer.

use std::{fmt, time::Duration};

use super::{ConnectionError, ConnectionId};

/// Something that happened on a connection.
#[derive(Clone, Copy, Debug)]
pub enum ConnectionEvent<'a> {
    /// `open` started.
    Opening,
    /// The handshake completed.
    Opened {
        /// Time spent connecting and initialising.
        duration: Duration,
    },
    /// `open` failed.
    OpeningFailed {
        /// Why it failed.
        error: &'a ConnectionError,
    },
    /// The connection moved into the failed state.
    Failed {
        /// The error that failed it.
        error: &'a ConnectionError,
    },
    /// Disposal started.
    Closing,
    /// Disposal finished; the stream has been released.
    Closed {
        /// Time since the connection started opening.
        duration: Duration,
    },
    /// A batch of frames is about to be written.
    SendingMessages {
        /// Frames in the batch.
        frames: usize,
    },
    /// A batch of frames was written and flushed.
    SentMessages {
        /// Bytes written.
        bytes: usize,
        /// Time spent waiting for the write gate and writing.
        duration: Duration,
    },
    /// Writing a batch failed.
    SendingMessagesFailed {
        /// Why it failed.
        error: &'a ConnectionError,
    },
    /// A caller started waiting for a reply.
    ReceivingMessage {
        /// Correlation id awaited.
        response_to: i32,
    },
    /// A caller received its reply.
    ReceivedMessage {
        /// Correlation id awaited.
        response_to: i32,
        /// Length of the reply frame.
        bytes: usize,
        /// Time spent waiting.
        duration: Duration,
    },
    /// A caller's receive failed.
    ReceivingMessageFailed {
        /// Correlation id awaited.
        response_to: i32,
        /// Why it failed.
        error: &'a ConnectionError,
    },
}

/// Receives [`ConnectionEvent`]s.
///
/// Observers run inline on the caller's task and must not block. Having no
/// observer does not change connection behaviour.
pub trait ConnectionObserver: Send + Sync {
    /// Called once per event.
    fn on_event(&self, connection: ConnectionId, event: &ConnectionEvent<'_>);
}

impl<F> ConnectionObserver for F
where
    F: Fn(ConnectionId, &ConnectionEvent<'_>) + Send + Sync,
{
    fn on_event(&self, connection: ConnectionId, event: &ConnectionEvent<'_>) {
        self(connection, event);
    }
}

impl fmt::Display for ConnectionEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Opening => "opening",
            Self::Opened { .. } => "opened",
            Self::OpeningFailed { .. } => "opening_failed",
            Self::Failed { .. } => "failed",
            Self::Closing => "closing",
            Self::Closed { .. } => "closed",
            Self::SendingMessages { .. } => "sending_messages",
            Self::SentMessages { .. } => "sent_messages",
            Self::SendingMessagesFailed { .. } => "sending_messages_failed",
            Self::ReceivingMessage { .. } => "receiving_message",
            Self::ReceivedMessage { .. } => "received_message",
            Self::ReceivingMessageFailed { .. } => "receiving_message_failed",
        };
        f.write_str(name)
    }
}
