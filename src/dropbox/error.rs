//! Errors reported by the [`Dropbox`](super::Dropbox).

use std::fmt;

use thiserror::Error;

/// Errors raised when registering or resolving a waiter.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DropboxError<I: fmt::Debug> {
    /// Another caller is already waiting for this correlation id.
    #[error("correlation id {0:?} already has a waiter")]
    DuplicateWaiter(I),
    /// The dropbox was closed; no frame will ever arrive.
    #[error("dropbox closed")]
    Closed,
}

/// Errors returned by [`Dropbox::receive`](super::Dropbox::receive).
///
/// `E` is the error type of the frame source driven by whichever caller holds
/// the admission permit.
#[derive(Debug, Error)]
pub enum ReceiveError<I: fmt::Debug, E> {
    /// Another caller is already waiting for this correlation id.
    #[error("correlation id {0:?} already has a waiter")]
    DuplicateWaiter(I),
    /// The dropbox was closed while waiting.
    #[error("dropbox closed")]
    Closed,
    /// The caller's cancellation token fired between frames.
    #[error("receive cancelled")]
    Cancelled,
    /// Reading the next frame failed.
    #[error("reading next frame failed")]
    Source(#[source] E),
}

impl<I: fmt::Debug, E> From<DropboxError<I>> for ReceiveError<I, E> {
    fn from(error: DropboxError<I>) -> Self {
        match error {
            DropboxError::DuplicateWaiter(id) => Self::DuplicateWaiter(id),
            DropboxError::Closed => Self::Closed,
        }
    }
}
