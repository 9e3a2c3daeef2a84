//! Stream halves and the tasks that move frames across them.
//!
//! Each half lives behind an async mutex. Holding the read half's lock is
//! what "in-flight read" means, and the write half's lock is the write gate.
//! Once a transfer starts it runs on its own task holding the lock, so a
//! caller giving up cannot leave half a frame on the wire or half a frame
//! unread. Only disposal stops a transfer part way, and nothing reads or
//! writes after that.

use std::{io, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf},
    sync::Mutex,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use super::{ConnectionError, lifecycle::Lifecycle};
use crate::{
    codec,
    dropbox::Dropbox,
    frame::Frame,
    metrics::{self, Direction},
};

/// Outcome of a finished transfer task.
fn join_outcome<T>(
    joined: Result<Result<T, ConnectionError>, tokio::task::JoinError>,
) -> Result<T, ConnectionError> {
    joined.unwrap_or_else(|join| Err(io::Error::other(join).into()))
}

pub(super) struct FrameReader<S> {
    half: Arc<Mutex<Option<ReadHalf<S>>>>,
}

impl<S> FrameReader<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub(super) fn new() -> Self {
        Self {
            half: Arc::new(Mutex::new(None)),
        }
    }

    pub(super) async fn attach(&self, half: ReadHalf<S>) { *self.half.lock().await = Some(half); }

    /// Drop the half unless a read is in flight; that read drops it itself
    /// once disposal cancels it.
    pub(super) fn release(&self) {
        if let Ok(mut half) = self.half.try_lock() {
            half.take();
        }
    }

    /// Read one frame on a dedicated task and deliver it to `dropbox`.
    ///
    /// A read failure fails the connection before the task returns.
    pub(super) async fn read_next(
        &self,
        dropbox: Arc<Dropbox<Frame>>,
        lifecycle: Arc<Lifecycle>,
        max_frame_length: usize,
    ) -> Result<(), ConnectionError> {
        let half = Arc::clone(&self.half);
        let task: JoinHandle<Result<(), ConnectionError>> = tokio::spawn(async move {
            let mut guard = half.lock_owned().await;
            lifecycle.ensure_traffic()?;
            let background = lifecycle.background().clone();
            let outcome = {
                let reader = guard.as_mut().ok_or(ConnectionError::AlreadyClosed)?;
                tokio::select! {
                    biased;
                    () = background.cancelled() => None,
                    result = codec::read_frame(reader, max_frame_length) => Some(result),
                }
            };
            let Some(result) = outcome else {
                guard.take();
                return Err(ConnectionError::AlreadyClosed);
            };
            match result {
                Ok(frame) => {
                    lifecycle.touch();
                    metrics::inc_frames(Direction::Inbound, frame.as_bytes().len());
                    dropbox.deliver(frame);
                    Ok(())
                }
                Err(error) => {
                    let error = ConnectionError::from(error);
                    lifecycle.fail(error.clone());
                    Err(error)
                }
            }
        });
        join_outcome(task.await)
    }
}

pub(super) struct FrameWriter<S> {
    half: Arc<Mutex<Option<WriteHalf<S>>>>,
}

impl<S> FrameWriter<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub(super) fn new() -> Self {
        Self {
            half: Arc::new(Mutex::new(None)),
        }
    }

    pub(super) async fn attach(&self, half: WriteHalf<S>) { *self.half.lock().await = Some(half); }

    pub(super) fn release(&self) {
        if let Ok(mut half) = self.half.try_lock() {
            half.take();
        }
    }

    /// Wait for the write gate, then write `frames` as one transfer.
    ///
    /// `cancel` is honoured only while waiting for the gate. Returns the
    /// number of bytes written; a write failure fails the connection.
    pub(super) async fn write(
        &self,
        frames: Vec<Frame>,
        cancel: &CancellationToken,
        lifecycle: Arc<Lifecycle>,
    ) -> Result<usize, ConnectionError> {
        let mut guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ConnectionError::Cancelled),
            guard = Arc::clone(&self.half).lock_owned() => guard,
        };
        let task: JoinHandle<Result<usize, ConnectionError>> = tokio::spawn(async move {
            lifecycle.ensure_traffic()?;
            let background = lifecycle.background().clone();
            let outcome = {
                let writer = guard.as_mut().ok_or(ConnectionError::AlreadyClosed)?;
                tokio::select! {
                    biased;
                    () = background.cancelled() => None,
                    result = codec::write_frames(writer, &frames) => Some(result),
                }
            };
            let Some(result) = outcome else {
                guard.take();
                return Err(ConnectionError::AlreadyClosed);
            };
            match result {
                Ok(bytes) => {
                    lifecycle.touch();
                    for frame in &frames {
                        metrics::inc_frames(Direction::Outbound, frame.as_bytes().len());
                    }
                    Ok(bytes)
                }
                Err(error) => {
                    let error = ConnectionError::from(error);
                    lifecycle.fail(error.clone());
                    Err(error)
                }
            }
        });
        join_outcome(task.await)
    }
}
