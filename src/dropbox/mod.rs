//! Rendezvous between callers awaiting correlated frames and whoever reads
//! them off the wire.
//!
//! A [`Dropbox`] maps correlation ids to either a parked waiter or a frame
//! that arrived before anyone asked for it. Whichever side touches an id
//! first creates the entry; the other side consumes it, so every entry is
//! removed exactly once. A waiter that gives up leaves a marker behind so
//! the reply it was waiting for is discarded rather than stored.
//!
//! [`Dropbox::receive`] layers the "whoever is free reads for everyone"
//! protocol on top. Each caller parks a waiter for its own id, then races
//! that waiter against a single admission permit. The permit holder pulls
//! frames from the shared source and delivers each one to its owner until its
//! own frame shows up, while every other caller stays parked and never
//! touches the source.
//!
//! ```text
//! caller A ──await(1)──┐            ┌──▶ waiter 1 resolved
//! caller B ──await(2)──┼─▶ DashMap ─┤
//! caller C ──await(3)──┘     ▲      └──▶ waiter 3 resolved
//!                            │ deliver
//!        admission holder ───┘ (reads frame 3, 2, 1 ...)
//! ```

use std::{
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    task::{Context, Poll},
};

use dashmap::{DashMap, mapref::entry::Entry};
use log::{debug, warn};
use tokio::sync::{Semaphore, oneshot};
use tokio_util::sync::CancellationToken;

use crate::correlation::CorrelatableFrame;

mod error;

pub use error::{DropboxError, ReceiveError};

/// Table entry for one correlation id.
enum Slot<F> {
    /// A caller is parked; the ticket identifies which one.
    Waiting { ticket: u64, tx: oneshot::Sender<F> },
    /// The frame arrived before anyone asked for it.
    Delivered(F),
    /// The caller gave up; the late frame is dropped on arrival.
    Abandoned,
}

impl<F> Slot<F> {
    fn into_delivered(self) -> Option<F> {
        match self {
            Self::Delivered(frame) => Some(frame),
            Self::Waiting { .. } | Self::Abandoned => None,
        }
    }
}

/// Concurrent correlation table with a single-reader admission permit.
pub struct Dropbox<F: CorrelatableFrame> {
    slots: DashMap<F::Id, Slot<F>>,
    next_ticket: AtomicU64,
    admission: Semaphore,
}

impl<F: CorrelatableFrame> Default for Dropbox<F> {
    fn default() -> Self { Self::new() }
}

impl<F: CorrelatableFrame> Dropbox<F> {
    /// Create an empty, open dropbox.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            next_ticket: AtomicU64::new(0),
            admission: Semaphore::new(1),
        }
    }

    /// Hand an inbound frame to whoever is waiting for its correlation id.
    ///
    /// If nobody has asked for the id yet, the frame is stored until someone
    /// does. A second frame for an id whose first frame has not been consumed
    /// is dropped, as is a frame whose waiter gave up.
    pub fn deliver(&self, frame: F) {
        let id = frame.correlation_id();
        match self.slots.entry(id) {
            Entry::Vacant(entry) => {
                entry.insert(Slot::Delivered(frame));
            }
            Entry::Occupied(entry) => {
                if matches!(entry.get(), Slot::Delivered(_)) {
                    warn!("duplicate frame for unconsumed correlation id: id={id:?}");
                    return;
                }
                match entry.remove() {
                    Slot::Waiting { tx, .. } => {
                        if tx.send(frame).is_err() {
                            debug!("waiter abandoned before delivery; frame discarded: id={id:?}");
                        }
                    }
                    Slot::Abandoned => {
                        debug!("late frame for abandoned waiter discarded: id={id:?}");
                    }
                    Slot::Delivered(_) => {}
                }
            }
        }
    }

    /// Register interest in `id`.
    ///
    /// Returns an already-resolved [`Pending`] if the frame is waiting in the
    /// table, otherwise parks a new waiter. An id whose previous waiter gave
    /// up can be awaited again.
    ///
    /// # Errors
    ///
    /// Returns [`DropboxError::DuplicateWaiter`] if another caller is already
    /// waiting for `id`, and [`DropboxError::Closed`] after [`close`](Self::close).
    pub fn await_frame(&self, id: F::Id) -> Result<Pending<'_, F>, DropboxError<F::Id>> {
        if self.is_closed() {
            return Err(DropboxError::Closed);
        }
        match self.slots.entry(id) {
            Entry::Occupied(mut entry) => {
                if matches!(entry.get(), Slot::Waiting { .. }) {
                    return Err(DropboxError::DuplicateWaiter(id));
                }
                if matches!(entry.get(), Slot::Abandoned) {
                    let (ticket, tx, rx) = self.new_waiter();
                    entry.insert(Slot::Waiting { ticket, tx });
                    return Ok(Pending {
                        dropbox: self,
                        id,
                        state: PendingState::Waiting { ticket, rx },
                    });
                }
                Ok(Pending {
                    dropbox: self,
                    id,
                    state: PendingState::Ready(entry.remove().into_delivered()),
                })
            }
            Entry::Vacant(entry) => {
                let (ticket, tx, rx) = self.new_waiter();
                entry.insert(Slot::Waiting { ticket, tx });
                Ok(Pending {
                    dropbox: self,
                    id,
                    state: PendingState::Waiting { ticket, rx },
                })
            }
        }
    }

    fn new_waiter(&self) -> (u64, oneshot::Sender<F>, oneshot::Receiver<F>) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        (ticket, tx, rx)
    }

    /// Remove and return a frame that was delivered for `id` but not yet
    /// consumed. Parked waiters are left untouched.
    pub fn take(&self, id: F::Id) -> Option<F> {
        self.slots
            .remove_if(&id, |_, slot| matches!(slot, Slot::Delivered(_)))
            .and_then(|(_, slot)| slot.into_delivered())
    }

    /// Drop whatever entry exists for `id`, returning `true` if one did.
    ///
    /// A parked waiter for `id` resolves with [`DropboxError::Closed`].
    pub fn discard(&self, id: F::Id) -> bool { self.slots.remove(&id).is_some() }

    /// Number of entries: parked waiters, unconsumed frames and markers left
    /// by abandoned waiters.
    #[must_use]
    pub fn len(&self) -> usize { self.slots.len() }

    /// Returns `true` when no waiter is parked and no frame is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.slots.is_empty() }

    /// Correlation ids that currently have a parked waiter.
    #[must_use]
    pub fn waiting_ids(&self) -> Vec<F::Id> {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Waiting { .. }))
            .map(|entry| *entry.key())
            .collect()
    }

    /// Close the dropbox.
    ///
    /// The admission permit is closed, every parked waiter resolves with
    /// [`DropboxError::Closed`], and stored frames are dropped. Idempotent.
    pub fn close(&self) {
        self.admission.close();
        self.slots.clear();
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.admission.is_closed() }

    /// Wait for the frame correlated with `id`, reading from the shared
    /// source whenever this caller holds the admission permit.
    ///
    /// `read` yields the next frame off the wire; every frame it yields is
    /// delivered to its owner.
    ///
    /// # Errors
    ///
    /// See [`receive_with`](Self::receive_with).
    pub async fn receive<E, R, Fut>(
        &self,
        id: F::Id,
        cancel: &CancellationToken,
        mut read: R,
    ) -> Result<F, ReceiveError<F::Id, E>>
    where
        R: FnMut() -> Fut,
        Fut: Future<Output = Result<F, E>>,
    {
        self.receive_with(id, cancel, || {
            let next = read();
            async move { next.await.map(|frame| self.deliver(frame)) }
        })
        .await
    }

    /// Wait for the frame correlated with `id`, driving `pump` whenever this
    /// caller holds the admission permit.
    ///
    /// Each call to `pump` must read one frame and [`deliver`](Self::deliver)
    /// it to this dropbox. Use this form when the read has to outlive the
    /// caller, for example when it runs on a spawned task.
    ///
    /// Cancellation is honoured while waiting for the permit or the frame,
    /// and between pumped frames; a pump already in progress always finishes.
    ///
    /// # Errors
    ///
    /// - [`ReceiveError::DuplicateWaiter`] if `id` is already awaited.
    /// - [`ReceiveError::Closed`] if the dropbox is or becomes closed.
    /// - [`ReceiveError::Cancelled`] if `cancel` fires.
    /// - [`ReceiveError::Source`] if `pump` fails. Other parked waiters are not resolved by this
    ///   failure.
    pub async fn receive_with<E, P, Fut>(
        &self,
        id: F::Id,
        cancel: &CancellationToken,
        mut pump: P,
    ) -> Result<F, ReceiveError<F::Id, E>>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let mut pending = self.await_frame(id)?;
        if let Some(frame) = pending.try_take() {
            return Ok(frame);
        }

        let _admission = tokio::select! {
            biased;
            result = &mut pending => return result.map_err(Into::into),
            () = cancel.cancelled() => return Err(ReceiveError::Cancelled),
            permit = self.admission.acquire() => permit.map_err(|_| ReceiveError::Closed)?,
        };

        loop {
            if let Some(frame) = pending.try_take() {
                return Ok(frame);
            }
            if self.is_closed() {
                return Err(ReceiveError::Closed);
            }
            if cancel.is_cancelled() {
                return Err(ReceiveError::Cancelled);
            }
            pump().await.map_err(ReceiveError::Source)?;
        }
    }
}

enum PendingState<F> {
    Ready(Option<F>),
    Waiting {
        ticket: u64,
        rx: oneshot::Receiver<F>,
    },
}

/// Single-assignment future resolving with the frame for one correlation id.
///
/// Dropping an unresolved `Pending` marks its own waiter as abandoned; a
/// frame that arrives for the id afterwards is discarded.
pub struct Pending<'a, F: CorrelatableFrame> {
    dropbox: &'a Dropbox<F>,
    id: F::Id,
    state: PendingState<F>,
}

// No field is structurally pinned.
impl<F: CorrelatableFrame> Unpin for Pending<'_, F> {}

impl<F: CorrelatableFrame> Pending<'_, F> {
    /// Correlation id this waiter is parked on.
    #[must_use]
    pub fn id(&self) -> F::Id { self.id }

    /// Take the frame if it has already been delivered.
    pub fn try_take(&mut self) -> Option<F> {
        match &mut self.state {
            PendingState::Ready(frame) => frame.take(),
            PendingState::Waiting { rx, .. } => rx.try_recv().ok(),
        }
    }
}

impl<F: CorrelatableFrame> Future for Pending<'_, F> {
    type Output = Result<F, DropboxError<F::Id>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            PendingState::Ready(frame) => Poll::Ready(frame.take().ok_or(DropboxError::Closed)),
            PendingState::Waiting { rx, .. } => Pin::new(rx)
                .poll(cx)
                .map(|result| result.map_err(|_| DropboxError::Closed)),
        }
    }
}

impl<F: CorrelatableFrame> Drop for Pending<'_, F> {
    fn drop(&mut self) {
        if let PendingState::Waiting { ticket, .. } = self.state
            && let Some(mut slot) = self.dropbox.slots.get_mut(&self.id)
            && matches!(*slot, Slot::Waiting { ticket: t, .. } if t == ticket)
        {
            *slot = Slot::Abandoned;
        }
    }
}
