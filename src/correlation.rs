//! Traits and helpers for working with correlation identifiers on frames.
//!
//! `CorrelatableFrame` abstracts over frame types that carry a correlation
//! identifier, allowing generic components such as the [`Dropbox`] to route
//! inbound frames without knowing the concrete frame representation.
//!
//! [`Dropbox`]: crate::dropbox::Dropbox

use std::{
    fmt,
    hash::Hash,
    sync::atomic::{AtomicI32, Ordering},
};

/// Access the correlation identifier carried by a frame.
pub trait CorrelatableFrame: Send + 'static {
    /// Identifier type used to match replies to waiters.
    type Id: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Return the correlation identifier this frame answers.
    fn correlation_id(&self) -> Self::Id;
}

/// Source of request identifiers for the layer that issues requests.
///
/// The connection never generates identifiers itself; the session owning the
/// connection holds one `RequestIds` and stamps every outbound request.
///
/// # Examples
///
/// ```
/// use wiremux::correlation::RequestIds;
///
/// let ids = RequestIds::new();
/// let first = ids.next_id();
/// let second = ids.next_id();
/// assert_ne!(first, second);
/// ```
#[derive(Debug)]
pub struct RequestIds(AtomicI32);

impl RequestIds {
    /// Create a source whose first identifier is `1`.
    #[must_use]
    pub fn new() -> Self { Self::starting_at(1) }

    /// Create a source whose first identifier is `first`.
    #[must_use]
    pub fn starting_at(first: i32) -> Self { Self(AtomicI32::new(first)) }

    /// Return the next identifier.
    ///
    /// `Relaxed` ordering suffices: only uniqueness is required, and
    /// `fetch_add` is atomic regardless of ordering. Identifiers wrap on
    /// overflow.
    #[must_use]
    pub fn next_id(&self) -> i32 { self.0.fetch_add(1, Ordering::Relaxed) }
}

impl Default for RequestIds {
    fn default() -> Self { Self::new() }
}
