//! In-memory [`StreamFactory`] backed by `tokio::io::duplex` pipes.

use std::{
    io,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::{io::DuplexStream, sync::mpsc};
use tokio_util::sync::CancellationToken;
use wiremux::transport::StreamFactory;

/// Creates a fresh duplex pipe per connection attempt, handing the far end
/// to the paired [`PeerEnds`].
#[derive(Debug)]
pub struct DuplexFactory {
    capacity: usize,
    peers: Option<mpsc::UnboundedSender<DuplexStream>>,
    attempts: AtomicUsize,
}

/// Far ends of the pipes created by a [`DuplexFactory`].
#[derive(Debug)]
pub struct PeerEnds(mpsc::UnboundedReceiver<DuplexStream>);

impl DuplexFactory {
    /// Create a factory whose pipes buffer `capacity` bytes in each
    /// direction.
    ///
    /// A small capacity forces writes to complete in several pieces.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, PeerEnds) {
        let (tx, rx) = mpsc::unbounded_channel();
        let factory = Self {
            capacity,
            peers: Some(tx),
            attempts: AtomicUsize::new(0),
        };
        (factory, PeerEnds(rx))
    }

    /// Create a factory that refuses every connection attempt.
    #[must_use]
    pub fn refusing() -> Self {
        Self {
            capacity: 0,
            peers: None,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of times `create_stream` has been called.
    #[must_use]
    pub fn attempts(&self) -> usize { self.attempts.load(Ordering::SeqCst) }
}

impl PeerEnds {
    /// Wait for the far end of the next pipe.
    pub async fn accept(&mut self) -> Option<DuplexStream> { self.0.recv().await }
}

#[async_trait]
impl StreamFactory for DuplexFactory {
    type Endpoint = &'static str;
    type Stream = DuplexStream;

    async fn create_stream(
        &self,
        _endpoint: &&'static str,
        cancel: &CancellationToken,
    ) -> io::Result<DuplexStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "connect cancelled"));
        }
        let peers = self
            .peers
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))?;
        let (near, far) = tokio::io::duplex(self.capacity);
        peers
            .send(far)
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;
        Ok(near)
    }
}
