//! A single connection multiplexing correlated request/reply exchanges.
//!
//! Any number of tasks may call [`Connection::send`] and
//! [`Connection::receive`] at once. Writes pass through a gate one batch at a
//! time; reads are performed by whichever receiver currently holds the
//! dropbox admission permit, which delivers every frame it reads to the
//! caller waiting for that frame's correlation id.
//!
//! ```text
//!            send ──▶ write gate ──▶ ┌────────┐
//!                                    │ stream │
//! receive(id) ──▶ dropbox ◀── read ──└────────┘
//! ```
//!
//! A failed read or write fails the whole connection. Only the caller whose
//! I/O failed sees the cause; later callers get
//! [`ConnectionError::AlreadyFailed`], and callers already parked on other
//! correlation ids stay parked until they are cancelled or the connection is
//! disposed. Watch [`Connection::subscribe`] to learn about the failure.

mod counter;
mod error;
mod events;
mod id;
mod io;
mod lifecycle;
mod settings;
mod state;

use std::{
    sync::{
        Arc,
        OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

pub use counter::open_connection_count;
pub use error::{ConnectCause, ConnectionError};
pub use events::{ConnectionEvent, ConnectionObserver};
pub use id::ConnectionId;
use io::{FrameReader, FrameWriter};
use lifecycle::Lifecycle;
use log::{debug, info};
pub use settings::ConnectionSettings;
pub use state::{ConnectionState, StateCell};
use tokio::sync::{OnceCell, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    dropbox::Dropbox,
    frame::{Frame, HEADER_LEN},
    handshake::{ConnectionDescription, ConnectionInitializer, NoHandshake},
    transport::StreamFactory,
};

/// One physical connection shared by concurrent callers.
///
/// Created in [`ConnectionState::Initial`]; [`open`](Self::open) establishes
/// the stream and runs the handshake. Dropping the connection disposes it.
///
/// # Examples
///
/// ```no_run
/// use std::net::SocketAddr;
///
/// use tokio_util::sync::CancellationToken;
/// use wiremux::{
///     connection::{Connection, ConnectionError},
///     frame::{Frame, FrameHeader},
///     transport::TcpStreamFactory,
/// };
///
/// # async fn run() -> Result<(), ConnectionError> {
/// let addr: SocketAddr = "127.0.0.1:27017".parse().expect("valid address");
/// let connection = Connection::new(TcpStreamFactory::default(), addr);
/// let cancel = CancellationToken::new();
/// connection.open(&cancel).await?;
///
/// let request = Frame::build(FrameHeader::request(7, 2004), b"ping").expect("frame fits");
/// connection.send(&[request], &cancel).await?;
/// let reply = connection.receive(7, &cancel).await?;
/// assert_eq!(reply.response_to(), 7);
/// # Ok(())
/// # }
/// ```
pub struct Connection<S: StreamFactory> {
    lifecycle: Arc<Lifecycle>,
    factory: S,
    endpoint: S::Endpoint,
    initializer: Box<dyn ConnectionInitializer<S>>,
    reader: FrameReader<S::Stream>,
    writer: FrameWriter<S::Stream>,
    dropbox: Arc<Dropbox<Frame>>,
    opened: OnceCell<Result<(), ConnectionError>>,
    description: OnceLock<ConnectionDescription>,
    max_frame_length: AtomicUsize,
}

/// Builder for [`Connection`].
pub struct ConnectionBuilder<S: StreamFactory> {
    factory: S,
    endpoint: S::Endpoint,
    settings: ConnectionSettings,
    initializer: Box<dyn ConnectionInitializer<S>>,
    observer: Option<Arc<dyn ConnectionObserver>>,
}

impl<S: StreamFactory> ConnectionBuilder<S> {
    /// Replace the default settings.
    #[must_use]
    pub fn settings(mut self, settings: ConnectionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Run `initializer` during [`Connection::open`] instead of skipping the
    /// handshake.
    #[must_use]
    pub fn initializer(mut self, initializer: impl ConnectionInitializer<S> + 'static) -> Self {
        self.initializer = Box::new(initializer);
        self
    }

    /// Report lifecycle and traffic events to `observer`.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Create the connection in [`ConnectionState::Initial`].
    #[must_use]
    pub fn build(self) -> Connection<S> {
        let max_frame_length = self.settings.max_frame_length();
        Connection {
            lifecycle: Arc::new(Lifecycle::new(self.settings, self.observer)),
            factory: self.factory,
            endpoint: self.endpoint,
            initializer: self.initializer,
            reader: FrameReader::new(),
            writer: FrameWriter::new(),
            dropbox: Arc::new(Dropbox::new()),
            opened: OnceCell::new(),
            description: OnceLock::new(),
            max_frame_length: AtomicUsize::new(max_frame_length),
        }
    }
}

/// Fails the connection if an `open` is dropped before it finishes.
struct OpenGuard<'a> {
    lifecycle: &'a Lifecycle,
    armed: bool,
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let error = ConnectionError::Cancelled;
            if self.lifecycle.fail(error.clone()) {
                self.lifecycle
                    .emit(&ConnectionEvent::OpeningFailed { error: &error });
            }
        }
    }
}

impl<S: StreamFactory> Connection<S> {
    /// Start building a connection to `endpoint`.
    #[must_use]
    pub fn builder(factory: S, endpoint: S::Endpoint) -> ConnectionBuilder<S> {
        ConnectionBuilder {
            factory,
            endpoint,
            settings: ConnectionSettings::default(),
            initializer: Box::new(NoHandshake),
            observer: None,
        }
    }

    /// Create a connection with default settings and no handshake.
    #[must_use]
    pub fn new(factory: S, endpoint: S::Endpoint) -> Self { Self::builder(factory, endpoint).build() }

    /// Identity of this connection; includes the server identity once the
    /// handshake reports one.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.lifecycle.id() }

    /// Where this connection connects to.
    #[must_use]
    pub fn endpoint(&self) -> &S::Endpoint { &self.endpoint }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.lifecycle.state() }

    /// Configured limits.
    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings { self.lifecycle.settings() }

    /// What the handshake reported, once open.
    #[must_use]
    pub fn description(&self) -> Option<&ConnectionDescription> { self.description.get() }

    /// The error that failed this connection, if it failed.
    ///
    /// Always `Some` once [`state`](Self::state) reads
    /// [`ConnectionState::Failed`]. A failure that loses a race with
    /// [`dispose`](Self::dispose) may still be reported here.
    #[must_use]
    pub fn failure(&self) -> Option<&ConnectionError> { self.lifecycle.failure() }

    /// Receive every state change from now on.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> { self.lifecycle.subscribe() }

    /// When `open` started.
    #[must_use]
    pub fn opened_at(&self) -> Option<Instant> { self.lifecycle.opened_at() }

    /// When a frame was last read or written.
    #[must_use]
    pub fn last_used_at(&self) -> Option<Instant> { self.lifecycle.last_used_at() }

    /// Largest inbound frame currently accepted.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length.load(Ordering::Relaxed) }

    /// Returns `true` if the connection should no longer be used at `now`.
    ///
    /// That is the case past `opened_at + max_lifetime`, past
    /// `last_used_at + max_idle_time`, or once failed or disposed.
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool { self.lifecycle.is_expired_at(now) }

    /// [`is_expired_at`](Self::is_expired_at) for the current instant.
    #[must_use]
    pub fn is_expired(&self) -> bool { self.is_expired_at(Instant::now()) }

    /// Establish the stream and run the handshake.
    ///
    /// Only the first call does any work; concurrent and later callers wait
    /// for and share its outcome. `cancel` applies to connecting and to the
    /// handshake. Dropping the call that is doing the work fails the
    /// connection.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::ConnectFailed`] if the stream or handshake fails.
    /// - [`ConnectionError::Cancelled`] if `cancel` fires first.
    /// - [`ConnectionError::AlreadyClosed`] if disposed meanwhile.
    pub async fn open(&self, cancel: &CancellationToken) -> Result<(), ConnectionError> {
        self.opened
            .get_or_init(|| self.open_once(cancel))
            .await
            .clone()
    }

    async fn open_once(&self, cancel: &CancellationToken) -> Result<(), ConnectionError> {
        self.lifecycle
            .advance(ConnectionState::Initial, ConnectionState::Connecting)?;
        let started = Instant::now();
        self.lifecycle.mark_opening(started);
        self.lifecycle.emit(&ConnectionEvent::Opening);

        let mut guard = OpenGuard {
            lifecycle: &self.lifecycle,
            armed: true,
        };
        let span = tracing::info_span!(
            "connection.open",
            connection.id = self.lifecycle.id().local,
            endpoint = ?self.endpoint
        );
        let result = self.establish(cancel).instrument(span).await;
        guard.armed = false;

        match result {
            Ok(()) => {
                let duration = started.elapsed();
                info!(
                    "connection opened: id={}, endpoint={:?}, open_connections={}",
                    self.id(),
                    self.endpoint,
                    open_connection_count()
                );
                self.lifecycle.emit(&ConnectionEvent::Opened { duration });
                Ok(())
            }
            Err(error) => {
                self.lifecycle.fail(error.clone());
                self.release_if_disposed();
                self.lifecycle
                    .emit(&ConnectionEvent::OpeningFailed { error: &error });
                Err(error)
            }
        }
    }

    async fn establish(&self, cancel: &CancellationToken) -> Result<(), ConnectionError> {
        let stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ConnectionError::Cancelled),
            () = self.lifecycle.background().cancelled() => return Err(ConnectionError::AlreadyClosed),
            stream = self.factory.create_stream(&self.endpoint, cancel) => {
                stream.map_err(ConnectionError::connect_failed)?
            }
        };
        let (read, write) = tokio::io::split(stream);
        self.reader.attach(read).await;
        self.writer.attach(write).await;
        self.lifecycle
            .advance(ConnectionState::Connecting, ConnectionState::Initializing)?;

        let description = self.initializer.initialize(self, cancel).await?;
        if let Some(limit) = description.max_message_size {
            self.max_frame_length
                .fetch_min(limit.max(HEADER_LEN), Ordering::Relaxed);
        }
        if let Some(server) = description.connection_id.server {
            self.lifecycle.set_server_id(server);
        }
        debug!(
            "handshake complete: id={}, server_version={:?}",
            self.id(),
            description.server_version
        );
        let _ = self.description.set(description);

        self.lifecycle
            .advance(ConnectionState::Initializing, ConnectionState::Open)
    }

    /// Write `frames` back to back as one uninterrupted transfer.
    ///
    /// `cancel` is honoured only while waiting for the write gate; once
    /// bytes start moving the write runs to completion. Returns the number
    /// of bytes written.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::IoFailed`] if the write fails; the connection fails with it.
    /// - [`ConnectionError::Cancelled`] if `cancel` fires before the gate opens.
    /// - [`ConnectionError::AlreadyFailed`], [`ConnectionError::AlreadyClosed`] or
    ///   [`ConnectionError::NotOpen`] depending on the state.
    pub async fn send(
        &self,
        frames: &[Frame],
        cancel: &CancellationToken,
    ) -> Result<usize, ConnectionError> {
        self.lifecycle.ensure_traffic()?;
        if frames.is_empty() {
            return Ok(0);
        }
        let started = Instant::now();
        self.lifecycle.emit(&ConnectionEvent::SendingMessages {
            frames: frames.len(),
        });

        let span = tracing::debug_span!(
            "connection.send",
            connection.id = self.lifecycle.id().local,
            frames = frames.len()
        );
        let result = self
            .writer
            .write(frames.to_vec(), cancel, Arc::clone(&self.lifecycle))
            .instrument(span)
            .await;

        match &result {
            Ok(bytes) => self.lifecycle.emit(&ConnectionEvent::SentMessages {
                bytes: *bytes,
                duration: started.elapsed(),
            }),
            Err(error) => self
                .lifecycle
                .emit(&ConnectionEvent::SendingMessagesFailed { error }),
        }
        result
    }

    /// Wait for the frame whose correlation id is `response_to`.
    ///
    /// Returns at once if that frame was already read on behalf of another
    /// caller. Otherwise the caller either waits for another reader to
    /// deliver it or becomes the reader itself, delivering every frame it
    /// reads to its owner until its own arrives.
    ///
    /// `cancel` is honoured while waiting and between frames, never part way
    /// through one.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::IoFailed`] or [`ConnectionError::ProtocolDesync`] if this caller's
    ///   read fails; the connection fails with it.
    /// - [`ConnectionError::AlreadyFailed`] if the connection failed before this caller had
    ///   to read.
    /// - [`ConnectionError::AlreadyClosed`] if disposed before or while waiting.
    /// - [`ConnectionError::DuplicateWaiter`] if `response_to` is already awaited.
    /// - [`ConnectionError::Cancelled`] if `cancel` fires.
    pub async fn receive(
        &self,
        response_to: i32,
        cancel: &CancellationToken,
    ) -> Result<Frame, ConnectionError> {
        self.lifecycle.ensure_traffic()?;
        let started = Instant::now();
        self.lifecycle
            .emit(&ConnectionEvent::ReceivingMessage { response_to });

        let span = tracing::debug_span!(
            "connection.receive",
            connection.id = self.lifecycle.id().local,
            response_to
        );
        let result = self
            .dropbox
            .receive_with(response_to, cancel, move || self.read_next())
            .instrument(span)
            .await
            .map_err(ConnectionError::from);

        match &result {
            Ok(frame) => self.lifecycle.emit(&ConnectionEvent::ReceivedMessage {
                response_to,
                bytes: frame.as_bytes().len(),
                duration: started.elapsed(),
            }),
            Err(error) => self
                .lifecycle
                .emit(&ConnectionEvent::ReceivingMessageFailed { response_to, error }),
        }
        result
    }

    async fn read_next(&self) -> Result<(), ConnectionError> {
        self.lifecycle.ensure_traffic()?;
        self.reader
            .read_next(
                Arc::clone(&self.dropbox),
                Arc::clone(&self.lifecycle),
                self.max_frame_length(),
            )
            .await
    }

    /// Fail the connection with `error`.
    ///
    /// The first call moves the connection to [`ConnectionState::Failed`]
    /// and notifies once; later calls, and calls after disposal, do nothing.
    /// Returns `true` if this call failed the connection.
    pub fn fail(&self, error: ConnectionError) -> bool { self.lifecycle.fail(error) }

    /// Close the connection.
    ///
    /// Cancels in-flight transfers, releases every parked receiver with
    /// [`ConnectionError::AlreadyClosed`] and drops the stream. Idempotent.
    pub fn dispose(&self) {
        let Some(previous) = self.lifecycle.dispose() else {
            return;
        };
        self.lifecycle.emit(&ConnectionEvent::Closing);
        self.dropbox.close();
        self.reader.release();
        self.writer.release();
        info!(
            "connection disposed: id={}, previous={previous}, open_connections={}",
            self.id(),
            open_connection_count()
        );
        self.lifecycle.emit(&ConnectionEvent::Closed {
            duration: self.lifecycle.age(),
        });
    }

    fn release_if_disposed(&self) {
        if self.state() == ConnectionState::Disposed {
            self.reader.release();
            self.writer.release();
        }
    }
}

impl<S: StreamFactory> Drop for Connection<S> {
    fn drop(&mut self) { self.dispose(); }
}

impl<S: StreamFactory> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests;
