//! Establishing the byte stream a connection runs over.
//!
//! A [`Connection`](crate::connection::Connection) never dials anything
//! itself; it asks a [`StreamFactory`] for a duplex stream when it opens.
//! [`TcpStreamFactory`] covers plain TCP. Tests substitute in-memory
//! streams.

use std::{io, net::SocketAddr, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use socket2::{SockRef, TcpKeepalive};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpSocket, TcpStream},
};
use tokio_util::sync::CancellationToken;

/// Creates the duplex byte stream for a connection.
#[async_trait]
pub trait StreamFactory: Send + Sync + 'static {
    /// Where to connect.
    type Endpoint: std::fmt::Debug + Send + Sync + 'static;
    /// Stream produced on success.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Establish a stream to `endpoint`, giving up if `cancel` fires.
    async fn create_stream(
        &self,
        endpoint: &Self::Endpoint,
        cancel: &CancellationToken,
    ) -> io::Result<Self::Stream>;
}

/// Socket options applied before a TCP stream connects.
///
/// Unset options keep the operating system defaults.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use wiremux::transport::SocketOptions;
///
/// let options = SocketOptions::default()
///     .nodelay(true)
///     .keepalive(Duration::from_secs(30));
/// assert_eq!(options.keepalive_time(), Some(Duration::from_secs(30)));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SocketOptions {
    nodelay: Option<bool>,
    #[serde(with = "humantime_serde")]
    keepalive: Option<Duration>,
    send_buffer_size: Option<u32>,
    recv_buffer_size: Option<u32>,
}

impl SocketOptions {
    /// Configure `TCP_NODELAY`.
    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = Some(enabled);
        self
    }

    /// Enable `SO_KEEPALIVE` with the given idle time before probes start.
    #[must_use]
    pub fn keepalive(mut self, time: Duration) -> Self {
        self.keepalive = Some(time);
        self
    }

    /// Configure the socket send buffer size.
    #[must_use]
    pub fn send_buffer_size(mut self, size: u32) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Configure the socket receive buffer size.
    #[must_use]
    pub fn recv_buffer_size(mut self, size: u32) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    /// Keepalive idle time, if configured.
    #[must_use]
    pub fn keepalive_time(&self) -> Option<Duration> { self.keepalive }

    fn apply(&self, socket: &TcpSocket) -> io::Result<()> {
        if let Some(enabled) = self.nodelay {
            socket.set_nodelay(enabled)?;
        }
        if let Some(time) = self.keepalive {
            socket.set_keepalive(true)?;
            SockRef::from(socket).set_tcp_keepalive(&TcpKeepalive::new().with_time(time))?;
        }
        if let Some(size) = self.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(size) = self.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        Ok(())
    }
}

/// Connects over TCP.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpStreamFactory {
    options: SocketOptions,
    connect_timeout: Option<Duration>,
}

impl TcpStreamFactory {
    /// Create a factory applying `options` to every socket.
    #[must_use]
    pub fn new(options: SocketOptions) -> Self {
        Self {
            options,
            connect_timeout: None,
        }
    }

    /// Abandon connection attempts that take longer than `timeout`.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        self.options.apply(&socket)?;
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, socket.connect(addr))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?,
            None => socket.connect(addr).await,
        }
    }
}

#[async_trait]
impl StreamFactory for TcpStreamFactory {
    type Endpoint = SocketAddr;
    type Stream = TcpStream;

    async fn create_stream(
        &self,
        endpoint: &SocketAddr,
        cancel: &CancellationToken,
    ) -> io::Result<TcpStream> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(io::Error::new(io::ErrorKind::Interrupted, "connect cancelled")),
            stream = self.connect(*endpoint) => stream,
        }
    }
}
