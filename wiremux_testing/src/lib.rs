//! Utilities for driving a [`wiremux::Connection`] against in-memory peers
//! during tests.
//!
//! [`DuplexFactory`] hands the connection one end of a `tokio::io::duplex`
//! pipe and the test the other, where a [`ScriptedPeer`] reads requests and
//! writes replies in whatever order the test wants.
//!
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use wiremux::Connection;
//! use wiremux_testing::{DuplexFactory, ScriptedPeer};
//!
//! # async fn example() {
//! let (factory, mut peers) = DuplexFactory::new(1024);
//! let connection = Connection::new(factory, "in-memory");
//! let cancel = CancellationToken::new();
//! connection.open(&cancel).await.expect("open");
//! let mut peer = ScriptedPeer::new(peers.accept().await.expect("peer end"));
//! peer.reply_with(7, b"hello").await.expect("peer reply");
//! let frame = connection.receive(7, &cancel).await.expect("reply");
//! assert_eq!(frame.body(), b"hello");
//! # }
//! ```

pub mod duplex;
pub mod logging;
pub mod observer;
pub mod peer;

pub use duplex::{DuplexFactory, PeerEnds};
pub use logging::{LoggerHandle, logger};
pub use observer::RecordingObserver;
pub use peer::{ScriptedPeer, reply_frame, request_frame, spawn_echo_peer};
