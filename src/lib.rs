#![doc(html_root_url = "https://docs.rs/wiremux/latest")]
//! Public API for the `wiremux` library.
//!
//! This crate multiplexes concurrent, independently awaited request/reply
//! exchanges over one length-prefixed binary connection. Replies may arrive
//! in any order; each caller receives exactly the frame correlated with its
//! own request while only one caller at a time reads from the stream.

pub mod byte_order;
pub mod codec;
pub mod connection;
pub mod correlation;
pub mod dropbox;
pub mod frame;
pub mod handshake;
pub mod metrics;
pub mod transport;

pub use codec::{CodecError, FrameCodec};
pub use connection::{
    Connection,
    ConnectionBuilder,
    ConnectionError,
    ConnectionEvent,
    ConnectionId,
    ConnectionObserver,
    ConnectionSettings,
    ConnectionState,
};
pub use correlation::{CorrelatableFrame, RequestIds};
pub use dropbox::Dropbox;
pub use frame::{Frame, FrameHeader};
pub use handshake::{ConnectionDescription, ConnectionInitializer, HelloInitializer, NoHandshake};
pub use metrics::{BYTES_TOTAL, CONNECTIONS_OPEN, Direction, FAILURES_TOTAL, FRAMES_TOTAL};
pub use transport::{SocketOptions, StreamFactory, TcpStreamFactory};
