//! Protocol negotiation run once while a connection opens.
//!
//! The connection hands itself to a [`ConnectionInitializer`] in state
//! [`Initializing`](crate::connection::ConnectionState::Initializing), where
//! `send` and `receive` already work. The initializer reports what it
//! learned as a [`ConnectionDescription`].

use std::sync::Arc;

use async_trait::async_trait;
use bincode::{Decode, Encode, config};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    codec::FramingError,
    connection::{Connection, ConnectionError, ConnectionId},
    correlation::RequestIds,
    frame::{Frame, FrameHeader},
    transport::StreamFactory,
};

/// Op code of the hello request.
pub const OP_HELLO: i32 = 1;
/// Op code of the hello reply.
pub const OP_HELLO_REPLY: i32 = 2;

/// What the handshake learned about the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionDescription {
    /// Local and server-assigned identity.
    pub connection_id: ConnectionId,
    /// Largest frame the peer will send, if it announced one.
    pub max_message_size: Option<usize>,
    /// Peer software version, if announced.
    pub server_version: Option<String>,
}

impl ConnectionDescription {
    /// Description carrying only the local identity.
    #[must_use]
    pub fn local(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            max_message_size: None,
            server_version: None,
        }
    }
}

/// Errors raised while negotiating.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Sending or receiving a handshake frame failed.
    #[error("handshake traffic failed: {0}")]
    Connection(#[from] ConnectionError),
    /// The hello frame could not be built.
    #[error("failed to build hello frame: {0}")]
    Framing(#[from] FramingError),
    /// The hello body could not be encoded.
    #[error("failed to encode hello")]
    Encode(#[source] bincode::error::EncodeError),
    /// The reply body could not be decoded.
    #[error("failed to decode hello reply")]
    Decode(#[source] bincode::error::DecodeError),
    /// The peer answered with something other than a hello reply.
    #[error("unexpected op code {0} in hello reply")]
    UnexpectedOpCode(i32),
}

impl From<HandshakeError> for ConnectionError {
    fn from(error: HandshakeError) -> Self {
        match error {
            HandshakeError::Connection(
                inner @ (ConnectionError::Cancelled | ConnectionError::AlreadyClosed),
            ) => inner,
            other => ConnectionError::connect_failed(other),
        }
    }
}

/// Negotiates a freshly established connection.
#[async_trait]
pub trait ConnectionInitializer<S: StreamFactory>: Send + Sync {
    /// Run the handshake over `connection` and describe the result.
    async fn initialize(
        &self,
        connection: &Connection<S>,
        cancel: &CancellationToken,
    ) -> Result<ConnectionDescription, HandshakeError>;
}

/// Skips negotiation entirely.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHandshake;

#[async_trait]
impl<S: StreamFactory> ConnectionInitializer<S> for NoHandshake {
    async fn initialize(
        &self,
        connection: &Connection<S>,
        _cancel: &CancellationToken,
    ) -> Result<ConnectionDescription, HandshakeError> {
        Ok(ConnectionDescription::local(connection.id()))
    }
}

/// Body of the hello request.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Hello {
    /// Name the client reports.
    pub client_name: String,
}

/// Body of the hello reply.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct HelloReply {
    /// Identity the server assigned to this connection.
    pub connection_id: i32,
    /// Largest frame the server will send, or `0` for no announced limit.
    pub max_message_size: u32,
    /// Server software version.
    pub server_version: String,
}

impl Hello {
    /// Encode as a frame body.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::Encode`] if bincode rejects the value.
    pub fn to_body(&self) -> Result<Vec<u8>, HandshakeError> {
        bincode::encode_to_vec(self, config::standard()).map_err(HandshakeError::Encode)
    }
}

impl HelloReply {
    /// Encode as a frame body.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::Encode`] if bincode rejects the value.
    pub fn to_body(&self) -> Result<Vec<u8>, HandshakeError> {
        bincode::encode_to_vec(self, config::standard()).map_err(HandshakeError::Encode)
    }

    /// Decode from a frame body.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::Decode`] for a malformed body.
    pub fn from_body(body: &[u8]) -> Result<Self, HandshakeError> {
        bincode::decode_from_slice(body, config::standard())
            .map(|(reply, _)| reply)
            .map_err(HandshakeError::Decode)
    }
}

/// Sends a [`Hello`] and reads the correlated [`HelloReply`].
///
/// Request ids come from the caller's [`RequestIds`] so the hello never
/// collides with requests issued afterwards.
#[derive(Debug)]
pub struct HelloInitializer {
    client_name: String,
    ids: Arc<RequestIds>,
}

impl HelloInitializer {
    /// Create an initializer announcing `client_name`.
    #[must_use]
    pub fn new(client_name: impl Into<String>, ids: Arc<RequestIds>) -> Self {
        Self {
            client_name: client_name.into(),
            ids,
        }
    }
}

#[async_trait]
impl<S: StreamFactory> ConnectionInitializer<S> for HelloInitializer {
    async fn initialize(
        &self,
        connection: &Connection<S>,
        cancel: &CancellationToken,
    ) -> Result<ConnectionDescription, HandshakeError> {
        let request_id = self.ids.next_id();
        let body = Hello {
            client_name: self.client_name.clone(),
        }
        .to_body()?;
        let request = Frame::build(FrameHeader::request(request_id, OP_HELLO), &body)?;
        connection.send(&[request], cancel).await?;

        let reply = connection.receive(request_id, cancel).await?;
        if reply.op_code() != OP_HELLO_REPLY {
            return Err(HandshakeError::UnexpectedOpCode(reply.op_code()));
        }
        let hello = HelloReply::from_body(reply.body())?;
        Ok(ConnectionDescription {
            connection_id: connection.id().with_server(hello.connection_id),
            max_message_size: (hello.max_message_size > 0)
                .then(|| usize::try_from(hello.max_message_size).ok())
                .flatten(),
            server_version: Some(hello.server_version),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_reply_survives_encoding() {
        let reply = HelloReply {
            connection_id: 17,
            max_message_size: 1024,
            server_version: "7.0".into(),
        };
        let body = reply.to_body().expect("encode");
        assert_eq!(HelloReply::from_body(&body).expect("decode"), reply);
    }

    #[test]
    fn truncated_reply_is_a_decode_error() {
        assert!(matches!(
            HelloReply::from_body(&[0xff]),
            Err(HandshakeError::Decode(_))
        ));
    }

    #[test]
    fn cancellation_is_preserved_through_open() {
        let err = ConnectionError::from(HandshakeError::Connection(ConnectionError::Cancelled));
        assert!(matches!(err, ConnectionError::Cancelled));
        let err = ConnectionError::from(HandshakeError::UnexpectedOpCode(9));
        assert!(matches!(err, ConnectionError::ConnectFailed(_)));
    }
}
