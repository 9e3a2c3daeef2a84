//! Peers speaking the frame protocol on the far end of a pipe.

use futures::{SinkExt, StreamExt};
use tokio::{io::DuplexStream, task::JoinHandle};
use tokio_util::codec::Framed;
use wiremux::{
    codec::{CodecError, FrameCodec},
    frame::{Frame, FrameHeader},
    handshake::{HelloReply, OP_HELLO, OP_HELLO_REPLY},
};

/// Build a request frame.
///
/// # Panics
///
/// Panics if `body` does not fit a frame.
#[must_use]
pub fn request_frame(request_id: i32, op_code: i32, body: &[u8]) -> Frame {
    Frame::build(FrameHeader::request(request_id, op_code), body).expect("request fits a frame")
}

/// Build a reply correlated with `response_to`.
///
/// # Panics
///
/// Panics if `body` does not fit a frame.
#[must_use]
pub fn reply_frame(response_to: i32, body: &[u8]) -> Frame {
    Frame::build(FrameHeader::reply(response_to.wrapping_add(1000), response_to, 1), body)
        .expect("reply fits a frame")
}

/// Test-controlled peer reading and writing whole frames.
#[derive(Debug)]
pub struct ScriptedPeer {
    framed: Framed<DuplexStream, FrameCodec>,
}

impl ScriptedPeer {
    /// Wrap the far end of a pipe.
    #[must_use]
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec::default()),
        }
    }

    /// Next frame written by the connection, or `None` once it closed its
    /// end.
    ///
    /// # Errors
    ///
    /// Returns the codec error if the bytes do not form a valid frame.
    pub async fn recv(&mut self) -> Option<Result<Frame, CodecError>> { self.framed.next().await }

    /// Write `frame` to the connection.
    ///
    /// # Errors
    ///
    /// Returns the codec error if the pipe is closed.
    pub async fn send(&mut self, frame: Frame) -> Result<(), CodecError> { self.framed.send(frame).await }

    /// Write a reply correlated with `response_to`.
    ///
    /// # Errors
    ///
    /// Returns the codec error if the pipe is closed.
    pub async fn reply_with(&mut self, response_to: i32, body: &[u8]) -> Result<(), CodecError> {
        self.send(reply_frame(response_to, body)).await
    }

    /// Answer the next frame, which must be a hello, with `reply`.
    ///
    /// # Panics
    ///
    /// Panics if the next frame is missing or is not a hello.
    pub async fn answer_hello(&mut self, reply: &HelloReply) {
        let hello = self
            .recv()
            .await
            .expect("hello frame")
            .expect("valid hello frame");
        assert_eq!(hello.op_code(), OP_HELLO, "expected a hello");
        let body = reply.to_body().expect("encode hello reply");
        let frame = Frame::build(
            FrameHeader::reply(1, hello.request_id(), OP_HELLO_REPLY),
            &body,
        )
        .expect("hello reply fits a frame");
        self.send(frame).await.expect("send hello reply");
    }

    /// Write raw bytes, bypassing the codec.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the pipe is closed.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let stream = self.framed.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await
    }
}

/// Spawn a peer that echoes each frame's body back, correlated with the
/// frame's request id, until the connection closes its end.
pub fn spawn_echo_peer(stream: DuplexStream) -> JoinHandle<Result<usize, CodecError>> {
    tokio::spawn(async move {
        let mut peer = ScriptedPeer::new(stream);
        let mut echoed = 0;
        while let Some(frame) = peer.recv().await {
            let frame = frame?;
            peer.reply_with(frame.request_id(), frame.body()).await?;
            echoed += 1;
        }
        Ok(echoed)
    })
}
