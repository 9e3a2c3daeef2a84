//! Loopback echo peer used by the demo binary.

use futures::{SinkExt, StreamExt};
use log::warn;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use wiremux::{
    codec::FrameCodec,
    frame::{Frame, FrameHeader},
    handshake::{HelloReply, OP_HELLO, OP_HELLO_REPLY},
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Accept connections forever, answering each on its own task.
pub(crate) async fn serve(listener: TcpListener) {
    let mut next_connection = 1;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let connection_id = next_connection;
                next_connection += 1;
                tokio::spawn(async move {
                    if let Err(error) = echo(stream, connection_id).await {
                        warn!("echo peer stopped: peer={peer}, error={error}");
                    }
                });
            }
            Err(error) => {
                warn!("echo peer accept failed: error={error}");
                return;
            }
        }
    }
}

/// Answer a hello with a [`HelloReply`] and echo every other frame's body
/// back, correlated with its request id.
async fn echo(stream: TcpStream, connection_id: i32) -> Result<(), BoxError> {
    let mut framed = Framed::new(stream, FrameCodec::default());
    let mut next_request_id = 1;
    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let request_id = next_request_id;
        next_request_id += 1;
        let reply = if frame.op_code() == OP_HELLO {
            let body = HelloReply {
                connection_id,
                max_message_size: 0,
                server_version: env!("CARGO_PKG_VERSION").to_owned(),
            }
            .to_body()?;
            Frame::build(
                FrameHeader::reply(request_id, frame.request_id(), OP_HELLO_REPLY),
                &body,
            )?
        } else {
            Frame::build(
                FrameHeader::reply(request_id, frame.request_id(), frame.op_code()),
                frame.body(),
            )?
        };
        framed.send(reply).await?;
    }
    Ok(())
}
