//! Unit tests for frame reading, writing, and the `tokio_util` codec.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::BytesMut;
use rstest::rstest;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio_util::codec::{Decoder, Encoder};

use super::*;
use crate::frame::FrameHeader;

fn sample(response_to: i32, body: &[u8]) -> Frame {
    Frame::build(FrameHeader::reply(response_to + 100, response_to, 1), body).expect("frame fits")
}

/// Reader yielding its data one byte per poll.
struct Trickle(Vec<u8>);

impl AsyncRead for Trickle {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.0.is_empty() && buf.remaining() > 0 {
            let byte = self.0.remove(0);
            buf.put_slice(&[byte]);
        }
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn read_frame_reassembles_partial_reads() {
    let frame = sample(7, b"payload");
    let mut reader = Trickle(frame.as_bytes().to_vec());
    let read = read_frame(&mut reader, DEFAULT_MAX_FRAME_LENGTH)
        .await
        .expect("read frame");
    assert_eq!(read, frame);
}

#[tokio::test]
async fn frames_are_read_in_wire_order() {
    let (mut client, mut server) = tokio::io::duplex(256);
    let first = sample(1, b"a");
    let second = sample(2, b"bb");
    write_frames(&mut server, &[first.clone(), second.clone()])
        .await
        .expect("write frames");

    let got_first = read_frame(&mut client, DEFAULT_MAX_FRAME_LENGTH)
        .await
        .expect("first frame");
    let got_second = read_frame(&mut client, DEFAULT_MAX_FRAME_LENGTH)
        .await
        .expect("second frame");
    assert_eq!(got_first, first);
    assert_eq!(got_second, second);
}

#[rstest]
#[case::below_header(8, 1024)]
#[case::above_max(2048, 1024)]
#[tokio::test]
async fn read_frame_rejects_out_of_bounds_length(#[case] declared: u32, #[case] max: usize) {
    let mut raw = crate::byte_order::write_wire_u32(declared).to_vec();
    raw.resize(32, 0);
    let err = read_frame(&mut raw.as_slice(), max)
        .await
        .expect_err("length should be rejected");
    assert!(err.is_desync(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn clean_close_at_frame_boundary() {
    let err = read_frame(&mut [0u8; 0].as_slice(), DEFAULT_MAX_FRAME_LENGTH)
        .await
        .expect_err("empty stream");
    assert!(err.is_clean_close());
}

#[tokio::test]
async fn eof_mid_header_and_mid_frame_are_distinguished() {
    let err = read_frame(&mut [20u8, 0].as_slice(), DEFAULT_MAX_FRAME_LENGTH)
        .await
        .expect_err("truncated prefix");
    assert!(matches!(
        err,
        CodecError::Eof(EofError::MidHeader {
            bytes_received: 2,
            header_size: 4
        })
    ));

    let frame = sample(3, b"0123");
    let truncated = &frame.as_bytes()[..10];
    let err = read_frame(&mut &truncated[..], DEFAULT_MAX_FRAME_LENGTH)
        .await
        .expect_err("truncated body");
    assert!(matches!(
        err,
        CodecError::Eof(EofError::MidFrame {
            bytes_received: 6,
            expected: 16
        })
    ));
}

#[tokio::test]
async fn write_frames_reports_total_bytes() {
    let (mut client, mut server) = tokio::io::duplex(256);
    let frames = [sample(1, b"x"), sample(2, b"yy"), sample(3, b"")];
    let written = write_frames(&mut client, &frames).await.expect("write");
    assert_eq!(written, 17 + 18 + 16);
    client.shutdown().await.expect("shutdown");

    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::new();
    tokio::io::AsyncReadExt::read_buf(&mut server, &mut buf)
        .await
        .expect("read back");
    for frame in &frames {
        let decoded = codec.decode(&mut buf).expect("decode").expect("frame");
        assert_eq!(&decoded, frame);
    }
    assert!(buf.is_empty());
}

#[test]
fn decoder_waits_for_complete_frame() {
    let frame = sample(4, b"abcdef");
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::from(&frame.as_bytes()[..12]);
    assert!(codec.decode(&mut buf).expect("decode").is_none());
    buf.extend_from_slice(&frame.as_bytes()[12..]);
    assert_eq!(codec.decode(&mut buf).expect("decode"), Some(frame));
}

#[test]
fn decode_eof_reports_truncation() {
    let frame = sample(5, b"abc");
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::from(&frame.as_bytes()[..6]);
    let err = codec.decode_eof(&mut buf).expect_err("truncated frame");
    assert!(matches!(err, CodecError::Eof(EofError::MidFrame { .. })));
}

#[test]
fn encoder_rejects_oversized_frames() {
    let mut codec = FrameCodec::new(HEADER_LEN + 2);
    let mut buf = BytesMut::new();
    let err = codec
        .encode(sample(1, b"abc"), &mut buf)
        .expect_err("frame too large");
    assert!(err.is_desync());
    assert!(buf.is_empty());
}
