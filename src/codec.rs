//! Reading and writing length-prefixed frames.
//!
//! [`read_frame`] and [`write_frame`] operate directly on an async byte
//! stream and are what the connection uses on its hot path. [`FrameCodec`]
//! applies the same rules through `tokio_util`'s [`Decoder`] and [`Encoder`]
//! traits for code that prefers a [`Framed`](tokio_util::codec::Framed)
//! stream, such as a peer on the other end of the connection.
//!
//! # Error Handling
//!
//! A length prefix outside `HEADER_LEN..=max_frame_length` is reported as a
//! [`FramingError`]; the stream cannot be resynchronised afterwards. EOF is
//! reported as an [`EofError`] describing how much of the frame arrived.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    byte_order::read_wire_u32,
    frame::{Frame, HEADER_LEN, LENGTH_FIELD_LEN},
};

pub mod error;

pub use error::{CodecError, EofError, FramingError};

/// Default maximum frame length in bytes.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 48_000_000;

/// Validate a declared frame length against the protocol bounds.
///
/// # Errors
///
/// Returns [`FramingError::TooShort`] below [`HEADER_LEN`] and
/// [`FramingError::Oversized`] above `max_frame_length`.
pub fn check_frame_length(length: usize, max_frame_length: usize) -> Result<(), FramingError> {
    if length < HEADER_LEN {
        return Err(FramingError::TooShort {
            length,
            min: HEADER_LEN,
        });
    }
    if length > max_frame_length {
        return Err(FramingError::Oversized {
            length,
            max: max_frame_length,
        });
    }
    Ok(())
}

/// Read into `buf` until it is full or the stream ends, returning the number
/// of bytes filled.
async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read exactly one frame from `reader`.
///
/// The four-byte prefix is read first; a buffer of the declared length is
/// then allocated, the prefix copied into it, and the remainder read into the
/// same buffer.
///
/// # Errors
///
/// Returns [`CodecError::Framing`] for an out-of-bounds length,
/// [`CodecError::Eof`] if the stream ends before the frame is complete, and
/// [`CodecError::Io`] for transport failures.
pub async fn read_frame<R>(reader: &mut R, max_frame_length: usize) -> Result<Frame, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_FIELD_LEN];
    let got = fill(reader, &mut prefix).await?;
    if got < LENGTH_FIELD_LEN {
        return Err(if got == 0 {
            EofError::CleanClose
        } else {
            EofError::MidHeader {
                bytes_received: got,
                header_size: LENGTH_FIELD_LEN,
            }
        }
        .into());
    }

    let length = read_wire_u32(prefix) as usize;
    check_frame_length(length, max_frame_length)?;

    let mut buf = BytesMut::zeroed(length);
    buf[..LENGTH_FIELD_LEN].copy_from_slice(&prefix);
    let expected = length - LENGTH_FIELD_LEN;
    let got = fill(reader, &mut buf[LENGTH_FIELD_LEN..]).await?;
    if got < expected {
        return Err(EofError::MidFrame {
            bytes_received: got,
            expected,
        }
        .into());
    }
    Ok(Frame::from_validated(buf.freeze()))
}

/// Write one frame verbatim and flush it.
///
/// # Errors
///
/// Returns [`CodecError::Io`] if the transport fails part way; the caller
/// must treat the stream as unusable afterwards.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a batch of frames as one contiguous transfer and flush it.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// Returns [`CodecError::Io`] if the transport fails part way.
pub async fn write_frames<W>(writer: &mut W, frames: &[Frame]) -> Result<usize, CodecError>
where
    W: AsyncWrite + Unpin,
{
    match frames {
        [] => Ok(0),
        [frame] => {
            write_frame(writer, frame).await?;
            Ok(frame.as_bytes().len())
        }
        _ => {
            let total = frames.iter().map(|f| f.as_bytes().len()).sum();
            let mut buf = BytesMut::with_capacity(total);
            for frame in frames {
                buf.put_slice(frame.as_bytes());
            }
            writer.write_all(&buf).await?;
            writer.flush().await?;
            Ok(total)
        }
    }
}

/// `tokio_util` codec applying the same framing rules as [`read_frame`].
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use tokio_util::codec::{Decoder, Encoder};
/// use wiremux::{
///     codec::FrameCodec,
///     frame::{Frame, FrameHeader},
/// };
///
/// let mut codec = FrameCodec::default();
/// let frame = Frame::build(FrameHeader::reply(2, 1, 0), b"body").expect("frame fits");
/// let mut buf = BytesMut::new();
/// codec.encode(frame.clone(), &mut buf).expect("encode");
/// let decoded = codec.decode(&mut buf).expect("decode").expect("complete frame");
/// assert_eq!(decoded, frame);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_frame_length: usize,
}

impl FrameCodec {
    /// Construct a codec accepting frames up to `max_frame_length` bytes.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: max_frame_length.max(HEADER_LEN),
        }
    }

    /// Return the maximum frame length accepted by this codec.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }
}

impl Default for FrameCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_FRAME_LENGTH) }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(prefix) = src
            .get(..LENGTH_FIELD_LEN)
            .and_then(|slice| <[u8; LENGTH_FIELD_LEN]>::try_from(slice).ok())
        else {
            return Ok(None);
        };
        let length = read_wire_u32(prefix) as usize;
        check_frame_length(length, self.max_frame_length)?;
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }
        Ok(Some(Frame::from_validated(src.split_to(length).freeze())))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let received = src.len();
        let error = match src
            .get(..LENGTH_FIELD_LEN)
            .and_then(|slice| <[u8; LENGTH_FIELD_LEN]>::try_from(slice).ok())
        {
            Some(prefix) => EofError::MidFrame {
                bytes_received: received - LENGTH_FIELD_LEN,
                expected: (read_wire_u32(prefix) as usize).saturating_sub(LENGTH_FIELD_LEN),
            },
            None => EofError::MidHeader {
                bytes_received: received,
                header_size: LENGTH_FIELD_LEN,
            },
        };
        Err(error.into())
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = item.as_bytes().len();
        if length > self.max_frame_length {
            return Err(FramingError::Oversized {
                length,
                max: self.max_frame_length,
            }
            .into());
        }
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests;
