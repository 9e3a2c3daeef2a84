//! Immutable length-prefixed frames and their header layout.
//!
//! A frame is one unit of the wire protocol:
//!
//! ```text
//! offset  0: message_length  (i32, little-endian, includes the header)
//! offset  4: request_id      (i32)
//! offset  8: response_to     (i32, the correlation id)
//! offset 12: op_code         (i32)
//! offset 16: body            (opaque)
//! ```
//!
//! Only the length and correlation fields are interpreted by the connection;
//! the body belongs to the codecs of the layer above.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    byte_order::{read_wire_i32, read_wire_u32, write_wire_i32},
    codec::FramingError,
    correlation::CorrelatableFrame,
};

/// Size of the length prefix in bytes.
pub const LENGTH_FIELD_LEN: usize = 4;
/// Offset of the request identifier.
pub const REQUEST_ID_OFFSET: usize = 4;
/// Offset of the correlation identifier (`response_to`).
pub const RESPONSE_TO_OFFSET: usize = 8;
/// Offset of the operation code.
pub const OP_CODE_OFFSET: usize = 12;
/// Total header size; the smallest legal frame.
pub const HEADER_LEN: usize = 16;

/// Header fields written in front of every frame body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameHeader {
    /// Identifier of the message carried by this frame.
    pub request_id: i32,
    /// Identifier of the request this frame answers, or `0`.
    pub response_to: i32,
    /// Protocol operation code.
    pub op_code: i32,
}

impl FrameHeader {
    /// Header for a new request.
    #[must_use]
    pub const fn request(request_id: i32, op_code: i32) -> Self {
        Self {
            request_id,
            response_to: 0,
            op_code,
        }
    }

    /// Header for a reply correlated with `response_to`.
    #[must_use]
    pub const fn reply(request_id: i32, response_to: i32, op_code: i32) -> Self {
        Self {
            request_id,
            response_to,
            op_code,
        }
    }
}

/// A complete frame as it appears on the wire.
///
/// The buffer is immutable once constructed and always satisfies
/// `length() == as_bytes().len() >= HEADER_LEN`.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    /// Build a frame from a header and body.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Oversized`] if the total length does not fit
    /// the 32-bit length field.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiremux::frame::{Frame, FrameHeader, HEADER_LEN};
    ///
    /// let frame = Frame::build(FrameHeader::reply(9, 7, 1), b"hi").expect("frame fits");
    /// assert_eq!(frame.length() as usize, HEADER_LEN + 2);
    /// assert_eq!(frame.response_to(), 7);
    /// assert_eq!(frame.body(), b"hi");
    /// ```
    pub fn build(header: FrameHeader, body: &[u8]) -> Result<Self, FramingError> {
        let total = HEADER_LEN + body.len();
        let length = i32::try_from(total).map_err(|_| FramingError::Oversized {
            length: total,
            max: i32::MAX as usize,
        })?;
        let mut buf = BytesMut::with_capacity(total);
        buf.put_slice(&write_wire_i32(length));
        buf.put_slice(&write_wire_i32(header.request_id));
        buf.put_slice(&write_wire_i32(header.response_to));
        buf.put_slice(&write_wire_i32(header.op_code));
        buf.put_slice(body);
        Ok(Self(buf.freeze()))
    }

    /// Wrap a complete wire buffer, validating its length field.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::TooShort`] if the buffer cannot hold a header
    /// and [`FramingError::LengthMismatch`] if the length field disagrees with
    /// the buffer size.
    pub fn from_bytes(bytes: Bytes) -> Result<Self, FramingError> {
        let Some(prefix) = bytes
            .get(..LENGTH_FIELD_LEN)
            .and_then(|slice| <[u8; LENGTH_FIELD_LEN]>::try_from(slice).ok())
        else {
            return Err(FramingError::TooShort {
                length: bytes.len(),
                min: HEADER_LEN,
            });
        };
        let declared = read_wire_u32(prefix) as usize;
        if declared != bytes.len() {
            return Err(FramingError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }
        if declared < HEADER_LEN {
            return Err(FramingError::TooShort {
                length: declared,
                min: HEADER_LEN,
            });
        }
        Ok(Self(bytes))
    }

    /// Wrap a buffer the codec has already validated.
    pub(crate) fn from_validated(bytes: Bytes) -> Self {
        debug_assert!(bytes.len() >= HEADER_LEN);
        Self(bytes)
    }

    fn field(&self, offset: usize) -> i32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.0[offset..offset + 4]);
        read_wire_i32(raw)
    }

    /// Total frame length, header included.
    #[must_use]
    pub fn length(&self) -> u32 {
        let mut raw = [0u8; LENGTH_FIELD_LEN];
        raw.copy_from_slice(&self.0[..LENGTH_FIELD_LEN]);
        read_wire_u32(raw)
    }

    /// Identifier of the message carried by this frame.
    #[must_use]
    pub fn request_id(&self) -> i32 { self.field(REQUEST_ID_OFFSET) }

    /// Identifier of the request this frame answers.
    #[must_use]
    pub fn response_to(&self) -> i32 { self.field(RESPONSE_TO_OFFSET) }

    /// Protocol operation code.
    #[must_use]
    pub fn op_code(&self) -> i32 { self.field(OP_CODE_OFFSET) }

    /// All header fields after the length prefix.
    #[must_use]
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            request_id: self.request_id(),
            response_to: self.response_to(),
            op_code: self.op_code(),
        }
    }

    /// The opaque body following the header.
    #[must_use]
    pub fn body(&self) -> &[u8] { &self.0[HEADER_LEN..] }

    /// The complete wire representation.
    #[must_use]
    pub fn as_bytes(&self) -> &Bytes { &self.0 }

    /// Consume the frame, returning its wire representation.
    #[must_use]
    pub fn into_bytes(self) -> Bytes { self.0 }
}

impl CorrelatableFrame for Frame {
    type Id = i32;

    fn correlation_id(&self) -> i32 { self.response_to() }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("length", &self.length())
            .field("request_id", &self.request_id())
            .field("response_to", &self.response_to())
            .field("op_code", &self.op_code())
            .finish_non_exhaustive()
    }
}
