//! Error types for the frame codec.
//!
//! This module separates framing errors (a length field the connection
//! cannot trust), EOF conditions, and plain transport I/O errors.
//!
//! # Error Categories
//!
//! - [`FramingError`]: The length prefix or header is out of bounds. The byte stream can no longer
//!   be trusted to sit on a frame boundary.
//! - [`EofError`]: End-of-stream conditions distinguishing clean closure from premature
//!   disconnection.
//! - [`CodecError`]: Top-level enum wrapping both categories plus I/O errors.

use std::io;

use thiserror::Error;

/// Framing-level errors detected while validating a length prefix.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// Declared length exceeds the configured maximum.
    #[error("frame exceeds max length: {length} > {max}")]
    Oversized {
        /// Length indicated by the prefix.
        length: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// Declared length cannot hold a complete header.
    #[error("frame shorter than its header: {length} < {min}")]
    TooShort {
        /// Length indicated by the prefix, or the buffer size.
        length: usize,
        /// Minimum legal frame length.
        min: usize,
    },

    /// Length prefix disagrees with the size of the supplied buffer.
    #[error("frame length field says {declared} bytes but buffer holds {actual}")]
    LengthMismatch {
        /// Length indicated by the prefix.
        declared: usize,
        /// Actual buffer size.
        actual: usize,
    },
}

/// EOF handling variants distinguishing normal vs. premature closure.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EofError {
    /// Clean EOF at frame boundary.
    #[error("connection closed cleanly at frame boundary")]
    CleanClose,

    /// EOF received after the length prefix, before the frame was complete.
    #[error("premature EOF: {bytes_received} bytes of {expected} byte frame body received")]
    MidFrame {
        /// Bytes received after the prefix before EOF.
        bytes_received: usize,
        /// Bytes expected after the prefix.
        expected: usize,
    },

    /// EOF received while reading the length prefix.
    #[error("premature EOF during header: {bytes_received} of {header_size} header bytes")]
    MidHeader {
        /// Prefix bytes received before EOF.
        bytes_received: usize,
        /// Prefix size.
        header_size: usize,
    },
}

/// Top-level codec error taxonomy.
///
/// # Examples
///
/// ```
/// use wiremux::codec::{CodecError, EofError, FramingError};
///
/// let err = CodecError::Framing(FramingError::Oversized { length: 2000, max: 1024 });
/// assert!(err.is_desync());
///
/// let err = CodecError::Eof(EofError::CleanClose);
/// assert!(err.is_clean_close());
/// assert!(!err.is_desync());
/// ```
#[derive(Debug, Error)]
pub enum CodecError {
    /// The length prefix or header is malformed.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Transport layer I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// End-of-stream handling.
    #[error("EOF: {0}")]
    Eof(#[from] EofError),
}

impl CodecError {
    /// Returns true if this error represents a clean connection close.
    ///
    /// A clean close occurs when the peer closes the connection at a frame
    /// boundary, indicating no data was lost.
    #[must_use]
    pub fn is_clean_close(&self) -> bool { matches!(self, Self::Eof(EofError::CleanClose)) }

    /// Returns true if the stream no longer sits on a frame boundary because
    /// a length prefix could not be trusted.
    #[must_use]
    pub fn is_desync(&self) -> bool { matches!(self, Self::Framing(_)) }
}

impl From<CodecError> for io::Error {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Io(inner) => inner,
            CodecError::Framing(inner) => io::Error::new(io::ErrorKind::InvalidData, inner),
            CodecError::Eof(inner) => io::Error::new(io::ErrorKind::UnexpectedEof, inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CodecError::Framing(FramingError::TooShort { length: 4, min: 16 }), io::ErrorKind::InvalidData)]
    #[case(CodecError::Eof(EofError::CleanClose), io::ErrorKind::UnexpectedEof)]
    #[case(CodecError::Io(io::Error::from(io::ErrorKind::BrokenPipe)), io::ErrorKind::BrokenPipe)]
    fn converts_into_io_error_kind(#[case] error: CodecError, #[case] kind: io::ErrorKind) {
        assert_eq!(io::Error::from(error).kind(), kind);
    }

    #[test]
    fn eof_messages_describe_progress() {
        let err = EofError::MidFrame {
            bytes_received: 3,
            expected: 12,
        };
        assert_eq!(
            err.to_string(),
            "premature EOF: 3 bytes of 12 byte frame body received"
        );
    }
}
