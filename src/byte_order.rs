//! Helpers for explicit wire byte-order conversions.
//!
//! Every integer in a frame header is little-endian. These helpers keep the
//! Clippy expectations scoped to the conversion points so protocol code can
//! remain explicit about wire endianness without repeating lint annotations.

/// Serialise an `i32` in wire byte order (little-endian).
///
/// # Examples
///
/// ```
/// use wiremux::byte_order::write_wire_i32;
///
/// assert_eq!(write_wire_i32(0x1234_5678), [0x78, 0x56, 0x34, 0x12]);
/// ```
#[must_use]
pub fn write_wire_i32(value: i32) -> [u8; 4] {
    #[expect(
        clippy::little_endian_bytes,
        reason = "The wire protocol mandates little-endian header fields."
    )]
    value.to_le_bytes()
}

/// Parse a wire-order `i32` from its on-wire representation.
///
/// # Examples
///
/// ```
/// use wiremux::byte_order::read_wire_i32;
///
/// assert_eq!(read_wire_i32([0x78, 0x56, 0x34, 0x12]), 0x1234_5678);
/// ```
#[must_use]
pub fn read_wire_i32(bytes: [u8; 4]) -> i32 {
    #[expect(
        clippy::little_endian_bytes,
        reason = "The wire protocol mandates little-endian header fields."
    )]
    i32::from_le_bytes(bytes)
}

/// Serialise a `u32` in wire byte order (little-endian).
///
/// # Examples
///
/// ```
/// use wiremux::byte_order::write_wire_u32;
///
/// assert_eq!(write_wire_u32(20), [20, 0, 0, 0]);
/// ```
#[must_use]
pub fn write_wire_u32(value: u32) -> [u8; 4] {
    #[expect(
        clippy::little_endian_bytes,
        reason = "The wire protocol mandates little-endian header fields."
    )]
    value.to_le_bytes()
}

/// Parse a wire-order `u32` from its on-wire representation.
///
/// # Examples
///
/// ```
/// use wiremux::byte_order::read_wire_u32;
///
/// assert_eq!(read_wire_u32([20, 0, 0, 0]), 20);
/// ```
#[must_use]
pub fn read_wire_u32(bytes: [u8; 4]) -> u32 {
    #[expect(
        clippy::little_endian_bytes,
        reason = "The wire protocol mandates little-endian header fields."
    )]
    u32::from_le_bytes(bytes)
}

/// Read the little-endian `i32` stored at `offset` within `buf`.
///
/// Returns `None` when fewer than four bytes are available at `offset`.
#[must_use]
pub fn read_wire_i32_at(buf: &[u8], offset: usize) -> Option<i32> {
    let end = offset.checked_add(4)?;
    let slice = buf.get(offset..end)?;
    <[u8; 4]>::try_from(slice).ok().map(read_wire_i32)
}
