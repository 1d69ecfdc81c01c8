//! Helpers for explicit network byte-order conversions.
//!
//! ONC-RPC and its record-marking layer are defined entirely in terms of
//! big-endian 32-bit words. These helpers keep Clippy expectations scoped to
//! the conversion points so codec code can remain explicit about wire
//! endianness without repeating lint annotations.

/// Size in bytes of one XDR unit.
pub const XDR_UNIT: usize = 4;

/// Serialise a `u32` in network byte order (big-endian).
///
/// # Examples
///
/// ```
/// use rpcwire::byte_order::write_network_u32;
///
/// assert_eq!(write_network_u32(0x1234_5678), [0x12, 0x34, 0x56, 0x78]);
/// ```
#[must_use]
pub fn write_network_u32(value: u32) -> [u8; 4] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u32` from its on-wire representation.
///
/// # Examples
///
/// ```
/// use rpcwire::byte_order::read_network_u32;
///
/// assert_eq!(read_network_u32([0x12, 0x34, 0x56, 0x78]), 0x1234_5678);
/// ```
#[must_use]
pub fn read_network_u32(bytes: [u8; 4]) -> u32 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u32::from_be_bytes(bytes)
}

/// Read a network-order `u32` at `offset`, returning `None` when fewer than
/// four bytes remain.
///
/// # Examples
///
/// ```
/// use rpcwire::byte_order::read_network_u32_at;
///
/// let buf = [0, 0, 0, 7, 0, 0, 0, 1];
/// assert_eq!(read_network_u32_at(&buf, 4), Some(1));
/// assert_eq!(read_network_u32_at(&buf, 6), None);
/// ```
#[must_use]
pub fn read_network_u32_at(buf: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(XDR_UNIT)?;
    let word = buf.get(offset..end)?;
    <[u8; 4]>::try_from(word).ok().map(read_network_u32)
}

/// Number of zero bytes that follow `len` bytes of opaque data so the next
/// item starts on an XDR unit boundary.
///
/// # Examples
///
/// ```
/// use rpcwire::byte_order::xdr_padding;
///
/// assert_eq!(xdr_padding(0), 0);
/// assert_eq!(xdr_padding(5), 3);
/// assert_eq!(xdr_padding(8), 0);
/// ```
#[must_use]
pub const fn xdr_padding(len: usize) -> usize { (XDR_UNIT - len % XDR_UNIT) % XDR_UNIT }
