//! Byte-level helpers shared by every message codec.
//!
//! RPL control messages are always big-endian ([RFC 6550] has no notion of
//! a per-section byte order, unlike pcap-ng), so this is a thinner wrapper
//! around [`bytes::Buf`]/[`bytes::BufMut`] than a format that has to
//! support both orderings: there is exactly one `read_*`/`write_*` per
//! width, and it always means network byte order.
//!
//! [RFC 6550]: https://www.rfc-editor.org/rfc/rfc6550

use bytes::{Buf, BufMut};
use std::net::Ipv6Addr;

use crate::error::{Error, Result};

/// Require that `buf` still has at least `len` bytes remaining, or fail
/// with [`Error::MalformedMessage`] naming `what`.
pub(crate) fn require(buf: &impl Buf, len: usize, what: &'static str) -> Result<()> {
    if buf.remaining() < len {
        Err(Error::MalformedMessage(what))
    } else {
        Ok(())
    }
}

pub(crate) fn read_u8(buf: &mut impl Buf, what: &'static str) -> Result<u8> {
    require(buf, 1, what)?;
    Ok(buf.get_u8())
}

pub(crate) fn read_u16(buf: &mut impl Buf, what: &'static str) -> Result<u16> {
    require(buf, 2, what)?;
    Ok(buf.get_u16())
}

pub(crate) fn read_u32(buf: &mut impl Buf, what: &'static str) -> Result<u32> {
    require(buf, 4, what)?;
    Ok(buf.get_u32())
}

pub(crate) fn read_ipv6(buf: &mut impl Buf, what: &'static str) -> Result<Ipv6Addr> {
    require(buf, 16, what)?;
    let mut octets = [0u8; 16];
    buf.copy_to_slice(&mut octets);
    Ok(Ipv6Addr::from(octets))
}

pub(crate) fn write_ipv6(buf: &mut impl BufMut, addr: Ipv6Addr) {
    buf.put_slice(&addr.octets());
}

/// Number of bytes needed to hold `prefix_len` bits of an IPv6 prefix.
pub(crate) fn prefix_byte_len(prefix_len: u8) -> usize {
    ((prefix_len as usize) + 7) / 8
}

/// Read `n` prefix bytes into the low-order bits of a 16-byte address,
/// zero-padding the remainder — the wire form only carries the significant
/// bytes of a prefix, never the full address.
pub(crate) fn read_prefix(buf: &mut impl Buf, n: usize, what: &'static str) -> Result<Ipv6Addr> {
    require(buf, n, what)?;
    let mut octets = [0u8; 16];
    buf.copy_to_slice(&mut octets[..n]);
    Ok(Ipv6Addr::from(octets))
}

pub(crate) fn write_prefix(buf: &mut impl BufMut, addr: Ipv6Addr, n: usize) {
    buf.put_slice(&addr.octets()[..n]);
}
