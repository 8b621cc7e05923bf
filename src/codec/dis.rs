//! DIS (DAG Information Solicitation) decode/encode.
//!
//! Two octets, no sub-options. Byte 0 is the RFC 6550 flags byte, unused
//! here and always zero. Byte 1 is where smart-HOP packs its probe
//! metadata: bit 7 is the mobility flag `F`, bits 6..5 are a 2-bit burst
//! counter `C`, and the low 5 bits are reserved.
//!
//! The source this is grounded on has a known bug at the unicast-DIS
//! branch: it tests the flag with `buffer[1] && 0x80` where it plainly
//! meant `buffer[1] & 0x80`. That particular typo has no equivalent in
//! Rust — `&&` doesn't type-check against an integer — so the fix is
//! structural: `mobility_flag` is decoded once, here, as a proper bitwise
//! test, and every caller downstream matches on the resulting `bool`
//! rather than re-deriving it from a raw byte.

use bytes::{Buf, BufMut, Bytes};

use crate::codec::util::require;
use crate::error::Result;

const MOBILITY_FLAG_BIT: u8 = 0x80;
const BURST_COUNTER_SHIFT: u8 = 5;
const BURST_COUNTER_MASK: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisMessage {
    /// `F`: set for any smart-HOP probe (parent-assessment or discovery).
    pub mobility_flag: bool,
    /// `C`: 0 for a unicast parent probe, 1..=3 for a burst member's
    /// position within a discovery-phase burst. Meaningless when
    /// `mobility_flag` is false.
    pub burst_counter: u8,
}

impl DisMessage {
    /// A unicast parent-assessment probe: `F=1, C=0`.
    pub fn parent_assessment() -> DisMessage {
        DisMessage {
            mobility_flag: true,
            burst_counter: 0,
        }
    }

    /// One member of a 3-frame discovery burst: `F=1, C=member`.
    pub fn discovery_burst_member(member: u8) -> DisMessage {
        DisMessage {
            mobility_flag: true,
            burst_counter: member,
        }
    }

    pub fn decode(payload: &[u8]) -> Result<DisMessage> {
        let mut buf = Bytes::copy_from_slice(payload);
        require(&buf, 2, "DIS header")?;
        let _reserved_byte0 = buf.get_u8();
        let byte1 = buf.get_u8();
        Ok(DisMessage {
            mobility_flag: byte1 & MOBILITY_FLAG_BIT != 0,
            burst_counter: (byte1 >> BURST_COUNTER_SHIFT) & BURST_COUNTER_MASK,
        })
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(0); // reserved
        let mut byte1 = 0u8;
        if self.mobility_flag {
            byte1 |= MOBILITY_FLAG_BIT;
        }
        byte1 |= (self.burst_counter & BURST_COUNTER_MASK) << BURST_COUNTER_SHIFT;
        buf.put_u8(byte1);
    }

    /// Is this a parent-assessment burst member (`F=1, C!=0`)?
    pub fn is_burst_member(&self) -> bool {
        self.mobility_flag && self.burst_counter != 0
    }

    /// Is this a unicast parent probe (`F=1, C==0`)?
    pub fn is_unicast_probe(&self) -> bool {
        self.mobility_flag && self.burst_counter == 0
    }
}
