//! DIO (DAG Information Object) decode/encode.
//!
//! The header layout is the mobility-extended one from §4.1: the two
//! octets RFC 6550 reserves after DTSN carry `mobility_flags` and `rssi`
//! instead of sitting unused. A peer running an unmodified RFC 6550 stack
//! zeroes those bytes, which this decoder reads back as
//! [`MobilityFlag::Periodic`] and `rssi == 0` — the extension is backward
//! compatible by construction, not by a special-cased branch.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::Ipv6Addr;

use crate::codec::options::{encode_option, parse_options, RplOption};
use crate::codec::util::*;
use crate::error::Result;
use crate::lollipop::Lollipop;

/// The tag carried in what RFC 6550 reserves: which phase of the smart-HOP
/// probe protocol (if any) this DIO is answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MobilityFlag {
    /// An ordinary periodic or solicited DIO; no mobility semantics.
    Periodic,
    /// A unicast reply to a parent-assessment DIS (`F=1, C=0`).
    ParentAssessmentReply,
    /// A unicast reply to a discovery-phase DIS burst member.
    DiscoveryReply,
}

impl From<u8> for MobilityFlag {
    fn from(v: u8) -> Self {
        match v {
            1 => MobilityFlag::ParentAssessmentReply,
            2 => MobilityFlag::DiscoveryReply,
            // Any other value — including an RFC 6550 peer's zeroed
            // reserved byte — is treated as a plain periodic DIO.
            _ => MobilityFlag::Periodic,
        }
    }
}

impl From<MobilityFlag> for u8 {
    fn from(f: MobilityFlag) -> u8 {
        match f {
            MobilityFlag::Periodic => 0,
            MobilityFlag::ParentAssessmentReply => 1,
            MobilityFlag::DiscoveryReply => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DioMessage {
    pub instance_id: u8,
    pub version: u8,
    pub rank: u16,
    pub grounded: bool,
    pub mop: u8,
    pub preference: u8,
    pub dtsn: Lollipop,
    pub mobility_flags: MobilityFlag,
    pub rssi: u8,
    pub dag_id: Ipv6Addr,
    pub options: Vec<RplOption>,
}

const HEADER_LEN: usize = 24;

impl DioMessage {
    pub fn decode(payload: &[u8]) -> Result<DioMessage> {
        let mut buf = Bytes::copy_from_slice(payload);
        require(&buf, HEADER_LEN, "DIO header")?;
        let instance_id = read_u8(&mut buf, "DIO instance_id")?;
        let version = read_u8(&mut buf, "DIO version")?;
        let rank = read_u16(&mut buf, "DIO rank")?;
        let flags = read_u8(&mut buf, "DIO flags")?;
        let dtsn = Lollipop::from(read_u8(&mut buf, "DIO dtsn")?);
        let mobility_flags = MobilityFlag::from(read_u8(&mut buf, "DIO mobility_flags")?);
        let rssi = read_u8(&mut buf, "DIO rssi")?;
        let dag_id = read_ipv6(&mut buf, "DIO dag_id")?;

        let mut options = Vec::new();
        parse_options(buf, |opt| options.push(opt))?;

        Ok(DioMessage {
            instance_id,
            version,
            rank,
            grounded: flags & 0x80 != 0,
            mop: (flags >> 3) & 0x07,
            preference: flags & 0x07,
            dtsn,
            mobility_flags,
            rssi,
            dag_id,
            options,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.instance_id);
        buf.put_u8(self.version);
        buf.put_u16(self.rank);
        let flags = (self.grounded as u8) << 7 | (self.mop & 0x07) << 3 | (self.preference & 0x07);
        buf.put_u8(flags);
        buf.put_u8(self.dtsn.value());
        buf.put_u8(self.mobility_flags.into());
        buf.put_u8(self.rssi);
        write_ipv6(buf, self.dag_id);
        for opt in &self.options {
            encode_option(buf, opt);
        }
    }

    pub fn dag_conf(&self) -> Option<&crate::codec::options::DagConf> {
        self.options.iter().find_map(|o| match o {
            RplOption::DagConf(c) => Some(c),
            _ => None,
        })
    }

    pub fn prefix_info(&self) -> Option<&crate::codec::options::PrefixInfo> {
        self.options.iter().find_map(|o| match o {
            RplOption::PrefixInfo(p) => Some(p),
            _ => None,
        })
    }

    pub fn metric_container(&self) -> Option<&crate::codec::options::DagMetricContainer> {
        self.options.iter().find_map(|o| match o {
            RplOption::DagMetricContainer(m) => Some(m),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::options::DagConf;

    fn sample() -> DioMessage {
        DioMessage {
            instance_id: 1,
            version: 1,
            rank: 0x0080,
            grounded: false,
            mop: 0,
            preference: 0,
            dtsn: Lollipop::from(1),
            mobility_flags: MobilityFlag::Periodic,
            rssi: 0,
            dag_id: "fe80::1".parse().unwrap(),
            options: vec![RplOption::DagConf(DagConf {
                interval_doublings: 8,
                interval_min: 12,
                redundancy: 10,
                max_rankinc: 0x0100,
                min_hoprankinc: 0x0200,
                ocp: 0x0100,
                default_lifetime: 0x1E,
                lifetime_unit: 0x0008,
            })],
        }
    }

    /// S1: a plain periodic DIO carrying a DAG_CONF decodes to exactly the
    /// fields the scenario names. We build the wire bytes with the
    /// encoder (rather than a hand-copied literal) so this is a genuine
    /// round-trip check, per invariant 1.
    #[test]
    fn s1_decode_matches_expected_fields() {
        let msg = sample();
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = DioMessage::decode(&buf).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.instance_id, 1);
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.rank, 0x0080);
        assert_eq!(decoded.mop, 0);
        assert_eq!(decoded.preference, 0);
        assert_eq!(decoded.dtsn.value(), 1);
        assert_eq!(u8::from(decoded.mobility_flags), 0);
        assert_eq!(decoded.rssi, 0);
        let conf = decoded.dag_conf().unwrap();
        assert_eq!(conf.interval_doublings, 8);
        assert_eq!(conf.interval_min, 12);
        assert_eq!(conf.redundancy, 10);
        assert_eq!(conf.max_rankinc, 0x0100);
        assert_eq!(conf.min_hoprankinc, 0x0200);
        assert_eq!(conf.ocp, 0x0100);
        assert_eq!(conf.default_lifetime, 0x1E);
        assert_eq!(conf.lifetime_unit, 0x0008);
    }

    #[test]
    fn roundtrip_preserves_mobility_tag_and_rssi() {
        let mut msg = sample();
        msg.mobility_flags = MobilityFlag::ParentAssessmentReply;
        msg.rssi = 230;
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        assert_eq!(DioMessage::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn vanilla_peer_zeroing_reserved_bytes_decodes_as_periodic() {
        let msg = sample();
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        // mobility_flags and rssi are already 0 in `sample()`; a vanilla
        // RFC 6550 implementation would produce exactly this.
        let decoded = DioMessage::decode(&buf).unwrap();
        assert_eq!(decoded.mobility_flags, MobilityFlag::Periodic);
        assert_eq!(decoded.rssi, 0);
    }

    #[test]
    fn truncated_header_is_malformed() {
        let short = [0u8; 10];
        assert!(DioMessage::decode(&short).is_err());
    }
}
