//! RPL sub-option framing: Type-Length-Value, except for `PAD1` which is a
//! single `0x00` byte with no length or value at all.
//!
//! The walking loop here is the same shape as the teacher's
//! `block::opts::parse_options`: pull a type, honor its length even when
//! the type is unrecognized (so trailing options we don't understand don't
//! desync the stream), and hand recognized payloads to the caller.
//! Unlike the teacher's pcap-ng options (16-bit type, 16-bit length), RPL
//! sub-options use 8-bit type and 8-bit length fields.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::Ipv6Addr;

use crate::codec::util::*;
use crate::error::{Error, Result};

pub const OPT_PAD1: u8 = 0x00;
pub const OPT_DAG_METRIC_CONTAINER: u8 = 0x02;
pub const OPT_ROUTE_INFO: u8 = 0x03;
pub const OPT_DAG_CONF: u8 = 0x04;
pub const OPT_TARGET: u8 = 0x05;
pub const OPT_TRANSIT: u8 = 0x06;
pub const OPT_PREFIX_INFO: u8 = 0x08;

pub const METRIC_TYPE_ENERGY: u8 = 0x01;
pub const METRIC_TYPE_ETX: u8 = 0x07;

/// A decoded RPL sub-option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RplOption {
    DagMetricContainer(DagMetricContainer),
    RouteInfo(RouteInfo),
    DagConf(DagConf),
    Target(TargetOption),
    Transit(TransitOption),
    PrefixInfo(PrefixInfo),
    /// A recognized TLV whose type we don't model; preserved so an
    /// embedding application can inspect it, and so re-encoding a message
    /// we didn't fully understand doesn't silently drop bytes.
    Unknown { option_type: u8, payload: Bytes },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagMetricContainer {
    pub metric_type: u8,
    pub flags: u8,
    pub aggregation: u8,
    pub precedence: u8,
    pub object: Bytes,
}

impl DagMetricContainer {
    pub fn etx(&self) -> Option<u16> {
        if self.metric_type == METRIC_TYPE_ETX && self.object.len() >= 2 {
            Some(u16::from_be_bytes([self.object[0], self.object[1]]))
        } else {
            None
        }
    }

    pub fn energy(&self) -> Option<u8> {
        if self.metric_type == METRIC_TYPE_ENERGY && !self.object.is_empty() {
            Some(self.object[0])
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub prefix_len: u8,
    pub preference: u8,
    pub route_lifetime: u32,
    pub prefix: Ipv6Addr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagConf {
    pub interval_doublings: u8,
    pub interval_min: u8,
    pub redundancy: u8,
    pub max_rankinc: u16,
    pub min_hoprankinc: u16,
    pub ocp: u16,
    pub default_lifetime: u8,
    pub lifetime_unit: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOption {
    pub prefix_len: u8,
    pub prefix: Ipv6Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitOption {
    pub flags: u8,
    pub path_control: u8,
    pub path_sequence: u8,
    pub lifetime: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixInfo {
    pub prefix_len: u8,
    pub flags: u8,
    pub valid_lifetime: u32,
    pub preferred_lifetime: u32,
    pub prefix: Ipv6Addr,
}

/// Walk a TLV-framed sub-option stream, invoking `handle` for every option
/// recognized. Returns an error as soon as one sub-option is malformed,
/// per the decode contract: a truncated or invalid sub-option aborts the
/// whole message rather than being skipped (unlike an *unrecognized*
/// type, which is skipped once its length is honored).
pub(crate) fn parse_options(mut buf: Bytes, mut handle: impl FnMut(RplOption)) -> Result<()> {
    while buf.has_remaining() {
        let option_type = buf[0];
        if option_type == OPT_PAD1 {
            buf.advance(1);
            continue;
        }
        require(&buf, 2, "sub-option header")?;
        let option_type = read_u8(&mut buf, "sub-option type")?;
        let option_len = read_u8(&mut buf, "sub-option length")? as usize;
        require(&buf, option_len, "sub-option payload")?;
        let payload = buf.copy_to_bytes(option_len);
        let opt = decode_option(option_type, payload)?;
        handle(opt);
    }
    Ok(())
}

fn decode_option(option_type: u8, mut payload: Bytes) -> Result<RplOption> {
    match option_type {
        OPT_DAG_METRIC_CONTAINER => {
            if payload.len() < 4 {
                return Err(Error::MalformedMessage("DAG_METRIC_CONTAINER too short"));
            }
            let metric_type = read_u8(&mut payload, "metric type")?;
            if metric_type != METRIC_TYPE_ENERGY && metric_type != METRIC_TYPE_ETX {
                return Err(Error::MalformedMessage("unknown DAG metric container type"));
            }
            let flags = read_u8(&mut payload, "metric flags")?;
            let aggregation = read_u8(&mut payload, "metric aggregation")?;
            let precedence = read_u8(&mut payload, "metric precedence")?;
            Ok(RplOption::DagMetricContainer(DagMetricContainer {
                metric_type,
                flags,
                aggregation,
                precedence,
                object: payload,
            }))
        }
        OPT_ROUTE_INFO => {
            require(&payload, 1, "ROUTE_INFO prefix length")?;
            let prefix_len = payload[0];
            if prefix_len > 128 {
                return Err(Error::MalformedMessage("ROUTE_INFO prefix length > 128"));
            }
            let n = prefix_byte_len(prefix_len);
            if payload.len() < n + 6 {
                return Err(Error::MalformedMessage("ROUTE_INFO shorter than prefix demands"));
            }
            let prefix_len = read_u8(&mut payload, "ROUTE_INFO prefix length")?;
            let preference = read_u8(&mut payload, "ROUTE_INFO preference")?;
            let route_lifetime = read_u32(&mut payload, "ROUTE_INFO lifetime")?;
            let prefix = read_prefix(&mut payload, n, "ROUTE_INFO prefix")?;
            Ok(RplOption::RouteInfo(RouteInfo {
                prefix_len,
                preference,
                route_lifetime,
                prefix,
            }))
        }
        OPT_DAG_CONF => {
            if payload.len() != 14 {
                return Err(Error::MalformedMessage("DAG_CONF length != 14"));
            }
            let _flags = read_u8(&mut payload, "DAG_CONF flags")?;
            let interval_doublings = read_u8(&mut payload, "DAG_CONF interval doublings")?;
            let interval_min = read_u8(&mut payload, "DAG_CONF interval min")?;
            let redundancy = read_u8(&mut payload, "DAG_CONF redundancy")?;
            let max_rankinc = read_u16(&mut payload, "DAG_CONF max rankinc")?;
            let min_hoprankinc = read_u16(&mut payload, "DAG_CONF min hoprankinc")?;
            let ocp = read_u16(&mut payload, "DAG_CONF ocp")?;
            let _reserved = read_u8(&mut payload, "DAG_CONF reserved")?;
            let default_lifetime = read_u8(&mut payload, "DAG_CONF default lifetime")?;
            let lifetime_unit = read_u16(&mut payload, "DAG_CONF lifetime unit")?;
            Ok(RplOption::DagConf(DagConf {
                interval_doublings,
                interval_min,
                redundancy,
                max_rankinc,
                min_hoprankinc,
                ocp,
                default_lifetime,
                lifetime_unit,
            }))
        }
        OPT_TARGET => {
            require(&payload, 2, "TARGET header")?;
            let prefix_len = payload[1];
            let n = prefix_byte_len(prefix_len);
            if payload.len() < 2 + n {
                return Err(Error::MalformedMessage("TARGET shorter than prefix demands"));
            }
            let _reserved = read_u8(&mut payload, "TARGET reserved")?;
            let prefix_len = read_u8(&mut payload, "TARGET prefix length")?;
            let prefix = read_prefix(&mut payload, n, "TARGET prefix")?;
            Ok(RplOption::Target(TargetOption { prefix_len, prefix }))
        }
        OPT_TRANSIT => {
            if payload.len() != 4 {
                return Err(Error::MalformedMessage("TRANSIT length != 4"));
            }
            let flags = read_u8(&mut payload, "TRANSIT flags")?;
            let path_control = read_u8(&mut payload, "TRANSIT path control")?;
            let path_sequence = read_u8(&mut payload, "TRANSIT path sequence")?;
            let lifetime = read_u8(&mut payload, "TRANSIT lifetime")?;
            Ok(RplOption::Transit(TransitOption {
                flags,
                path_control,
                path_sequence,
                lifetime,
            }))
        }
        OPT_PREFIX_INFO => {
            if payload.len() != 30 {
                return Err(Error::MalformedMessage("PREFIX_INFO length != 30"));
            }
            let prefix_len = read_u8(&mut payload, "PREFIX_INFO prefix length")?;
            let flags = read_u8(&mut payload, "PREFIX_INFO flags")?;
            let valid_lifetime = read_u32(&mut payload, "PREFIX_INFO valid lifetime")?;
            let preferred_lifetime = read_u32(&mut payload, "PREFIX_INFO preferred lifetime")?;
            payload.advance(4); // reserved2
            let prefix = read_ipv6(&mut payload, "PREFIX_INFO prefix")?;
            Ok(RplOption::PrefixInfo(PrefixInfo {
                prefix_len,
                flags,
                valid_lifetime,
                preferred_lifetime,
                prefix,
            }))
        }
        other => Ok(RplOption::Unknown {
            option_type: other,
            payload,
        }),
    }
}

/// Encode a single sub-option, writing its own Type/Length header.
pub(crate) fn encode_option(buf: &mut BytesMut, opt: &RplOption) {
    match opt {
        RplOption::DagMetricContainer(m) => {
            buf.put_u8(OPT_DAG_METRIC_CONTAINER);
            buf.put_u8((4 + m.object.len()) as u8);
            buf.put_u8(m.metric_type);
            buf.put_u8(m.flags);
            buf.put_u8(m.aggregation);
            buf.put_u8(m.precedence);
            buf.put_slice(&m.object);
        }
        RplOption::RouteInfo(r) => {
            let n = prefix_byte_len(r.prefix_len);
            buf.put_u8(OPT_ROUTE_INFO);
            buf.put_u8((6 + n) as u8);
            buf.put_u8(r.prefix_len);
            buf.put_u8(r.preference);
            buf.put_u32(r.route_lifetime);
            write_prefix(buf, r.prefix, n);
        }
        RplOption::DagConf(c) => {
            buf.put_u8(OPT_DAG_CONF);
            buf.put_u8(14);
            buf.put_u8(0); // flags (A/PCS unused)
            buf.put_u8(c.interval_doublings);
            buf.put_u8(c.interval_min);
            buf.put_u8(c.redundancy);
            buf.put_u16(c.max_rankinc);
            buf.put_u16(c.min_hoprankinc);
            buf.put_u16(c.ocp);
            buf.put_u8(0); // reserved
            buf.put_u8(c.default_lifetime);
            buf.put_u16(c.lifetime_unit);
        }
        RplOption::Target(t) => {
            let n = prefix_byte_len(t.prefix_len);
            buf.put_u8(OPT_TARGET);
            buf.put_u8((2 + n) as u8);
            buf.put_u8(0); // reserved
            buf.put_u8(t.prefix_len);
            write_prefix(buf, t.prefix, n);
        }
        RplOption::Transit(t) => {
            buf.put_u8(OPT_TRANSIT);
            buf.put_u8(4);
            buf.put_u8(t.flags);
            buf.put_u8(t.path_control);
            buf.put_u8(t.path_sequence);
            buf.put_u8(t.lifetime);
        }
        RplOption::PrefixInfo(p) => {
            buf.put_u8(OPT_PREFIX_INFO);
            buf.put_u8(30);
            buf.put_u8(p.prefix_len);
            buf.put_u8(p.flags);
            buf.put_u32(p.valid_lifetime);
            buf.put_u32(p.preferred_lifetime);
            buf.put_u32(0); // reserved2
            write_ipv6(buf, p.prefix);
        }
        RplOption::Unknown {
            option_type,
            payload,
        } => {
            buf.put_u8(*option_type);
            buf.put_u8(payload.len() as u8);
            buf.put_slice(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(opt: RplOption) {
        let mut buf = BytesMut::new();
        encode_option(&mut buf, &opt);
        let frozen = buf.freeze();
        let mut seen = Vec::new();
        parse_options(frozen, |o| seen.push(o)).unwrap();
        assert_eq!(seen, vec![opt]);
    }

    #[test]
    fn dag_conf_roundtrips() {
        roundtrip(RplOption::DagConf(DagConf {
            interval_doublings: 8,
            interval_min: 12,
            redundancy: 10,
            max_rankinc: 0x0100,
            min_hoprankinc: 0x0200,
            ocp: 0x0100,
            default_lifetime: 0x1E,
            lifetime_unit: 0x0008,
        }));
    }

    #[test]
    fn prefix_info_roundtrips() {
        roundtrip(RplOption::PrefixInfo(PrefixInfo {
            prefix_len: 64,
            flags: 0xC0,
            valid_lifetime: 0xFFFF_FFFF,
            preferred_lifetime: 0xFFFF_FFFF,
            prefix: "fe80::".parse().unwrap(),
        }));
    }

    #[test]
    fn target_roundtrips_with_partial_prefix_bytes() {
        roundtrip(RplOption::Target(TargetOption {
            prefix_len: 64,
            prefix: "2001:db8::".parse().unwrap(),
        }));
    }

    #[test]
    fn pad1_is_skipped_without_a_length_byte() {
        let mut buf = BytesMut::new();
        buf.put_u8(OPT_PAD1);
        encode_option(&mut buf, &RplOption::Transit(TransitOption {
            flags: 1,
            path_control: 2,
            path_sequence: 3,
            lifetime: 4,
        }));
        let mut seen = Vec::new();
        parse_options(buf.freeze(), |o| seen.push(o)).unwrap();
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn route_info_rejects_prefix_len_over_128() {
        let mut buf = BytesMut::new();
        buf.put_u8(OPT_ROUTE_INFO);
        buf.put_u8(7);
        buf.put_u8(200); // invalid prefix length
        buf.put_u8(0);
        buf.put_u32(0);
        buf.put_u8(0);
        let err = parse_options(buf.freeze(), |_| {}).unwrap_err();
        assert_eq!(err, Error::MalformedMessage("ROUTE_INFO prefix length > 128"));
    }

    #[test]
    fn dag_metric_container_rejects_short_payload() {
        let mut buf = BytesMut::new();
        buf.put_u8(OPT_DAG_METRIC_CONTAINER);
        buf.put_u8(3);
        buf.put_slice(&[1, 2, 3]);
        let err = parse_options(buf.freeze(), |_| {}).unwrap_err();
        assert_eq!(err, Error::MalformedMessage("DAG_METRIC_CONTAINER too short"));
    }

    #[test]
    fn unknown_option_type_is_skipped_after_honoring_length() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x7F); // unrecognized type
        buf.put_u8(2);
        buf.put_slice(&[0xAA, 0xBB]);
        encode_option(&mut buf, &RplOption::Transit(TransitOption {
            flags: 1,
            path_control: 1,
            path_sequence: 1,
            lifetime: 1,
        }));
        let mut seen = Vec::new();
        parse_options(buf.freeze(), |o| seen.push(o)).unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], RplOption::Unknown { option_type: 0x7F, .. }));
    }

    #[test]
    fn truncated_option_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u8(OPT_TRANSIT);
        buf.put_u8(4);
        buf.put_slice(&[1, 2]); // short by two bytes
        assert!(parse_options(buf.freeze(), |_| {}).is_err());
    }
}
