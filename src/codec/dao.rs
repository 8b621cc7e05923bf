//! DAO (Destination Advertisement Object) and DAO-ACK decode/encode.

use bytes::{BufMut, Bytes, BytesMut};
use std::net::Ipv6Addr;

use crate::codec::options::{encode_option, parse_options, RplOption, TargetOption, TransitOption};
use crate::codec::util::*;
use crate::error::Result;
use crate::lollipop::Lollipop;

const K_BIT: u8 = 0x80;
const D_BIT: u8 = 0x40;

#[derive(Debug, Clone, PartialEq)]
pub struct DaoMessage {
    pub instance_id: u8,
    /// `K`: sender wants a DAO-ACK.
    pub k: bool,
    /// `D`: a DAG-ID is present.
    pub d: bool,
    pub sequence: Lollipop,
    pub dag_id: Option<Ipv6Addr>,
    pub options: Vec<RplOption>,
}

const FIXED_HEADER_LEN: usize = 4;

impl DaoMessage {
    pub fn decode(payload: &[u8]) -> Result<DaoMessage> {
        let mut buf = Bytes::copy_from_slice(payload);
        require(&buf, FIXED_HEADER_LEN, "DAO header")?;
        let instance_id = read_u8(&mut buf, "DAO instance_id")?;
        let flags = read_u8(&mut buf, "DAO flags")?;
        let _reserved = read_u8(&mut buf, "DAO reserved")?;
        let sequence = Lollipop::from(read_u8(&mut buf, "DAO sequence")?);
        let k = flags & K_BIT != 0;
        let d = flags & D_BIT != 0;
        let dag_id = if d {
            Some(read_ipv6(&mut buf, "DAO dag_id")?)
        } else {
            None
        };
        let mut options = Vec::new();
        parse_options(buf, |opt| options.push(opt))?;
        Ok(DaoMessage {
            instance_id,
            k,
            d,
            sequence,
            dag_id,
            options,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.instance_id);
        let mut flags = 0u8;
        if self.k {
            flags |= K_BIT;
        }
        if self.d {
            flags |= D_BIT;
        }
        buf.put_u8(flags);
        buf.put_u8(0); // reserved
        buf.put_u8(self.sequence.value());
        if let (true, Some(dag_id)) = (self.d, self.dag_id) {
            write_ipv6(buf, dag_id);
        }
        for opt in &self.options {
            encode_option(buf, opt);
        }
    }

    /// The last `TARGET` sub-option seen, per the "last one wins" parse
    /// rule in §4.2.
    pub fn target(&self) -> Option<&TargetOption> {
        self.options.iter().rev().find_map(|o| match o {
            RplOption::Target(t) => Some(t),
            _ => None,
        })
    }

    /// The last `TRANSIT` sub-option seen.
    pub fn transit(&self) -> Option<&TransitOption> {
        self.options.iter().rev().find_map(|o| match o {
            RplOption::Transit(t) => Some(t),
            _ => None,
        })
    }

    /// A no-path DAO withdraws a route: `TRANSIT.lifetime == 0`.
    pub fn is_no_path(&self) -> bool {
        self.transit().map(|t| t.lifetime == 0).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaoAck {
    pub instance_id: u8,
    pub sequence: Lollipop,
    pub status: u8,
}

impl DaoAck {
    pub fn decode(payload: &[u8]) -> Result<DaoAck> {
        let mut buf = Bytes::copy_from_slice(payload);
        require(&buf, 4, "DAO-ACK header")?;
        let instance_id = read_u8(&mut buf, "DAO-ACK instance_id")?;
        let _reserved = read_u8(&mut buf, "DAO-ACK reserved")?;
        let sequence = Lollipop::from(read_u8(&mut buf, "DAO-ACK sequence")?);
        let status = read_u8(&mut buf, "DAO-ACK status")?;
        Ok(DaoAck {
            instance_id,
            sequence,
            status,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.instance_id);
        buf.put_u8(0); // reserved
        buf.put_u8(self.sequence.value());
        buf.put_u8(self.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(prefix_len: u8, prefix: &str) -> RplOption {
        RplOption::Target(TargetOption {
            prefix_len,
            prefix: prefix.parse().unwrap(),
        })
    }

    fn transit(lifetime: u8) -> RplOption {
        RplOption::Transit(TransitOption {
            flags: 0,
            path_control: 0,
            path_sequence: 0,
            lifetime,
        })
    }

    #[test]
    fn roundtrips_with_dag_id_and_suboptions() {
        let msg = DaoMessage {
            instance_id: 1,
            k: true,
            d: true,
            sequence: Lollipop::from(5),
            dag_id: Some("fe80::1".parse().unwrap()),
            options: vec![target(64, "2001:db8::1"), transit(30)],
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = DaoMessage::decode(&buf).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.target().unwrap().prefix_len, 64);
        assert_eq!(decoded.transit().unwrap().lifetime, 30);
        assert!(!decoded.is_no_path());
    }

    #[test]
    fn roundtrips_without_dag_id() {
        let msg = DaoMessage {
            instance_id: 1,
            k: false,
            d: false,
            sequence: Lollipop::from(200),
            dag_id: None,
            options: vec![target(128, "2001:db8::1"), transit(0)],
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = DaoMessage::decode(&buf).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.is_no_path());
    }

    #[test]
    fn last_target_and_transit_win_on_duplicates() {
        let msg = DaoMessage {
            instance_id: 1,
            k: false,
            d: false,
            sequence: Lollipop::from(1),
            dag_id: None,
            options: vec![
                target(64, "2001:db8:1::"),
                transit(10),
                target(128, "2001:db8:2::1"),
                transit(20),
            ],
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = DaoMessage::decode(&buf).unwrap();
        assert_eq!(decoded.target().unwrap().prefix_len, 128);
        assert_eq!(decoded.transit().unwrap().lifetime, 20);
    }

    #[test]
    fn dao_ack_roundtrips() {
        let ack = DaoAck {
            instance_id: 1,
            sequence: Lollipop::from(9),
            status: 0,
        };
        let mut buf = BytesMut::new();
        ack.encode(&mut buf);
        assert_eq!(DaoAck::decode(&buf).unwrap(), ack);
    }

    #[test]
    fn truncated_dao_is_malformed() {
        assert!(DaoMessage::decode(&[1, 0, 0]).is_err());
    }
}
