//! Wire encoding for the four RPL control messages, plus the raw-RSSI
//! conversion shared by the mobility controller.

pub mod dao;
pub mod dio;
pub mod dis;
pub mod options;
pub(crate) mod util;

pub use dao::{DaoAck, DaoMessage};
pub use dio::{DioMessage, MobilityFlag};
pub use dis::DisMessage;
pub use options::{
    DagConf, DagMetricContainer, PrefixInfo, RouteInfo, RplOption, TargetOption, TransitOption,
};

use crate::config::RplConfig;

/// ICMPv6 code values identifying an RPL control message (RFC 6550 §6).
pub const ICMPV6_TYPE_RPL: u8 = 155;
pub const RPL_CODE_DIS: u8 = 0x00;
pub const RPL_CODE_DIO: u8 = 0x01;
pub const RPL_CODE_DAO: u8 = 0x02;
pub const RPL_CODE_DAO_ACK: u8 = 0x03;

/// Rank value meaning "unreachable" / "no path to the root".
pub const RANK_INFINITE: u16 = 0xFFFF;

/// Convert a raw RSSI sample into dBm.
///
/// The radio reports RSSI as an unsigned byte that wraps rather than as a
/// signed quantity, so the true value is recovered by adding one of two
/// fixed offsets depending on which side of
/// [`RplConfig::rssi_high_range_threshold`] the sample falls. Both offsets,
/// and the threshold itself, are configurable because they're a property of
/// the radio, not of the protocol.
pub fn raw_to_true(raw: u8, cfg: &RplConfig) -> i16 {
    if raw > cfg.rssi_high_range_threshold {
        raw as i16 + cfg.rssi_offset_high
    } else {
        raw as i16 + cfg.rssi_offset_low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_to_true_matches_high_range_offset() {
        let cfg = RplConfig::default();
        assert_eq!(raw_to_true(210, &cfg), -91);
        assert_eq!(raw_to_true(215, &cfg), -86);
        assert_eq!(raw_to_true(220, &cfg), -81);
    }

    #[test]
    fn raw_to_true_matches_low_range_offset() {
        let cfg = RplConfig::default();
        assert_eq!(raw_to_true(100, &cfg), 55);
        assert_eq!(raw_to_true(0, &cfg), -45);
    }
}
