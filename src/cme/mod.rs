//! Control-message engine: reacts to inbound DIS/DIO/DAO/DAO-ACK, emits
//! outbound replies, and keeps DAG/neighbor/route state consistent through
//! the [`crate::services::DagService`] it's handed.

use std::net::Ipv6Addr;

use bytes::BytesMut;
use tracing::debug;

use crate::codec::{raw_to_true, DaoAck, DaoMessage, DioMessage, DisMessage, MobilityFlag, RplOption, TargetOption, TransitOption, RANK_INFINITE, RPL_CODE_DAO, RPL_CODE_DAO_ACK};
use crate::core::{Core, McAdapter, Platform, PendingRouteRemoval, DEFAULT_INSTANCE};
use crate::error::{Error, Result};
use crate::services::{dao_target_lifetime, DagService, LearnedFrom, Mode};

impl<P: Platform> Core<P> {
    /// An inbound DIS: either a burst member from another node's discovery
    /// round, a periodic multicast solicitation, or a unicast probe this
    /// node must answer.
    pub(crate) fn dis_in(&mut self, msg: DisMessage, src: Ipv6Addr, multicast_dest: bool, link_rssi: u8) -> Result<()> {
        if multicast_dest && msg.is_burst_member() {
            if Some(src) == self.dag.rpl_get_parent_ipaddr(DEFAULT_INSTANCE) {
                debug!(%src, "ignoring burst member from our own preferred parent");
                return Ok(());
            }
            let true_rssi = raw_to_true(link_rssi, &self.config);
            self.mobility.rssi_aggregate_mut().add(true_rssi);
            self.candidate_reply_target = Some(src);
            if let Some(h) = self.burst_collection_timer.take() {
                self.bus.cancel(h);
            }
            let remaining = (3u64.saturating_sub(msg.burst_counter as u64) * self.config.base_tick) / 50;
            self.burst_collection_timer = Some(self.bus.arm(remaining));
            Ok(())
        } else if multicast_dest && !msg.mobility_flag {
            self.dag.rpl_reset_dio_timer(DEFAULT_INSTANCE);
            Ok(())
        } else if !multicast_dest && msg.mobility_flag {
            self.dio_out(DEFAULT_INSTANCE, Some(src), MobilityFlag::ParentAssessmentReply, Some(link_rssi))
        } else {
            self.dio_out(DEFAULT_INSTANCE, Some(src), MobilityFlag::Periodic, None)
        }
    }

    /// An inbound DIO: route mobility-tagged replies to the mobility
    /// controller, everything else through the DAG service's Objective
    /// Function gate.
    pub(crate) fn dio_in(&mut self, msg: DioMessage, src: Ipv6Addr) -> Result<()> {
        self.dag.rpl_ensure_neighbor(msg.instance_id, src, msg.rank, msg.dtsn)?;

        if self.platform.is_mobile() && msg.mobility_flags == MobilityFlag::ParentAssessmentReply {
            let raw_rssi = msg.rssi;
            let cfg = self.config.clone();
            let mut adapter = McAdapter { platform: &mut self.platform };
            self.mobility.on_parent_reachable(raw_rssi, &cfg, &mut self.bus, &mut adapter);
            return Ok(());
        }
        if self.platform.is_mobile() && msg.mobility_flags == MobilityFlag::DiscoveryReply {
            self.mobility.on_discovery_reply(src, msg);
            return Ok(());
        }
        self.dag.rpl_process_dio(msg.instance_id, src, &msg, false)
    }

    /// Build and send a DIO. `dis_rssi` carries the raw RSSI of the
    /// triggering DIS when `mobility_flags == ParentAssessmentReply`;
    /// otherwise the current RSSI aggregate (then cleared) fills the byte.
    pub(crate) fn dio_out(&mut self, instance_id: u8, dest: Option<Ipv6Addr>, mobility_flags: MobilityFlag, dis_rssi: Option<u8>) -> Result<()> {
        let rssi_byte = if mobility_flags == MobilityFlag::ParentAssessmentReply {
            dis_rssi.unwrap_or(0)
        } else {
            let avg = self.mobility.rssi_aggregate_mut().average().unwrap_or(0);
            self.mobility.rssi_aggregate_mut().reset();
            avg as u8
        };

        let mode = self.dag.rpl_get_mode(instance_id).unwrap_or(Mode::Normal);
        let Some(instance) = self.dag.instance(instance_id) else {
            debug!(instance_id, "no DAG state yet, suppressing DIO");
            return Ok(());
        };

        let mut options = Vec::new();
        if !matches!(mode, Mode::Feather | Mode::LeafOnly) {
            options.push(RplOption::DagConf(instance.dio_conf.clone()));
        }
        if let Some(metric) = &instance.metric_container {
            options.push(RplOption::DagMetricContainer(metric.clone()));
        }
        if let Some(prefix) = &instance.dag.prefix {
            options.push(RplOption::PrefixInfo(prefix.clone()));
        }

        let Some(instance) = self.dag.instance_mut(instance_id) else {
            return Ok(());
        };
        instance.dtsn_out.increment();
        let msg = DioMessage {
            instance_id,
            version: instance.dag.version.into(),
            rank: instance.dag.rank,
            grounded: instance.dag.grounded,
            mop: instance.mop,
            preference: instance.dag.preference,
            dtsn: instance.dtsn_out,
            mobility_flags,
            rssi: rssi_byte,
            dag_id: instance.dag.dag_id,
            options,
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        self.platform.icmp_send(dest, crate::codec::RPL_CODE_DIO, &buf);
        Ok(())
    }

    /// An inbound DAO: install or withdraw a route, forwarding upstream and
    /// ACKing as the sender requested.
    pub(crate) fn dao_in(&mut self, msg: DaoMessage, src: Ipv6Addr) -> Result<()> {
        let instance = self.dag.instance(msg.instance_id).cloned().ok_or(Error::UnknownInstance(msg.instance_id))?;

        if msg.d {
            if let Some(dag_id) = msg.dag_id {
                if dag_id != instance.dag.dag_id {
                    return Err(Error::DagMismatch);
                }
            }
        }

        let target = msg.target().ok_or(Error::MalformedMessage("DAO missing TARGET"))?;
        let transit = msg.transit().ok_or(Error::MalformedMessage("DAO missing TRANSIT"))?;

        if transit.lifetime == 0 {
            let withdrawn = self.dag.rpl_mark_no_path(msg.instance_id, target.prefix, target.prefix_len, src);
            if withdrawn {
                let handle = self.bus.arm(self.config.dao_expiration_timeout_ticks as u64);
                self.pending_route_removals.push(PendingRouteRemoval {
                    handle,
                    instance_id: msg.instance_id,
                    prefix: target.prefix,
                    prefix_len: target.prefix_len,
                    next_hop: src,
                });
                if let Some(parent) = instance.dag.preferred_parent {
                    self.forward_dao(parent, &msg);
                }
                if msg.k {
                    self.dao_ack_out(msg.instance_id, msg.sequence, 0, src);
                }
            }
            return Ok(());
        }

        let existing_parent_entry = self.dag.rpl_find_parent(msg.instance_id, src);
        let is_loop = existing_parent_entry.as_ref().is_some_and(|p| p.rank < instance.dag.rank)
            || instance.dag.preferred_parent == Some(src);
        if is_loop {
            self.dag.rpl_mark_parent_looped(msg.instance_id, src);
            return Err(Error::LoopDetected);
        }

        // A DAO sender with no prior neighbor entry hasn't advertised a rank
        // via DIO; default to INFINITE rather than a fabricated 0, which
        // would make the next refresh from the same sender look like a loop.
        self.dag
            .rpl_ensure_neighbor(msg.instance_id, src, existing_parent_entry.map(|p| p.rank).unwrap_or(RANK_INFINITE), msg.sequence)?;
        self.dag.rpl_lock_parent(msg.instance_id, src)?;

        let lifetime = dao_target_lifetime(&msg, instance.dio_conf.lifetime_unit);
        self.dag
            .rpl_add_route(msg.instance_id, target.prefix, target.prefix_len, src, lifetime, LearnedFrom::Unicast)?;

        if let Some(parent) = instance.dag.preferred_parent {
            self.forward_dao(parent, &msg);
        }
        if msg.k {
            self.dao_ack_out(msg.instance_id, msg.sequence, 0, src);
        }
        Ok(())
    }

    fn forward_dao(&mut self, parent: Ipv6Addr, msg: &DaoMessage) {
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        self.platform.icmp_send(Some(parent), RPL_CODE_DAO, &buf);
    }

    /// Publish a DAO for `prefix`/`prefix_len` toward our preferred parent.
    /// `lifetime_units` is the raw TRANSIT lifetime byte (in
    /// `lifetime_unit`s, not seconds). When `hand_off_just_completed` and
    /// DAO-ACKs are enabled, arms the one-shot guard timer that
    /// `dao_ack_in`/its own expiry clear.
    pub(crate) fn dao_out(&mut self, instance_id: u8, prefix: Ipv6Addr, prefix_len: u8, lifetime_units: u8, hand_off_just_completed: bool) -> Result<()> {
        if matches!(self.dag.rpl_get_mode(instance_id), Some(Mode::Feather)) {
            return Ok(());
        }
        if self.platform.global_address().is_none() {
            return Ok(());
        }
        let Some(parent) = self.dag.rpl_get_parent_ipaddr(instance_id) else {
            return Ok(());
        };
        let Some(instance) = self.dag.instance_mut(instance_id) else {
            return Ok(());
        };
        instance.dao_sequence.increment();
        let sequence = instance.dao_sequence;
        let dag_id = instance.dag.dag_id;

        let msg = DaoMessage {
            instance_id,
            k: self.config.dao_ack_enabled,
            d: self.config.dao_include_dag_id,
            sequence,
            dag_id: self.config.dao_include_dag_id.then_some(dag_id),
            options: vec![
                RplOption::Target(TargetOption { prefix_len, prefix }),
                RplOption::Transit(TransitOption {
                    flags: 0,
                    path_control: 0,
                    path_sequence: 0,
                    lifetime: lifetime_units,
                }),
            ],
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        self.platform.icmp_send(Some(parent), RPL_CODE_DAO, &buf);

        if hand_off_just_completed && self.config.dao_ack_enabled {
            self.dao_ack_guard = Some(self.bus.arm(self.config.base_tick / 4));
            self.pending_dao = Some((prefix, prefix_len, lifetime_units));
        }
        Ok(())
    }

    fn dao_ack_out(&mut self, instance_id: u8, sequence: crate::lollipop::Lollipop, status: u8, dest: Ipv6Addr) {
        let ack = DaoAck { instance_id, sequence, status };
        let mut buf = BytesMut::new();
        ack.encode(&mut buf);
        self.platform.icmp_send(Some(dest), RPL_CODE_DAO_ACK, &buf);
    }

    /// An inbound DAO-ACK: clear the guard timer armed by `dao_out`.
    pub(crate) fn dao_ack_in(&mut self, _ack: DaoAck) -> Result<()> {
        if let Some(h) = self.dao_ack_guard.take() {
            self.bus.cancel(h);
        }
        self.pending_dao = None;
        Ok(())
    }
}
