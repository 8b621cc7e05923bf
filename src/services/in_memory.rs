//! A reference `DagService`: good enough to drive the invariants in tests,
//! not a claim of RFC 6552 completeness. Rank arithmetic is the simplest
//! rule that satisfies "rank increases away from the root, by at least
//! `min_hoprankinc`, clamped by `max_rankinc` when one is configured."

use std::collections::{HashMap, VecDeque};
use std::net::Ipv6Addr;

use tracing::{debug, warn};

use crate::codec::{DioMessage, RANK_INFINITE};
use crate::config::RplConfig;
use crate::error::{Error, Result};

use super::{Dag, DagService, DodagInstance, LearnedFrom, Mode, Parent, Route};

#[derive(Debug)]
pub struct InMemoryDagService {
    config: RplConfig,
    instances: HashMap<u8, DodagInstance>,
    neighbors: HashMap<u8, HashMap<Ipv6Addr, Parent>>,
    routes: HashMap<u8, Vec<Route>>,
    dao_queue: HashMap<u8, VecDeque<(Ipv6Addr, u8, u8)>>,
}

impl InMemoryDagService {
    pub fn new(config: RplConfig) -> InMemoryDagService {
        InMemoryDagService {
            config,
            instances: HashMap::new(),
            neighbors: HashMap::new(),
            routes: HashMap::new(),
            dao_queue: HashMap::new(),
        }
    }

    fn hop_rank_increment(&self) -> u16 {
        self.config.min_hoprankinc.max(1)
    }

    fn clamp_rankinc(&self, increment: u16) -> u16 {
        if self.config.max_rankinc > 0 {
            increment.min(self.config.max_rankinc)
        } else {
            increment
        }
    }
}

impl DagService for InMemoryDagService {
    fn rpl_ensure_neighbor(&mut self, instance_id: u8, addr: Ipv6Addr, rank: u16, dtsn_in: crate::lollipop::Lollipop) -> Result<()> {
        let table = self.neighbors.entry(instance_id).or_default();
        if let Some(parent) = table.get_mut(&addr) {
            parent.rank = rank;
            parent.dtsn_in = dtsn_in;
            return Ok(());
        }
        if table.len() >= self.config.neighbor_cache_capacity {
            warn!(%addr, "neighbor cache full");
            return Err(Error::NeighborCacheFull);
        }
        table.insert(
            addr,
            Parent {
                address: addr,
                rank,
                dtsn_in,
                updated: false,
                ref_count: 0,
            },
        );
        Ok(())
    }

    fn rpl_process_dio(&mut self, instance_id: u8, src: Ipv6Addr, dio: &DioMessage, forced: bool) -> Result<()> {
        self.rpl_ensure_neighbor(instance_id, src, dio.rank, dio.dtsn)?;

        let increment = self.clamp_rankinc(self.hop_rank_increment());
        let candidate_rank = dio.rank.saturating_add(increment);

        let default_dio_conf = crate::codec::DagConf {
            interval_doublings: self.config.dio_interval_doublings,
            interval_min: self.config.dio_interval_min,
            redundancy: self.config.dio_redundancy,
            max_rankinc: self.config.max_rankinc,
            min_hoprankinc: self.config.min_hoprankinc,
            ocp: 0,
            default_lifetime: self.config.default_lifetime,
            lifetime_unit: self.config.default_lifetime_unit,
        };
        let instance = self.instances.entry(instance_id).or_insert_with(|| DodagInstance {
            instance_id,
            mode: Mode::Normal,
            mop: dio.mop,
            dag: Dag::detached(dio.dag_id),
            dio_conf: dio.dag_conf().cloned().unwrap_or(default_dio_conf),
            metric_container: dio.metric_container().cloned(),
            dtsn_out: crate::lollipop::Lollipop::from(0),
            dao_sequence: crate::lollipop::Lollipop::from(0),
        });

        let should_accept = forced || instance.dag.rank == RANK_INFINITE || candidate_rank < instance.dag.rank;
        if should_accept {
            debug!(instance_id, %src, rank = candidate_rank, forced, "accepted DIO, switching preferred parent");
            instance.dag.version = dio.version.into();
            instance.dag.grounded = dio.grounded;
            instance.dag.preference = dio.preference;
            instance.dag.rank = candidate_rank;
            instance.dag.preferred_parent = Some(src);
            if let Some(prefix_info) = dio.prefix_info() {
                instance.dag.prefix = Some(prefix_info.clone());
            }
            if let Some(metric) = dio.metric_container() {
                instance.metric_container = Some(metric.clone());
            }
        }
        Ok(())
    }

    fn rpl_find_parent(&self, instance_id: u8, addr: Ipv6Addr) -> Option<Parent> {
        self.neighbors.get(&instance_id)?.get(&addr).cloned()
    }

    fn rpl_nullify_parent(&mut self, instance_id: u8) {
        if let Some(instance) = self.instances.get_mut(&instance_id) {
            instance.dag.preferred_parent = None;
            instance.dag.rank = RANK_INFINITE;
        }
    }

    fn rpl_get_parent_ipaddr(&self, instance_id: u8) -> Option<Ipv6Addr> {
        self.instances.get(&instance_id)?.dag.preferred_parent
    }

    fn rpl_add_route(
        &mut self,
        instance_id: u8,
        prefix: Ipv6Addr,
        prefix_len: u8,
        next_hop: Ipv6Addr,
        lifetime: u32,
        learned_from: LearnedFrom,
    ) -> Result<()> {
        let table = self.routes.entry(instance_id).or_default();
        if let Some(route) = table
            .iter_mut()
            .find(|r| r.prefix == prefix && r.prefix_len == prefix_len && r.next_hop == next_hop)
        {
            route.lifetime = lifetime;
            route.nopath_received = false;
            return Ok(());
        }
        if table.len() >= self.config.route_table_capacity {
            warn!(%prefix, prefix_len, "route table full");
            return Err(Error::MemoryOverflow);
        }
        table.push(Route {
            prefix,
            prefix_len,
            next_hop,
            lifetime,
            learned_from,
            nopath_received: false,
        });
        Ok(())
    }

    fn rpl_mark_no_path(&mut self, instance_id: u8, prefix: Ipv6Addr, prefix_len: u8, next_hop: Ipv6Addr) -> bool {
        let Some(table) = self.routes.get_mut(&instance_id) else {
            return false;
        };
        match table
            .iter_mut()
            .find(|r| super::no_path_matches(r, prefix, prefix_len, next_hop))
        {
            Some(route) => {
                route.nopath_received = true;
                true
            }
            None => false,
        }
    }

    fn rpl_remove_route(&mut self, instance_id: u8, prefix: Ipv6Addr, prefix_len: u8, next_hop: Ipv6Addr) {
        if let Some(table) = self.routes.get_mut(&instance_id) {
            table.retain(|r| !(r.prefix == prefix && r.prefix_len == prefix_len && r.next_hop == next_hop));
        }
    }

    fn rpl_lock_parent(&mut self, instance_id: u8, addr: Ipv6Addr) -> Result<()> {
        let table = self.neighbors.entry(instance_id).or_default();
        if let Some(parent) = table.get_mut(&addr) {
            parent.ref_count += 1;
            return Ok(());
        }
        if table.len() >= self.config.neighbor_cache_capacity {
            return Err(Error::NeighborCacheFull);
        }
        table.insert(
            addr,
            Parent {
                address: addr,
                rank: RANK_INFINITE,
                dtsn_in: crate::lollipop::Lollipop::from(0),
                updated: false,
                ref_count: 1,
            },
        );
        Ok(())
    }

    fn rpl_reset_dio_timer(&mut self, instance_id: u8) {
        debug!(instance_id, "DIO trickle timer reset");
    }

    fn rpl_schedule_dao(&mut self, instance_id: u8, prefix: Ipv6Addr, prefix_len: u8, lifetime_units: u8) {
        self.dao_queue
            .entry(instance_id)
            .or_default()
            .push_back((prefix, prefix_len, lifetime_units));
    }

    fn rpl_get_mode(&self, instance_id: u8) -> Option<Mode> {
        self.instances.get(&instance_id).map(|i| i.mode)
    }

    fn instance(&self, instance_id: u8) -> Option<&DodagInstance> {
        self.instances.get(&instance_id)
    }

    fn instance_mut(&mut self, instance_id: u8) -> Option<&mut DodagInstance> {
        self.instances.get_mut(&instance_id)
    }

    fn rpl_mark_parent_looped(&mut self, instance_id: u8, addr: Ipv6Addr) {
        if let Some(parent) = self.neighbors.get_mut(&instance_id).and_then(|t| t.get_mut(&addr)) {
            parent.rank = RANK_INFINITE;
            parent.updated = true;
        }
    }

    fn take_scheduled_dao(&mut self, instance_id: u8) -> Option<(Ipv6Addr, u8, u8)> {
        self.dao_queue.get_mut(&instance_id)?.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MobilityFlag;

    fn dio(rank: u16) -> DioMessage {
        DioMessage {
            instance_id: 0,
            version: 1,
            rank,
            grounded: false,
            mop: 0,
            preference: 0,
            dtsn: crate::lollipop::Lollipop::from(1),
            mobility_flags: MobilityFlag::Periodic,
            rssi: 0,
            dag_id: "fe80::1".parse().unwrap(),
            options: vec![],
        }
    }

    #[test]
    fn first_dio_from_detached_state_is_accepted() {
        let mut svc = InMemoryDagService::new(RplConfig::default());
        let src: Ipv6Addr = "fe80::2".parse().unwrap();
        svc.rpl_process_dio(0, src, &dio(10), false).unwrap();
        assert_eq!(svc.rpl_get_parent_ipaddr(0), Some(src));
        assert!(svc.instance(0).unwrap().dag.rank > 10);
    }

    #[test]
    fn worse_rank_is_not_accepted_once_attached() {
        let mut svc = InMemoryDagService::new(RplConfig::default());
        let good: Ipv6Addr = "fe80::2".parse().unwrap();
        let worse: Ipv6Addr = "fe80::3".parse().unwrap();
        svc.rpl_process_dio(0, good, &dio(10), false).unwrap();
        let attached_rank = svc.instance(0).unwrap().dag.rank;
        svc.rpl_process_dio(0, worse, &dio(500), false).unwrap();
        assert_eq!(svc.rpl_get_parent_ipaddr(0), Some(good));
        assert_eq!(svc.instance(0).unwrap().dag.rank, attached_rank);
    }

    #[test]
    fn forced_accept_switches_parent_regardless_of_rank() {
        let mut svc = InMemoryDagService::new(RplConfig::default());
        let good: Ipv6Addr = "fe80::2".parse().unwrap();
        let worse: Ipv6Addr = "fe80::3".parse().unwrap();
        svc.rpl_process_dio(0, good, &dio(10), false).unwrap();
        svc.rpl_process_dio(0, worse, &dio(500), true).unwrap();
        assert_eq!(svc.rpl_get_parent_ipaddr(0), Some(worse));
    }

    #[test]
    fn neighbor_cache_full_is_reported() {
        let mut cfg = RplConfig::default();
        cfg.neighbor_cache_capacity = 1;
        let mut svc = InMemoryDagService::new(cfg);
        svc.rpl_process_dio(0, "fe80::2".parse().unwrap(), &dio(10), false).unwrap();
        let err = svc
            .rpl_process_dio(0, "fe80::3".parse().unwrap(), &dio(20), false)
            .unwrap_err();
        assert_eq!(err, Error::NeighborCacheFull);
    }

    #[test]
    fn loop_detection_forces_rank_infinite() {
        let mut svc = InMemoryDagService::new(RplConfig::default());
        let parent: Ipv6Addr = "fe80::2".parse().unwrap();
        svc.rpl_process_dio(0, parent, &dio(5), false).unwrap();
        svc.rpl_mark_parent_looped(0, parent);
        let p = svc.rpl_find_parent(0, parent).unwrap();
        assert_eq!(p.rank, RANK_INFINITE);
        assert!(p.updated);
    }

    #[test]
    fn route_install_then_no_path_withdrawal() {
        let mut svc = InMemoryDagService::new(RplConfig::default());
        let next_hop: Ipv6Addr = "fe80::2".parse().unwrap();
        let prefix: Ipv6Addr = "2001:db8::".parse().unwrap();
        svc.rpl_add_route(0, prefix, 64, next_hop, 300, LearnedFrom::Unicast).unwrap();
        assert!(svc.rpl_mark_no_path(0, prefix, 64, next_hop));
        assert!(!svc.rpl_mark_no_path(0, prefix, 64, next_hop));
    }

    #[test]
    fn remove_route_drops_the_record_entirely() {
        let mut svc = InMemoryDagService::new(RplConfig::default());
        let next_hop: Ipv6Addr = "fe80::2".parse().unwrap();
        let prefix: Ipv6Addr = "2001:db8::".parse().unwrap();
        svc.rpl_add_route(0, prefix, 64, next_hop, 300, LearnedFrom::Unicast).unwrap();
        assert!(svc.rpl_mark_no_path(0, prefix, 64, next_hop));
        svc.rpl_remove_route(0, prefix, 64, next_hop);
        assert!(svc.routes.get(&0).map(|table| table.is_empty()).unwrap_or(true));
    }
}
