//! The DAG/neighbor/route tables are external collaborators in principle —
//! a production node already has them — but this module ships a minimal
//! in-memory implementation behind the same narrow interface so the
//! control-message engine and mobility controller are exercisable (and
//! testable) without a caller supplying their own. Objective Function
//! arithmetic is deliberately the simplest rule that satisfies the rank
//! invariants, not a claim of RFC 6552 completeness.

mod in_memory;

pub use in_memory::InMemoryDagService;

use std::net::Ipv6Addr;

use crate::codec::{DagConf, DagMetricContainer, DaoMessage, DioMessage, PrefixInfo};
use crate::error::Result;
use crate::lollipop::Lollipop;

/// Mode of operation a `DodagInstance` is running in (RFC 6550 §6.3.1, plus
/// the non-standard "feather" suppression mode used by `dao_out`/`dio_out`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    /// Suppress outbound DAO/DIO traffic — a low-power "don't advertise"
    /// mode, not part of RFC 6550 proper.
    Feather,
    LeafOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parent {
    pub address: Ipv6Addr,
    pub rank: u16,
    pub dtsn_in: Lollipop,
    pub updated: bool,
    pub ref_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnedFrom {
    Unicast,
    Multicast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    pub next_hop: Ipv6Addr,
    pub lifetime: u32,
    pub learned_from: LearnedFrom,
    pub nopath_received: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dag {
    pub dag_id: Ipv6Addr,
    pub version: Lollipop,
    pub rank: u16,
    pub grounded: bool,
    pub preference: u8,
    pub preferred_parent: Option<Ipv6Addr>,
    pub prefix: Option<PrefixInfo>,
}

impl Dag {
    pub fn detached(dag_id: Ipv6Addr) -> Dag {
        Dag {
            dag_id,
            version: Lollipop::from(0),
            rank: crate::codec::RANK_INFINITE,
            grounded: false,
            preference: 0,
            preferred_parent: None,
            prefix: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DodagInstance {
    pub instance_id: u8,
    pub mode: Mode,
    /// RFC 6550 Mode of Operation (0..=3) — unrelated to [`Mode`], which is
    /// this crate's own feather/leaf-only suppression switch.
    pub mop: u8,
    pub dag: Dag,
    pub dio_conf: DagConf,
    pub metric_container: Option<DagMetricContainer>,
    pub dtsn_out: Lollipop,
    pub dao_sequence: Lollipop,
}

/// Narrow interface the control-message engine and mobility controller use
/// to read and mutate DAG/neighbor/route state. `new_dio_interval` (trickle
/// interval recomputation) is intentionally not part of this trait: it's
/// Objective Function territory, out of scope here.
pub trait DagService {
    /// Accept or reject a DIO per Objective Function rules, updating rank
    /// and (if warranted) preferred parent. `forced` bypasses the normal
    /// comparison-against-current-rank gate — used when the mobility
    /// controller has already chosen `src` as the winner of a discovery
    /// round and the DAG must simply follow.
    fn rpl_process_dio(&mut self, instance_id: u8, src: Ipv6Addr, dio: &DioMessage, forced: bool) -> Result<()>;

    /// Ensure a neighbor-cache entry exists for `addr`, refreshing its rank
    /// and DTSN if it's already present. Fails with `NeighborCacheFull`
    /// when the table has no room for a new entry.
    fn rpl_ensure_neighbor(&mut self, instance_id: u8, addr: Ipv6Addr, rank: u16, dtsn: Lollipop) -> Result<()>;

    fn rpl_find_parent(&self, instance_id: u8, addr: Ipv6Addr) -> Option<Parent>;

    fn rpl_nullify_parent(&mut self, instance_id: u8);

    fn rpl_get_parent_ipaddr(&self, instance_id: u8) -> Option<Ipv6Addr>;

    fn rpl_add_route(
        &mut self,
        instance_id: u8,
        prefix: Ipv6Addr,
        prefix_len: u8,
        next_hop: Ipv6Addr,
        lifetime: u32,
        learned_from: LearnedFrom,
    ) -> Result<()>;

    /// Find the matching route for a no-path DAO, marking it withdrawn.
    fn rpl_mark_no_path(&mut self, instance_id: u8, prefix: Ipv6Addr, prefix_len: u8, next_hop: Ipv6Addr) -> bool;

    /// Drop a route record outright, once its post-no-path expiration
    /// timeout has elapsed.
    fn rpl_remove_route(&mut self, instance_id: u8, prefix: Ipv6Addr, prefix_len: u8, next_hop: Ipv6Addr);

    /// Increment a parent's reference count; it stays resident as long as a
    /// route depends on it even if the neighbor cache would otherwise evict
    /// it.
    fn rpl_lock_parent(&mut self, instance_id: u8, addr: Ipv6Addr) -> Result<()>;

    /// Reset the instance's DIO trickle timer (e.g. on a periodic
    /// solicitation), signalled as consistency-loss.
    fn rpl_reset_dio_timer(&mut self, instance_id: u8);

    /// Record that `prefix`/`next_hop` needs a DAO published, e.g. after a
    /// DAO-ACK guard expiry or a fresh hand-off. `lifetime_units` is the raw
    /// wire-format TRANSIT lifetime byte, matching `dao_out`'s own unit.
    fn rpl_schedule_dao(&mut self, instance_id: u8, prefix: Ipv6Addr, prefix_len: u8, lifetime_units: u8);

    fn rpl_get_mode(&self, instance_id: u8) -> Option<Mode>;

    fn instance(&self, instance_id: u8) -> Option<&DodagInstance>;

    fn instance_mut(&mut self, instance_id: u8) -> Option<&mut DodagInstance>;

    /// Mark the parent identified by `addr` as looped: force its
    /// advertised rank to `RANK_INFINITE` and flag it `updated`, per the
    /// loop-detection rule in `dao_in`.
    fn rpl_mark_parent_looped(&mut self, instance_id: u8, addr: Ipv6Addr);

    /// The most recently scheduled DAO, if any, draining the queue filled
    /// by `rpl_schedule_dao`.
    fn take_scheduled_dao(&mut self, instance_id: u8) -> Option<(Ipv6Addr, u8, u8)>;
}

/// Consumed alongside `DagService` by the control-message engine to build
/// outbound DAO payloads.
pub(crate) fn no_path_matches(route: &Route, prefix: Ipv6Addr, prefix_len: u8, next_hop: Ipv6Addr) -> bool {
    route.prefix == prefix && route.prefix_len == prefix_len && route.next_hop == next_hop && !route.nopath_received
}

pub(crate) fn dao_target_lifetime(dao: &DaoMessage, default_lifetime_unit: u16) -> u32 {
    dao.transit()
        .map(|t| default_lifetime_unit as u32 * t.lifetime as u32)
        .unwrap_or(0)
}
