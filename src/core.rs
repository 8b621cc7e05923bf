//! The owning context: one `Core<P>` per node, gathering every module's
//! state behind a single explicit value passed to the scheduler, instead
//! of scattering it across file-scope globals. `P` is the node's
//! collaborator for everything this crate treats as external — sending a
//! datagram, querying the node's address, driving the mobility
//! indicator — the same role the teacher's `Pcapng<R: Read>` gives `R` for
//! byte input.

use std::net::Ipv6Addr;

use bytes::BytesMut;
use tracing::warn;

use crate::codec::{DaoAck, DaoMessage, DioMessage, DisMessage, RPL_CODE_DAO, RPL_CODE_DAO_ACK, RPL_CODE_DIO, RPL_CODE_DIS};
use crate::config::RplConfig;
use crate::error::Error;
use crate::mobility::{Decision, MobilityController, MobilityPlatform};
use crate::services::{DagService, InMemoryDagService};
use crate::timer::{Event, EventBus, TimerHandle};

/// The only instance this crate arbitrates for — see the non-goal on
/// multi-instance arbitration in the purpose statement.
pub const DEFAULT_INSTANCE: u8 = 0;

/// Everything a `Core` needs from the node it's running on.
pub trait Platform {
    /// `None` means the link-local all-RPL-nodes multicast address.
    fn icmp_send(&mut self, dest: Option<Ipv6Addr>, code: u8, payload: &[u8]);
    /// A non-link-local address to advertise as this node's own, if one has
    /// been assigned.
    fn global_address(&self) -> Option<Ipv6Addr>;
    fn set_mobility_indicator(&mut self, on: bool);
    /// The hand-off just completed; tell the upper layer.
    fn notify_reset_mobility_flag(&mut self);
    /// Whether this node runs the mobility extension at all — a
    /// stationary border router never enters parent-assessment/discovery.
    fn is_mobile(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub malformed_messages: u32,
    pub mem_overflows: u32,
}

pub struct Core<P: Platform> {
    pub(crate) config: RplConfig,
    pub(crate) platform: P,
    pub(crate) dag: InMemoryDagService,
    pub(crate) mobility: MobilityController,
    pub(crate) bus: EventBus,
    pub(crate) counters: Counters,
    pub(crate) dao_ack_guard: Option<TimerHandle>,
    /// Source of the most recent burst-member DIS, and the timer
    /// collecting the rest of that burst — set by `dis_in`, read when the
    /// burst-collection timer fires to know who to reply to.
    pub(crate) candidate_reply_target: Option<Ipv6Addr>,
    pub(crate) burst_collection_timer: Option<TimerHandle>,
    /// The route `dao_out` last asked the DAO-ACK guard to watch —
    /// rescheduled by `step` if the guard expires unanswered.
    pub(crate) pending_dao: Option<(Ipv6Addr, u8, u8)>,
    /// No-path withdrawals awaiting their expiration timeout before the
    /// route record is actually dropped.
    pub(crate) pending_route_removals: Vec<PendingRouteRemoval>,
}

/// A no-path route withdrawal, armed by `dao_in` and resolved by
/// `Core::on_timer_expired` once `dao_expiration_timeout_ticks` elapses.
pub(crate) struct PendingRouteRemoval {
    pub(crate) handle: TimerHandle,
    pub(crate) instance_id: u8,
    pub(crate) prefix: Ipv6Addr,
    pub(crate) prefix_len: u8,
    pub(crate) next_hop: Ipv6Addr,
}

/// Bridges [`MobilityController`]'s narrow view of the outside world onto
/// whatever [`Platform`] the owning `Core` was built with.
pub(crate) struct McAdapter<'a, P: Platform> {
    pub(crate) platform: &'a mut P,
}

impl<'a, P: Platform> MobilityPlatform for McAdapter<'a, P> {
    fn send_dis(&mut self, dest: Option<Ipv6Addr>, dis: DisMessage) {
        let mut buf = BytesMut::new();
        dis.encode(&mut buf);
        self.platform.icmp_send(dest, RPL_CODE_DIS, &buf);
    }

    fn set_mobility_indicator(&mut self, on: bool) {
        self.platform.set_mobility_indicator(on);
    }

    fn notify_reset_mobility_flag(&mut self) {
        self.platform.notify_reset_mobility_flag();
    }
}

impl<P: Platform> Core<P> {
    pub fn new(config: RplConfig, platform: P) -> Core<P> {
        let mobility = MobilityController::new(config.probe_table_capacity);
        let dag = InMemoryDagService::new(config.clone());
        Core {
            config,
            platform,
            dag,
            mobility,
            bus: EventBus::new(),
            counters: Counters::default(),
            dao_ack_guard: None,
            candidate_reply_target: None,
            burst_collection_timer: None,
            pending_dao: None,
            pending_route_removals: Vec::new(),
        }
    }

    pub fn config(&self) -> &RplConfig {
        &self.config
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn dag(&self) -> &InMemoryDagService {
        &self.dag
    }

    pub fn dag_mut(&mut self) -> &mut InMemoryDagService {
        &mut self.dag
    }

    pub fn mobility(&self) -> &MobilityController {
        &self.mobility
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Dispatch one inbound ICMPv6 RPL datagram by code. Errors are
    /// absorbed here: they never unwind past `dispatch`, only show up as a
    /// `warn!` plus a counter bump.
    pub fn dispatch(&mut self, code: u8, payload: &[u8], src: Ipv6Addr, multicast_dest: bool, link_rssi: u8) {
        let result = match code {
            c if c == RPL_CODE_DIS => DisMessage::decode(payload).and_then(|m| self.dis_in(m, src, multicast_dest, link_rssi)),
            c if c == RPL_CODE_DIO => DioMessage::decode(payload).and_then(|m| self.dio_in(m, src)),
            c if c == RPL_CODE_DAO => DaoMessage::decode(payload).and_then(|m| self.dao_in(m, src)),
            c if c == RPL_CODE_DAO_ACK => DaoAck::decode(payload).and_then(|m| self.dao_ack_in(m)),
            other => {
                warn!(code = other, "unknown RPL ICMP code, discarding");
                return;
            }
        };
        if let Err(e) = result {
            self.record_error(e);
        }
    }

    pub(crate) fn record_error(&mut self, e: Error) {
        match e {
            Error::MalformedMessage(_) => self.counters.malformed_messages += 1,
            Error::NeighborCacheFull | Error::MemoryOverflow => self.counters.mem_overflows += 1,
            _ => {}
        }
        warn!(error = %e, "dropping RPL message");
    }

    /// The link layer lost the current parent: kick off parent-assessment
    /// (or, with no parent at all, straight into discovery).
    pub fn notify_parent_unreachable(&mut self) {
        self.bus.post(Event::ParentUnreachable);
        self.step();
    }

    /// The current parent answered a parent-assessment probe with
    /// `raw_rssi`.
    pub fn notify_parent_reachable(&mut self, raw_rssi: u8) {
        self.bus.post(Event::ParentReachable(raw_rssi));
        self.step();
    }

    /// Advance the logical clock by `ticks` and process whatever that
    /// fires, draining the event queue to a fixed point afterward.
    pub fn advance(&mut self, ticks: u64) {
        self.bus.advance(ticks);
        self.step();
    }

    /// Drain every pending event, dispatching each to the module that owns
    /// it. Events posted while handling an earlier one (e.g. a fired timer
    /// re-posting `DisBurst`) are drained in the same call.
    fn step(&mut self) {
        while let Some(event) = self.bus.poll() {
            match event {
                Event::ParentUnreachable => {
                    let parent = self.dag.rpl_get_parent_ipaddr(DEFAULT_INSTANCE);
                    let cfg = self.config.clone();
                    let mut adapter = McAdapter { platform: &mut self.platform };
                    self.mobility.on_parent_unreachable(parent, &cfg, &mut self.bus, &mut adapter);
                    self.detach_if_discovering();
                }
                Event::ParentReachable(raw_rssi) => {
                    let cfg = self.config.clone();
                    let mut adapter = McAdapter { platform: &mut self.platform };
                    self.mobility.on_parent_reachable(raw_rssi, &cfg, &mut self.bus, &mut adapter);
                    self.detach_if_discovering();
                }
                Event::DisBurst => {
                    let cfg = self.config.clone();
                    let mut adapter = McAdapter { platform: &mut self.platform };
                    self.mobility.on_dis_burst_tick(&cfg, &mut self.bus, &mut adapter);
                }
                Event::TimerExpired(handle) => self.on_timer_expired(handle),
                Event::SetDisDelay
                | Event::SetDiosInput
                | Event::ResetDiosInput
                | Event::StopDioCheck
                | Event::ResetMobilityFlag => {}
            }
        }
    }

    fn on_timer_expired(&mut self, handle: TimerHandle) {
        if self.dao_ack_guard == Some(handle) {
            self.dao_ack_guard = None;
            warn!("DAO-ACK guard expired unanswered, rescheduling");
            if let Some((prefix, prefix_len, lifetime_units)) = self.pending_dao.take() {
                self.dag.rpl_schedule_dao(DEFAULT_INSTANCE, prefix, prefix_len, lifetime_units);
            }
            if let Some((prefix, prefix_len, lifetime_units)) = self.dag.take_scheduled_dao(DEFAULT_INSTANCE) {
                let _ = self.dao_out(DEFAULT_INSTANCE, prefix, prefix_len, lifetime_units, true);
            }
            return;
        }
        if let Some(pos) = self.pending_route_removals.iter().position(|r| r.handle == handle) {
            let removal = self.pending_route_removals.remove(pos);
            self.dag
                .rpl_remove_route(removal.instance_id, removal.prefix, removal.prefix_len, removal.next_hop);
            return;
        }
        if self.burst_collection_timer == Some(handle) {
            self.burst_collection_timer = None;
            let reply_reliable = self
                .mobility
                .rssi_aggregate_mut()
                .average()
                .is_some_and(|avg| avg as i32 > self.config.rssi_unreliable_dbm as i32);
            if reply_reliable {
                if let Some(target) = self.candidate_reply_target {
                    let _ = self.dio_out(DEFAULT_INSTANCE, Some(target), crate::codec::MobilityFlag::DiscoveryReply, None);
                }
            }
            self.mobility.rssi_aggregate_mut().reset();
            self.candidate_reply_target = None;
            return;
        }

        let parent = self.dag.rpl_get_parent_ipaddr(DEFAULT_INSTANCE);
        let cfg = self.config.clone();
        let decision = {
            let mut adapter = McAdapter { platform: &mut self.platform };
            self.mobility.on_timer_expired(handle, parent, &cfg, &mut self.bus, &mut adapter)
        };
        self.detach_if_discovering();
        self.apply_mobility_decision(decision);
    }

    /// Discovery detaches the current preferred parent from routing until a
    /// new one is chosen — a DAG mutation, so it's done here rather than by
    /// the mobility controller itself.
    fn detach_if_discovering(&mut self) {
        if self.mobility.in_discovery() {
            self.dag.rpl_nullify_parent(DEFAULT_INSTANCE);
        }
    }

    fn apply_mobility_decision(&mut self, decision: Decision) {
        match decision {
            Decision::None => {}
            Decision::RetryDiscovery => {
                self.bus.post(Event::ParentUnreachable);
            }
            Decision::SwitchParent { parent, dio } => {
                if self.dag.rpl_process_dio(DEFAULT_INSTANCE, parent, &dio, true).is_ok() {
                    self.mobility.begin_hand_off_backoff();
                    let own_route = self
                        .dag
                        .instance(DEFAULT_INSTANCE)
                        .and_then(|i| i.dag.prefix.as_ref().map(|p| (p.prefix, p.prefix_len, i.dio_conf.default_lifetime)));
                    if let Some((prefix, prefix_len, lifetime_units)) = own_route {
                        if self.platform.global_address().is_some() {
                            let _ = self.dao_out(DEFAULT_INSTANCE, prefix, prefix_len, lifetime_units, true);
                        }
                    }
                }
            }
        }
    }
}
