//! The smart-HOP mobility controller: parent-assessment and discovery, the
//! two phases of a proactive parent hand-off before the current link fully
//! fails.

use std::net::Ipv6Addr;

use tracing::{debug, warn};

use crate::codec::{raw_to_true, DioMessage, DisMessage};
use crate::config::RplConfig;
use crate::timer::{Event, EventBus, TimerHandle};

/// One reply collected during a discovery-phase burst.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeEntry {
    pub parent: Ipv6Addr,
    pub raw_rssi: u8,
    pub dio: DioMessage,
}

/// Bounded scratch table collecting discovery-phase DIO replies. Reset by
/// zeroing its length rather than by compacting entries into earlier
/// slots — there's nothing to compact, and a fixed-size reset is also
/// immune to the out-of-bounds write the pattern it replaces was prone to.
#[derive(Debug, Clone)]
pub struct ProbeTable {
    capacity: usize,
    entries: Vec<ProbeEntry>,
}

impl ProbeTable {
    pub fn new(capacity: usize) -> ProbeTable {
        ProbeTable {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append a reply, dropping it if the table is already full.
    pub fn push(&mut self, entry: ProbeEntry) -> bool {
        if self.entries.len() >= self.capacity {
            warn!(parent = %entry.parent, "probe table full, dropping reply");
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[ProbeEntry] {
        &self.entries
    }
}

/// Running sum of translated (signed, dBm) RSSI samples across one
/// parent-assessment burst, plus the number observed so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct RssiAggregate {
    sum: i32,
    count: u32,
}

impl RssiAggregate {
    pub fn new() -> RssiAggregate {
        RssiAggregate::default()
    }

    pub fn add(&mut self, true_rssi: i16) {
        self.sum += true_rssi as i32;
        self.count += 1;
    }

    pub fn average(&self) -> Option<i16> {
        if self.count == 0 {
            None
        } else {
            Some((self.sum / self.count as i32) as i16)
        }
    }

    pub fn reset(&mut self) {
        self.sum = 0;
        self.count = 0;
    }
}

/// Side effects the controller needs from the embedding node: sending a
/// DIS, flipping the mobility indicator, and notifying the upper layer
/// that a hand-off just completed.
pub trait MobilityPlatform {
    /// `None` means the link-local all-RPL-nodes multicast address.
    fn send_dis(&mut self, dest: Option<Ipv6Addr>, dis: DisMessage);
    fn set_mobility_indicator(&mut self, on: bool);
    fn notify_reset_mobility_flag(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    ParentAssessment { dio_wait: TimerHandle },
    Discovery {
        dios_input_deadline: Option<TimerHandle>,
        pending_burst_timer: Option<TimerHandle>,
        next_burst_member: u8,
    },
}

/// Drives the two smart-HOP phases. Owns no DAG state directly — it reads
/// the current preferred parent through the caller and reports its
/// decision (switch parent / re-enter discovery / stay) back rather than
/// mutating DAG state itself, honoring the rule that DAG mutation happens
/// only from control-message-engine handlers.
pub struct MobilityController {
    mobility_flag: bool,
    hand_off_backoff_flag: bool,
    phase: Phase,
    probe_table: ProbeTable,
    rssi_aggregate: RssiAggregate,
}

/// What the caller should do after feeding the controller an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Nothing actionable yet.
    None,
    /// Switch to `parent`, replaying `dio` through `rpl_process_dio` with
    /// `forced=true`, then publish a DAO.
    SwitchParent { parent: Ipv6Addr, dio: DioMessage },
    /// Discovery came up empty or the winner was still bad; try again.
    RetryDiscovery,
}

impl MobilityController {
    pub fn new(probe_table_capacity: usize) -> MobilityController {
        MobilityController {
            mobility_flag: false,
            hand_off_backoff_flag: false,
            phase: Phase::Idle,
            probe_table: ProbeTable::new(probe_table_capacity),
            rssi_aggregate: RssiAggregate::new(),
        }
    }

    pub fn mobility_flag(&self) -> bool {
        self.mobility_flag
    }

    /// Whether discovery is the active phase — checked by the caller right
    /// after any call that might have entered it, so it can detach the
    /// preferred parent from routing (DAG mutation stays the caller's job,
    /// never this controller's).
    pub fn in_discovery(&self) -> bool {
        matches!(self.phase, Phase::Discovery { .. })
    }

    /// Lift the anti-thrash back-off; called by the upper layer once it
    /// judges enough time has passed since the last hand-off.
    pub fn clear_hand_off_backoff(&mut self) {
        self.hand_off_backoff_flag = false;
    }

    /// `PARENT_UNREACHABLE`: begin (or retry) parent-assessment.
    pub fn on_parent_unreachable(
        &mut self,
        preferred_parent: Option<Ipv6Addr>,
        cfg: &RplConfig,
        bus: &mut EventBus,
        platform: &mut impl MobilityPlatform,
    ) {
        if self.hand_off_backoff_flag {
            debug!("hand-off back-off active, ignoring parent-unreachable");
            return;
        }
        let Some(parent) = preferred_parent else {
            self.enter_discovery(cfg, bus, platform);
            return;
        };
        platform.send_dis(Some(parent), DisMessage::parent_assessment());
        let dio_wait = bus.arm(cfg.base_tick / 15);
        self.phase = Phase::ParentAssessment { dio_wait };
    }

    /// `PARENT_REACHABLE(raw_rssi)`: the current parent answered the
    /// assessment probe.
    pub fn on_parent_reachable(
        &mut self,
        raw_rssi: u8,
        cfg: &RplConfig,
        bus: &mut EventBus,
        platform: &mut impl MobilityPlatform,
    ) {
        if let Phase::ParentAssessment { dio_wait } = self.phase {
            bus.cancel(dio_wait);
        }
        let true_rssi = raw_to_true(raw_rssi, cfg);
        if true_rssi <= cfg.rssi_unreliable_dbm {
            debug!(true_rssi, "assessment link unreliable, entering discovery");
            self.enter_discovery(cfg, bus, platform);
        } else {
            debug!(true_rssi, "assessment link reliable");
            self.mobility_flag = false;
            self.phase = Phase::Idle;
            platform.notify_reset_mobility_flag();
        }
    }

    /// A `dio_wait` timer fired without a reply: the parent is considered
    /// unreachable.
    pub fn on_dio_wait_expired(&mut self, cfg: &RplConfig, bus: &mut EventBus, platform: &mut impl MobilityPlatform) {
        if matches!(self.phase, Phase::ParentAssessment { .. }) {
            self.enter_discovery(cfg, bus, platform);
        }
    }

    fn enter_discovery(&mut self, cfg: &RplConfig, bus: &mut EventBus, platform: &mut impl MobilityPlatform) {
        self.mobility_flag = true;
        self.probe_table.reset();
        platform.set_mobility_indicator(true);
        self.phase = Phase::Discovery {
            dios_input_deadline: None,
            pending_burst_timer: None,
            next_burst_member: 1,
        };
        bus.post(Event::DisBurst);
    }

    /// Fired once per `SEND_TIME` tick to emit one burst member.
    pub fn on_dis_burst_tick(&mut self, cfg: &RplConfig, bus: &mut EventBus, platform: &mut impl MobilityPlatform) {
        let Phase::Discovery { next_burst_member, .. } = &mut self.phase else {
            return;
        };
        let member = *next_burst_member;
        if member > cfg.burst_size {
            return;
        }
        platform.send_dis(None, DisMessage::discovery_burst_member(member));
        *next_burst_member += 1;
        if member == cfg.burst_size {
            let deadline = bus.arm(cfg.base_tick / 20);
            if let Phase::Discovery { dios_input_deadline, .. } = &mut self.phase {
                *dios_input_deadline = Some(deadline);
            }
        } else {
            let next_tick = bus.arm(cfg.base_tick / 50);
            if let Phase::Discovery { pending_burst_timer, .. } = &mut self.phase {
                *pending_burst_timer = Some(next_tick);
            }
        }
    }

    /// Route a fired timer to whichever phase armed it, if any. Returns
    /// `Decision::None` both when the timer belongs to no active phase and
    /// when it was handled but produced no actionable outcome yet (e.g. the
    /// burst simply advanced to its next member).
    pub fn on_timer_expired(
        &mut self,
        handle: TimerHandle,
        current_preferred_parent: Option<Ipv6Addr>,
        cfg: &RplConfig,
        bus: &mut EventBus,
        platform: &mut impl MobilityPlatform,
    ) -> Decision {
        match self.phase {
            Phase::ParentAssessment { dio_wait } if dio_wait == handle => {
                self.on_dio_wait_expired(cfg, bus, platform);
                Decision::None
            }
            Phase::Discovery { pending_burst_timer: Some(h), .. } if h == handle => {
                self.on_dis_burst_tick(cfg, bus, platform);
                Decision::None
            }
            Phase::Discovery { dios_input_deadline: Some(h), .. } if h == handle => {
                self.on_dios_input_expired(current_preferred_parent, cfg, platform)
            }
            _ => Decision::None,
        }
    }

    /// A DIO tagged `mobility_flags=2` arrived during discovery.
    pub fn on_discovery_reply(&mut self, src: Ipv6Addr, dio: DioMessage) {
        if !matches!(self.phase, Phase::Discovery { .. }) {
            return;
        }
        self.probe_table.push(ProbeEntry {
            parent: src,
            raw_rssi: dio.rssi,
            dio,
        });
    }

    /// `dios_input_deadline` fired: choose a winner (or retry) and report
    /// the decision.
    pub fn on_dios_input_expired(
        &mut self,
        current_preferred_parent: Option<Ipv6Addr>,
        cfg: &RplConfig,
        platform: &mut impl MobilityPlatform,
    ) -> Decision {
        if !matches!(self.phase, Phase::Discovery { .. }) {
            return Decision::None;
        }
        if self.probe_table.is_empty() {
            debug!("discovery produced no replies, retrying");
            return Decision::RetryDiscovery;
        }
        let winner_index = pick_winner_index(self.probe_table.entries(), cfg)
            .expect("non-empty probe table always has a winner");
        let winner = self.probe_table.entries()[winner_index].clone();
        let winner_true_rssi = raw_to_true(winner.raw_rssi, cfg);

        let decision = if Some(winner.parent) == current_preferred_parent {
            if winner_true_rssi <= cfg.rssi_bad_dbm {
                Decision::RetryDiscovery
            } else {
                if winner_true_rssi > cfg.rssi_unreliable_dbm {
                    self.mobility_flag = false;
                    self.phase = Phase::Idle;
                    platform.notify_reset_mobility_flag();
                }
                Decision::None
            }
        } else {
            self.mobility_flag = false;
            self.phase = Phase::Idle;
            platform.notify_reset_mobility_flag();
            Decision::SwitchParent {
                parent: winner.parent,
                dio: winner.dio,
            }
        };

        if !matches!(decision, Decision::RetryDiscovery) {
            self.probe_table.reset();
        }
        decision
    }

    /// A hand-off just completed: start the anti-thrash back-off.
    pub fn begin_hand_off_backoff(&mut self) {
        self.hand_off_backoff_flag = true;
    }

    pub fn rssi_aggregate_mut(&mut self) -> &mut RssiAggregate {
        &mut self.rssi_aggregate
    }
}

/// `argmax` of wrap-corrected raw RSSI, first-seen tie-break. The
/// correction (`raw + 255` for samples at or below the radio's high-range
/// boundary) exists purely to make samples straddling the radio's
/// wrap-around point comparable to each other; it is not itself a dBm
/// value.
fn pick_winner_index(entries: &[ProbeEntry], cfg: &RplConfig) -> Option<usize> {
    let mut best: Option<(usize, i32)> = None;
    for (i, e) in entries.iter().enumerate() {
        let corrected = if e.raw_rssi <= cfg.rssi_wrap_threshold {
            e.raw_rssi as i32 + 255
        } else {
            e.raw_rssi as i32
        };
        match best {
            Some((_, best_value)) if corrected <= best_value => {}
            _ => best = Some((i, corrected)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MobilityFlag;

    fn dio() -> DioMessage {
        DioMessage {
            instance_id: 0,
            version: 1,
            rank: 100,
            grounded: false,
            mop: 0,
            preference: 0,
            dtsn: crate::lollipop::Lollipop::from(1),
            mobility_flags: MobilityFlag::DiscoveryReply,
            rssi: 0,
            dag_id: "fe80::1".parse().unwrap(),
            options: vec![],
        }
    }

    fn entry(addr: &str, raw: u8) -> ProbeEntry {
        ProbeEntry {
            parent: addr.parse().unwrap(),
            raw_rssi: raw,
            dio: dio(),
        }
    }

    /// S5: best-of-three discovery with wrap correction.
    #[test]
    fn s5_picks_the_wrap_corrected_winner() {
        let cfg = RplConfig::default();
        let entries = vec![entry("fe80::a", 48), entry("fe80::b", 60), entry("fe80::c", 210)];
        let winner = pick_winner_index(&entries, &cfg).unwrap();
        assert_eq!(entries[winner].parent, "fe80::b".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn tie_breaks_on_first_seen() {
        let cfg = RplConfig::default();
        let entries = vec![entry("fe80::a", 210), entry("fe80::b", 210)];
        let winner = pick_winner_index(&entries, &cfg).unwrap();
        assert_eq!(entries[winner].parent, "fe80::a".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn probe_table_drops_entries_past_capacity() {
        let mut table = ProbeTable::new(2);
        assert!(table.push(entry("fe80::a", 1)));
        assert!(table.push(entry("fe80::b", 1)));
        assert!(!table.push(entry("fe80::c", 1)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn reset_empties_without_compaction() {
        let mut table = ProbeTable::new(3);
        table.push(entry("fe80::a", 1));
        table.push(entry("fe80::b", 1));
        table.reset();
        assert!(table.is_empty());
        assert!(table.push(entry("fe80::c", 1)));
        assert_eq!(table.len(), 1);
    }

    /// S4: a reliable assessment reply clears mobility without entering
    /// discovery.
    #[test]
    fn s4_reliable_assessment_clears_mobility_flag() {
        struct Recorder {
            reset_notified: bool,
        }
        impl MobilityPlatform for Recorder {
            fn send_dis(&mut self, _dest: Option<Ipv6Addr>, _dis: DisMessage) {}
            fn set_mobility_indicator(&mut self, _on: bool) {}
            fn notify_reset_mobility_flag(&mut self) {
                self.reset_notified = true;
            }
        }
        let cfg = RplConfig::default();
        let mut bus = EventBus::new();
        let mut platform = Recorder { reset_notified: false };
        let mut mc = MobilityController::new(cfg.probe_table_capacity);
        mc.on_parent_unreachable(Some("fe80::1".parse().unwrap()), &cfg, &mut bus, &mut platform);
        mc.on_parent_reachable(230, &cfg, &mut bus, &mut platform);
        assert!(platform.reset_notified);
        assert!(!mc.mobility_flag());
    }

    /// A hand-off decision must leave discovery, or a stray
    /// `PARENT_UNREACHABLE` arriving before the anti-thrash back-off lifts
    /// would still read as "in discovery" to the caller.
    #[test]
    fn switch_parent_decision_resets_phase_and_mobility_flag() {
        struct Recorder {
            reset_notified: bool,
        }
        impl MobilityPlatform for Recorder {
            fn send_dis(&mut self, _dest: Option<Ipv6Addr>, _dis: DisMessage) {}
            fn set_mobility_indicator(&mut self, _on: bool) {}
            fn notify_reset_mobility_flag(&mut self) {
                self.reset_notified = true;
            }
        }
        let cfg = RplConfig::default();
        let mut bus = EventBus::new();
        let mut platform = Recorder { reset_notified: false };
        let mut mc = MobilityController::new(cfg.probe_table_capacity);
        mc.on_parent_unreachable(None, &cfg, &mut bus, &mut platform);
        assert!(mc.in_discovery());

        let winner: Ipv6Addr = "fe80::9".parse().unwrap();
        mc.on_discovery_reply(winner, dio());
        let decision = mc.on_dios_input_expired(None, &cfg, &mut platform);
        assert!(matches!(&decision, Decision::SwitchParent { parent, .. } if *parent == winner));
        assert!(!mc.in_discovery(), "phase must return to Idle once a parent is chosen");
        assert!(!mc.mobility_flag());
        assert!(platform.reset_notified);

        mc.begin_hand_off_backoff();
        mc.on_parent_unreachable(Some(winner), &cfg, &mut bus, &mut platform);
        assert!(!mc.in_discovery(), "back-off should suppress re-entry, not leave a stale discovery state");
    }

    #[test]
    fn rssi_aggregate_averages_translated_samples() {
        let mut agg = RssiAggregate::new();
        agg.add(-91);
        agg.add(-86);
        agg.add(-81);
        assert_eq!(agg.average(), Some(-86));
    }
}
