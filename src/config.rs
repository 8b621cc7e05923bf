//! Compile-time tunables, gathered into a constructible value instead of
//! `#define`s so tests and simulations can override them field-by-field —
//! the library equivalent of the teacher's per-block constants
//! (`BUF_CAPACITY` and friends in `internal::mod`), just collected in one
//! place because here they cross every module instead of belonging to one.

/// RPL and smart-HOP tunables.
///
/// `RplConfig::default()` returns the RFC 6550 / smart-HOP reference
/// values named throughout the spec. Every field can be overridden
/// independently, e.g. to drive a test with a tiny probe-table capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct RplConfig {
    /// Maximum number of concurrently-served RPL instances.
    pub max_instances: u8,

    /// DIO trickle timer: minimum interval exponent.
    pub dio_interval_min: u8,
    /// DIO trickle timer: maximum doublings of the minimum interval.
    pub dio_interval_doublings: u8,
    /// DIO trickle timer: redundancy constant (`k`).
    pub dio_redundancy: u8,

    /// Minimum per-hop rank increment.
    pub min_hoprankinc: u16,
    /// Maximum rank increment accepted from a single parent.
    pub max_rankinc: u16,

    /// Default route lifetime, in `lifetime_unit`s, when a DAO omits one.
    pub default_lifetime: u8,
    /// Seconds represented by one unit of route lifetime.
    pub default_lifetime_unit: u16,

    /// Grace period after `nopath_received` before a route is reaped.
    pub dao_expiration_timeout_ticks: u32,

    /// BASE_TICK: the platform's one-second tick reference, in whatever
    /// logical tick unit the embedding scheduler uses. All of the
    /// `BASE_TICK / N` delays in the spec are derived from this.
    pub base_tick: u64,

    /// Number of DIS frames in a discovery-phase burst.
    pub burst_size: u8,
    /// Capacity of the mobility controller's probe table.
    pub probe_table_capacity: usize,

    /// True-RSSI threshold (dBm) below which a link is "unreliable" during
    /// parent-assessment, and above which a chosen discovery candidate is
    /// accepted outright.
    pub rssi_unreliable_dbm: i16,
    /// True-RSSI threshold (dBm) below which a re-chosen current parent is
    /// rejected outright and discovery restarts.
    pub rssi_bad_dbm: i16,

    /// Raw RSSI value above which [`crate::codec::raw_to_true`] uses the
    /// high-range offset instead of the low-range one.
    pub rssi_high_range_threshold: u8,
    /// Offset subtracted (together with 255) from raw RSSI values above
    /// `rssi_high_range_threshold`.
    pub rssi_offset_high: i16,
    /// Offset subtracted from raw RSSI values at or below
    /// `rssi_high_range_threshold`.
    pub rssi_offset_low: i16,
    /// Raw RSSI values at or below this threshold are treated as having
    /// wrapped around (`+255`) before being compared during discovery's
    /// best-of-`N` scan. Only used by the discovery-phase comparator, not
    /// by `raw_to_true` itself. Defaults to the same boundary as
    /// `rssi_high_range_threshold`: a sample is either clearly in the
    /// radio's high range and left alone, or it's corrected before
    /// argmax-comparison against the others.
    pub rssi_wrap_threshold: u8,

    /// Whether DAO-ACKs are requested and guarded with a retransmit timer.
    pub dao_ack_enabled: bool,
    /// Whether outbound DAOs carry an explicit DAG-ID (the `D` flag).
    pub dao_include_dag_id: bool,

    /// Neighbor cache capacity (NBR), bounding the reference `DagService`'s
    /// parent table. An external implementation may size this differently.
    pub neighbor_cache_capacity: usize,
    /// Route table capacity, bounding the reference `DagService`'s route
    /// table.
    pub route_table_capacity: usize,
}

impl Default for RplConfig {
    fn default() -> Self {
        RplConfig {
            max_instances: 1,

            dio_interval_min: 12,
            dio_interval_doublings: 8,
            dio_redundancy: 10,

            min_hoprankinc: 256,
            max_rankinc: 0,

            default_lifetime: 30,
            default_lifetime_unit: 60,

            dao_expiration_timeout_ticks: 60,

            base_tick: 1,

            burst_size: 3,
            probe_table_capacity: 5,

            rssi_unreliable_dbm: -85,
            rssi_bad_dbm: -90,

            rssi_high_range_threshold: 200,
            rssi_offset_high: -255 - 46,
            rssi_offset_low: -45,
            rssi_wrap_threshold: 200,

            dao_ack_enabled: true,
            dao_include_dag_id: false,

            neighbor_cache_capacity: 16,
            route_table_capacity: 32,
        }
    }
}
