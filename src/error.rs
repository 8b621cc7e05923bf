//! Error taxonomy for the RPL control-plane core.
//!
//! Per the error handling design, every variant here is *absorbed* at the
//! control-message engine boundary: `dispatch` and the mobility phase
//! handlers turn an `Err` into a `tracing::warn!` plus a counter bump on
//! [`crate::core::Counters`], never a panic and never an unwind past
//! `dispatch`. The `Result` alias exists so the decode/encode layer and the
//! service calls underneath can still use `?` freely.

use std::result;

pub type Result<T> = result::Result<T, Error>;

/// Errors raised while decoding, dispatching, or servicing RPL control
/// messages.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum Error {
    /// A sub-option overran the payload, a length field held an invalid
    /// value, or an unknown metric-container type was seen. The offending
    /// packet is dropped and the malformed-message counter is incremented.
    #[error("malformed RPL message: {0}")]
    MalformedMessage(&'static str),

    /// A DAO named an instance this node doesn't serve.
    #[error("DAO for unknown instance {0}")]
    UnknownInstance(u8),

    /// A DAO's D-flag named a DAG-ID that isn't this node's current DAG.
    #[error("DAO named a foreign DAG")]
    DagMismatch,

    /// The neighbor cache has no room for a new entry.
    #[error("neighbor cache is full")]
    NeighborCacheFull,

    /// Allocating a route (or locking a parent) failed for want of memory.
    #[error("memory overflow while installing route")]
    MemoryOverflow,

    /// A DAO revealed a forwarding loop: the sender is also downstream of
    /// us. The sender's parent-table entry has already been forced to
    /// `INFINITE` rank by the time this is raised.
    #[error("loop detected via DAO from a lower-or-equal rank node")]
    LoopDetected,

    /// No DIO arrived within `dio_wait` of a unicast parent-assessment DIS.
    #[error("preferred parent did not respond to assessment probe")]
    TransientUnreachable,

    /// The DAO-ACK guard timer expired before an ACK arrived.
    #[error("DAO-ACK guard timer expired")]
    DaoAckTimeout,
}
