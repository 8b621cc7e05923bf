//! A mobility-aware RPL (RFC 6550) control-plane core: wire codec for
//! DIS/DIO/DAO/DAO-ACK, a control-message engine that keeps DAG/neighbor/
//! route state consistent, and the smart-HOP extension that lets a mobile
//! node hand off to a new parent proactively instead of waiting for the
//! current link to fail outright.
//!
//! [`core::Core`] is the entry point: construct one per node with an
//! implementation of [`core::Platform`], feed it inbound datagrams through
//! [`core::Core::dispatch`], and drive its logical clock with
//! [`core::Core::advance`].

pub mod cme;
pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod lollipop;
pub mod mobility;
pub mod services;
pub mod timer;

pub use codec::{DaoAck, DaoMessage, DioMessage, DisMessage, MobilityFlag};
pub use config::RplConfig;
pub use core::{Core, Counters, Platform, DEFAULT_INSTANCE};
pub use error::{Error, Result};
pub use lollipop::Lollipop;
pub use mobility::{Decision, MobilityController, MobilityPlatform};
pub use services::{DagService, InMemoryDagService};
