//! In-process network simulation for ferry-transport.
//!
//! Provides an impaired duplex datagram link implementing the transport's
//! `Channel` contract (loss, duplication, delay, jitter, deterministic drop
//! patterns and scripted arrival order), plus a harness that runs a full
//! sender/receiver transfer across it.

pub mod harness;
pub mod impairment;
pub mod link;

pub use harness::{init_tracing, run_transfer, TransferReport};
pub use impairment::{Impairer, ImpairmentConfig};
pub use link::{link, LinkSnapshot, LinkStats, SimEndpoint};
