//! # ferry-transport
//!
//! Reliable, in-order delivery of a byte stream over a datagram channel that
//! may drop, duplicate, delay or reorder.
//!
//! The sender chunks the stream into numbered packets, keeps a sliding window
//! in flight, retires packets on selective ACKs and retransmits the whole
//! unacknowledged window when its RTT-derived timeout expires. The receiver
//! acknowledges every packet it can hold, buffers out-of-order arrivals up to
//! a byte capacity, and writes contiguous data to its sink.
//!
//! ## Crate structure
//!
//! - [`wire`]: Data packet and ACK encoding
//! - [`channel`]: `Channel` trait, UDP and length-prefixed TCP adapters
//! - [`config`]: Tuning knobs, TOML loading
//! - [`rtt`]: RTT sampling and timeout derivation
//! - [`sender`]: Send window and blocking sender
//! - [`receiver`]: Reorder buffer and blocking receiver
//! - [`stats`]: Per-transfer counters
//! - [`error`]: Terminal errors

pub mod channel;
pub mod config;
pub mod error;
pub mod receiver;
pub mod rtt;
pub mod sender;
pub mod stats;
pub mod wire;

use std::io::Write;

use bytes::Bytes;

pub use channel::{Channel, RecvError, StreamChannel, UdpChannel};
pub use config::{ConfigError, TransportConfig, TransportConfigInput};
pub use error::TransportError;
pub use receiver::Receiver;
pub use sender::Sender;

/// Deliver `data` reliably to the peer on `channel`.
///
/// Returns once every packet has been acknowledged. Does not close the
/// channel; call [`Channel::close`] to signal end-of-stream.
pub fn send<C: Channel + ?Sized>(
    channel: &mut C,
    data: impl Into<Bytes>,
    config: &TransportConfig,
) -> Result<(), TransportError> {
    Sender::new(config.clone()).send(channel, data)
}

/// Reassemble the peer's stream into `sink` until the peer closes the
/// channel. Returns the number of bytes written.
pub fn receive<C, W>(
    channel: &mut C,
    sink: &mut W,
    config: &TransportConfig,
) -> Result<u64, TransportError>
where
    C: Channel + ?Sized,
    W: Write + ?Sized,
{
    Receiver::new(config.clone()).receive(channel, sink)
}
