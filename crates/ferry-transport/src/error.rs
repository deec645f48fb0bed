//! Terminal errors surfaced by [`send`](crate::send) and [`receive`](crate::receive).
//!
//! Transient conditions (timeouts, duplicates, malformed datagrams, a full
//! reorder buffer) are resolved inside the protocol and never appear here.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O failure on the underlying datagram channel.
    #[error("channel I/O failed: {0}")]
    Channel(#[source] io::Error),

    /// The output sink rejected a write or flush.
    #[error("output sink failed: {0}")]
    Sink(#[source] io::Error),

    /// The peer closed the channel while packets were still unacknowledged.
    #[error("peer closed the channel with {outstanding} packets unacknowledged")]
    PeerClosed { outstanding: u32 },

    /// A packet hit the configured retransmission ceiling.
    #[error("packet {sequence} still unacknowledged after {attempts} transmissions")]
    RetriesExhausted { sequence: u32, attempts: u32 },

    /// No datagram arrived within the receiver's idle timeout.
    #[error("no datagram received for {0:?}")]
    IdleTimeout(Duration),

    /// The stream needs more packets than a 32-bit sequence space can name.
    #[error("stream needs {chunks} packets, more than a u32 sequence number can index")]
    StreamTooLong { chunks: u64 },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
