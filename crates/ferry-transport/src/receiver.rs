//! # Receiver
//!
//! [`ReceiveBuffer`] holds out-of-order payloads until the gap before them
//! fills, bounded by a byte capacity. [`Receiver`] drives it from a
//! [`Channel`]: acknowledge every admitted (or already delivered) packet,
//! then flush everything contiguous to the sink, until the peer closes.

use std::collections::BTreeMap;
use std::io::Write;

use bytes::Bytes;

use crate::channel::{Channel, RecvError};
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::stats::ReceiverStats;
use crate::wire::{Ack, Packet};

/// Result of offering a packet to the [`ReceiveBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Stored; ready to flush if it was `expected_seq`.
    Accepted,
    /// Already held in the buffer.
    Duplicate,
    /// Below `expected_seq`; already delivered.
    Stale,
    /// Ahead of `expected_seq` and would exceed the capacity. Dropped.
    BufferFull,
}

impl Offer {
    /// Whether the packet should be acknowledged. A dropped packet is left
    /// unacknowledged so the sender retransmits it.
    pub fn should_ack(self) -> bool {
        !matches!(self, Offer::BufferFull)
    }
}

/// Reordering buffer keyed by sequence number.
#[derive(Debug)]
pub struct ReceiveBuffer {
    expected_seq: u32,
    pending: BTreeMap<u32, Bytes>,
    buffered_bytes: usize,
    capacity_bytes: usize,
}

impl ReceiveBuffer {
    pub fn new(capacity_bytes: usize) -> Self {
        ReceiveBuffer {
            expected_seq: 0,
            pending: BTreeMap::new(),
            buffered_bytes: 0,
            capacity_bytes,
        }
    }

    /// Next sequence number to deliver.
    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn buffered_packets(&self) -> usize {
        self.pending.len()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Offer an arriving packet.
    ///
    /// `expected_seq` itself is always admitted: it drains on the next
    /// [`pop_ready`](Self::pop_ready), so it never holds capacity.
    pub fn offer(&mut self, sequence: u32, payload: Bytes) -> Offer {
        if sequence < self.expected_seq {
            return Offer::Stale;
        }
        if self.pending.contains_key(&sequence) {
            return Offer::Duplicate;
        }
        if sequence != self.expected_seq
            && self.buffered_bytes + payload.len() > self.capacity_bytes
        {
            return Offer::BufferFull;
        }
        self.buffered_bytes += payload.len();
        self.pending.insert(sequence, payload);
        Offer::Accepted
    }

    /// Remove the payload for `expected_seq`, if present, and advance.
    pub fn pop_ready(&mut self) -> Option<Bytes> {
        let payload = self.pending.remove(&self.expected_seq)?;
        self.buffered_bytes -= payload.len();
        self.expected_seq = self.expected_seq.saturating_add(1);
        Some(payload)
    }

    /// Every payload that is now contiguous, in sequence order.
    pub fn drain_ready(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        std::iter::from_fn(move || self.pop_ready())
    }

    pub fn invariants_hold(&self) -> bool {
        let sum: usize = self.pending.values().map(Bytes::len).sum();
        sum == self.buffered_bytes
            && self.pending.keys().all(|&seq| seq >= self.expected_seq)
            && (self.pending.contains_key(&self.expected_seq)
                || self.buffered_bytes <= self.capacity_bytes)
    }
}

// ─── Receiver ───────────────────────────────────────────────────────────────

/// Blocking receiver. Each call to [`Receiver::receive`] reassembles one
/// stream.
#[derive(Debug)]
pub struct Receiver {
    config: TransportConfig,
    stats: ReceiverStats,
}

impl Receiver {
    pub fn new(config: TransportConfig) -> Self {
        Receiver {
            config,
            stats: ReceiverStats::default(),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Statistics of the most recent transfer.
    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// Write the peer's stream to `sink` in order until the peer closes.
    /// Returns the number of bytes delivered.
    pub fn receive<C, W>(&mut self, channel: &mut C, sink: &mut W) -> Result<u64, TransportError>
    where
        C: Channel + ?Sized,
        W: Write + ?Sized,
    {
        self.config.validate()?;
        self.stats = ReceiverStats::default();
        let mut buffer = ReceiveBuffer::new(self.config.buffer_capacity_bytes);
        let max_len = self.config.max_datagram_len();

        tracing::info!(
            capacity_bytes = buffer.capacity_bytes(),
            "receive started"
        );

        loop {
            let datagram = match channel.recv_timeout(max_len, self.config.idle_timeout) {
                Ok(datagram) if datagram.is_empty() => break,
                Ok(datagram) => datagram,
                Err(RecvError::Timeout) => match self.config.idle_timeout {
                    Some(idle) => {
                        tracing::warn!(
                            idle_ms = idle.as_millis() as u64,
                            expected_seq = buffer.expected_seq(),
                            "peer idle, giving up"
                        );
                        return Err(TransportError::IdleTimeout(idle));
                    }
                    None => continue,
                },
                Err(RecvError::Io(e)) => return Err(TransportError::Channel(e)),
            };
            self.stats.datagrams_received += 1;

            let packet = match Packet::decode(datagram) {
                Ok(packet) => packet,
                Err(e) => {
                    self.stats.malformed += 1;
                    tracing::warn!(error = %e, "dropping malformed datagram");
                    continue;
                }
            };

            let sequence = packet.sequence;
            let expected = buffer.expected_seq();
            let offer = buffer.offer(sequence, packet.payload);
            match offer {
                Offer::Accepted if sequence != expected => {
                    self.stats.packets_buffered += 1;
                    self.stats.peak_buffered_bytes = self
                        .stats
                        .peak_buffered_bytes
                        .max(buffer.buffered_bytes() as u64);
                }
                Offer::Accepted => {}
                Offer::Duplicate => self.stats.duplicates += 1,
                Offer::Stale => self.stats.stale += 1,
                Offer::BufferFull => {
                    self.stats.buffer_full_drops += 1;
                    tracing::debug!(
                        seq = sequence,
                        expected_seq = expected,
                        buffered_bytes = buffer.buffered_bytes(),
                        "reorder buffer full, dropping packet"
                    );
                }
            }
            tracing::trace!(seq = sequence, ?offer, "packet received");

            if offer.should_ack() {
                channel
                    .send(&Ack::new(sequence).encode())
                    .map_err(TransportError::Channel)?;
                self.stats.acks_sent += 1;
            }

            for payload in buffer.drain_ready() {
                sink.write_all(&payload).map_err(TransportError::Sink)?;
                sink.flush().map_err(TransportError::Sink)?;
                self.stats.packets_delivered += 1;
                self.stats.bytes_delivered += payload.len() as u64;
            }
            debug_assert!(buffer.invariants_hold());
        }

        if !buffer.is_empty() {
            tracing::warn!(
                expected_seq = buffer.expected_seq(),
                buffered_packets = buffer.buffered_packets(),
                "peer closed with a gap; buffered packets discarded"
            );
        }
        tracing::info!(
            bytes = self.stats.bytes_delivered,
            packets = self.stats.packets_delivered,
            duplicates = self.stats.duplicates + self.stats.stale,
            "receive complete"
        );
        Ok(self.stats.bytes_delivered)
    }
}
