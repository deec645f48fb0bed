//! # Sender
//!
//! Two layers:
//!
//! - [`SendWindow`]: pure state, no I/O. Splits the stream into chunks,
//!   hands out packets while the window has room, retires packets on
//!   selective ACKs, and produces batch retransmissions on timeout.
//! - [`Sender`]: drives a `SendWindow` over a [`Channel`]: RTT bootstrap,
//!   then the windowed loop until every chunk is acknowledged.
//!
//! ```text
//!      base                next_seq
//!       │                     │
//!  ─────┼─────────────────────┼──────────────▶ sequence space
//!  acked│ in flight / retired │ not yet sent
//!       │◀──── ≤ window ─────▶│
//! ```
//!
//! `base` advances past every sequence absent from `in_flight`, so ACKs may
//! retire packets in any order.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;

use crate::channel::{Channel, RecvError};
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::rtt::{RttEstimate, RttLog};
use crate::stats::SenderStats;
use crate::wire::{Ack, Packet, HEADER_LEN};

// ─── Output Packet ──────────────────────────────────────────────────────────

/// An encoded datagram ready for the channel.
#[derive(Debug, Clone)]
pub struct OutputPacket {
    pub sequence: u32,
    /// Wire bytes (header + payload).
    pub data: Bytes,
    /// Payload length, excluding the header.
    pub payload_len: usize,
    pub is_retransmit: bool,
}

// ─── In-flight entry ────────────────────────────────────────────────────────

/// A transmitted packet awaiting its ACK.
#[derive(Debug, Clone)]
pub struct InFlight {
    /// Encoded datagram, reused verbatim on retransmission.
    pub datagram: Bytes,
    pub first_sent_at: Instant,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
    pub transmissions: u32,
}

/// What an ACK did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The packet was in flight and is now retired; `base` is the window base
    /// after retirement.
    Retired { base: u32 },
    /// The packet was already retired (late or duplicated ACK).
    Duplicate,
    /// The sequence number was never transmitted.
    Unknown,
}

// ─── Send Window ────────────────────────────────────────────────────────────

/// Sliding window over the chunks of one stream transfer.
#[derive(Debug)]
pub struct SendWindow {
    chunks: Vec<Bytes>,
    window_size: u32,
    /// Smallest sequence number not yet acknowledged.
    base: u32,
    /// Next sequence number to transmit for the first time.
    next_seq: u32,
    in_flight: BTreeMap<u32, InFlight>,
}

impl SendWindow {
    /// Split `data` into chunks of at most `max_packet_size` bytes.
    ///
    /// Empty input becomes a single empty chunk so the transfer is still
    /// acknowledged end to end.
    ///
    /// # Panics
    ///
    /// Panics if `max_packet_size` or `window_size` is zero.
    pub fn new(
        data: Bytes,
        max_packet_size: usize,
        window_size: usize,
    ) -> Result<Self, TransportError> {
        assert!(max_packet_size > 0, "max_packet_size must be non-zero");
        assert!(window_size > 0, "window_size must be at least 1");

        let chunk_count = data.len().div_ceil(max_packet_size).max(1);
        if chunk_count as u64 > u64::from(u32::MAX) {
            return Err(TransportError::StreamTooLong {
                chunks: chunk_count as u64,
            });
        }

        let chunks = if data.is_empty() {
            vec![Bytes::new()]
        } else {
            (0..chunk_count)
                .map(|i| {
                    let start = i * max_packet_size;
                    let end = (start + max_packet_size).min(data.len());
                    data.slice(start..end)
                })
                .collect()
        };

        Ok(SendWindow {
            chunks,
            window_size: u32::try_from(window_size).unwrap_or(u32::MAX),
            base: 0,
            next_seq: 0,
            in_flight: BTreeMap::new(),
        })
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Every chunk has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.base == self.chunk_count()
    }

    /// A new sequence number may be transmitted.
    pub fn has_room(&self) -> bool {
        self.next_seq < self.chunk_count() && self.next_seq - self.base < self.window_size
    }

    pub fn get(&self, sequence: u32) -> Option<&InFlight> {
        self.in_flight.get(&sequence)
    }

    pub fn in_flight(&self) -> impl Iterator<Item = (u32, &InFlight)> + '_ {
        self.in_flight.iter().map(|(&seq, entry)| (seq, entry))
    }

    /// Frame and record the next new packet, if the window has room.
    pub fn transmit_next(&mut self, now: Instant) -> Option<OutputPacket> {
        if !self.has_room() {
            return None;
        }
        let sequence = self.next_seq;
        let payload = self.chunks[sequence as usize].clone();
        let payload_len = payload.len();
        let datagram = Packet::new(sequence, payload).encode();

        self.in_flight.insert(
            sequence,
            InFlight {
                datagram: datagram.clone(),
                first_sent_at: now,
                sent_at: now,
                transmissions: 1,
            },
        );
        self.next_seq += 1;

        Some(OutputPacket {
            sequence,
            data: datagram,
            payload_len,
            is_retransmit: false,
        })
    }

    /// Transmit new packets until the window is full or the stream exhausted.
    pub fn fill(&mut self, now: Instant) -> Vec<OutputPacket> {
        let mut out = Vec::new();
        while let Some(pkt) = self.transmit_next(now) {
            out.push(pkt);
        }
        out
    }

    /// Apply a selective ACK. Safe to call with any sequence number, any
    /// number of times.
    pub fn on_ack(&mut self, sequence: u32) -> AckOutcome {
        if sequence >= self.next_seq {
            return AckOutcome::Unknown;
        }
        if self.in_flight.remove(&sequence).is_none() {
            return AckOutcome::Duplicate;
        }
        while self.base < self.next_seq && !self.in_flight.contains_key(&self.base) {
            self.base += 1;
        }
        AckOutcome::Retired { base: self.base }
    }

    /// Retransmit every unacknowledged packet in `[base, base + window_size)`.
    ///
    /// With `max_retransmissions` set, fails once any of those packets has
    /// already been retransmitted that many times.
    pub fn retransmit_window(
        &mut self,
        now: Instant,
        max_retransmissions: Option<u32>,
    ) -> Result<Vec<OutputPacket>, TransportError> {
        let end = self.base.saturating_add(self.window_size);

        if let Some(limit) = max_retransmissions {
            if let Some((&sequence, entry)) = self
                .in_flight
                .range(self.base..end)
                .find(|(_, entry)| entry.transmissions - 1 >= limit)
            {
                return Err(TransportError::RetriesExhausted {
                    sequence,
                    attempts: entry.transmissions,
                });
            }
        }

        let out = self
            .in_flight
            .range_mut(self.base..end)
            .map(|(&sequence, entry)| {
                entry.sent_at = now;
                entry.transmissions += 1;
                OutputPacket {
                    sequence,
                    data: entry.datagram.clone(),
                    payload_len: entry.datagram.len() - HEADER_LEN,
                    is_retransmit: true,
                }
            })
            .collect();
        Ok(out)
    }

    /// `base <= next_seq`, `next_seq - base <= window_size`, and every
    /// in-flight key lies in `[base, next_seq)`.
    pub fn invariants_hold(&self) -> bool {
        self.base <= self.next_seq
            && self.next_seq - self.base <= self.window_size
            && self.in_flight.len() <= self.window_size as usize
            && self
                .in_flight
                .keys()
                .all(|&seq| seq >= self.base && seq < self.next_seq)
    }
}

// ─── Sender ─────────────────────────────────────────────────────────────────

/// Blocking sender. Each call to [`Sender::send`] is an independent
/// transfer with a fresh window.
#[derive(Debug)]
pub struct Sender {
    config: TransportConfig,
    stats: SenderStats,
    rtt: Option<RttEstimate>,
}

impl Sender {
    pub fn new(config: TransportConfig) -> Self {
        Sender {
            config,
            stats: SenderStats::default(),
            rtt: None,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Statistics of the most recent transfer.
    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    /// RTT estimate of the most recent transfer.
    pub fn rtt(&self) -> Option<&RttEstimate> {
        self.rtt.as_ref()
    }

    /// Deliver `data` to the peer. Returns once every chunk is acknowledged.
    pub fn send<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        data: impl Into<Bytes>,
    ) -> Result<(), TransportError> {
        self.config.validate()?;
        let data = data.into();
        let total_bytes = data.len();
        let mut window =
            SendWindow::new(data, self.config.max_packet_size, self.config.window_size)?;

        self.stats = SenderStats {
            chunks: u64::from(window.chunk_count()),
            ..SenderStats::default()
        };
        self.rtt = None;

        tracing::info!(
            bytes = total_bytes,
            chunks = window.chunk_count(),
            window_size = self.config.window_size,
            "send started"
        );

        let estimate = self.bootstrap(channel, &mut window)?;
        let rto = estimate.retransmission_timeout(self.config.min_timeout, self.config.max_timeout);
        self.stats.record_rtt(&estimate, rto);
        self.rtt = Some(estimate);
        tracing::debug!(
            samples = estimate.samples,
            estimated_rtt_ms = estimate.estimated_rtt * 1e3,
            deviation_ms = estimate.deviation * 1e3,
            rto_ms = rto.as_secs_f64() * 1e3,
            "retransmission timeout chosen"
        );

        self.run_window(channel, &mut window, rto)?;

        tracing::info!(
            packets_sent = self.stats.packets_sent,
            retransmissions = self.stats.retransmissions,
            timeouts = self.stats.timeouts,
            "send complete"
        );
        Ok(())
    }

    /// Send the first packets one at a time, timing each ACK.
    fn bootstrap<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        window: &mut SendWindow,
    ) -> Result<RttEstimate, TransportError> {
        let samples = self
            .config
            .rtt_sample_count
            .min(window.chunk_count() as usize);
        let fallback = RttEstimate::fallback(self.config.default_timeout);
        if samples == 0 {
            return Ok(fallback);
        }

        let mut log = RttLog::new();
        for _ in 0..samples {
            let sent_at = Instant::now();
            let Some(out) = window.transmit_next(sent_at) else {
                break;
            };
            self.transmit(channel, &out)?;
            log.record_send(out.sequence, sent_at);

            let deadline = sent_at + self.config.bootstrap_timeout;
            loop {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    tracing::debug!(seq = out.sequence, "rtt sample timed out");
                    break;
                }
                let Some(datagram) = self.recv_ack(channel, window, left)? else {
                    tracing::debug!(seq = out.sequence, "rtt sample timed out");
                    break;
                };
                let received_at = Instant::now();
                if let Some(ack) = self.decode_ack(&datagram) {
                    log.record_ack(ack.sequence, received_at);
                    self.apply_ack(window, ack.sequence);
                    if ack.sequence == out.sequence {
                        break;
                    }
                }
            }
        }

        Ok(log.estimate().unwrap_or(fallback))
    }

    fn run_window<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        window: &mut SendWindow,
        rto: Duration,
    ) -> Result<(), TransportError> {
        while !window.is_complete() {
            for out in window.fill(Instant::now()) {
                self.transmit(channel, &out)?;
            }
            debug_assert!(window.invariants_hold());

            match self.recv_ack(channel, window, rto)? {
                Some(datagram) => {
                    if let Some(ack) = self.decode_ack(&datagram) {
                        self.apply_ack(window, ack.sequence);
                    }
                }
                None => {
                    self.stats.timeouts += 1;
                    let resend =
                        window.retransmit_window(Instant::now(), self.config.max_retransmissions)?;
                    tracing::warn!(
                        base = window.base(),
                        next_seq = window.next_seq(),
                        packets = resend.len(),
                        rto_ms = rto.as_secs_f64() * 1e3,
                        "ack timeout, retransmitting window"
                    );
                    for out in &resend {
                        self.transmit(channel, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn transmit<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        out: &OutputPacket,
    ) -> Result<(), TransportError> {
        channel.send(&out.data).map_err(TransportError::Channel)?;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += out.payload_len as u64;
        if out.is_retransmit {
            self.stats.retransmissions += 1;
        }
        tracing::debug!(
            seq = out.sequence,
            len = out.payload_len,
            retransmit = out.is_retransmit,
            "packet sent"
        );
        Ok(())
    }

    /// `Ok(None)` on timeout.
    fn recv_ack<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        window: &SendWindow,
        timeout: Duration,
    ) -> Result<Option<Bytes>, TransportError> {
        match channel.recv_timeout(self.config.max_datagram_len(), Some(timeout)) {
            Ok(datagram) if datagram.is_empty() => Err(TransportError::PeerClosed {
                outstanding: window.chunk_count() - window.base(),
            }),
            Ok(datagram) => Ok(Some(datagram)),
            Err(RecvError::Timeout) => Ok(None),
            Err(RecvError::Io(e)) => Err(TransportError::Channel(e)),
        }
    }

    fn decode_ack(&mut self, datagram: &[u8]) -> Option<Ack> {
        match Ack::decode(datagram) {
            Ok(ack) => Some(ack),
            Err(e) => {
                self.stats.malformed_acks += 1;
                tracing::warn!(error = %e, "dropping malformed acknowledgment");
                None
            }
        }
    }

    fn apply_ack(&mut self, window: &mut SendWindow, sequence: u32) {
        match window.on_ack(sequence) {
            AckOutcome::Retired { base } => {
                self.stats.acks_received += 1;
                tracing::trace!(seq = sequence, base, "ack retired packet");
            }
            outcome => {
                self.stats.duplicate_acks += 1;
                tracing::trace!(seq = sequence, ?outcome, "ignoring ack");
            }
        }
    }
}
