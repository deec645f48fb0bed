//! # RTT Estimation
//!
//! Derives the retransmission timeout from round-trip samples taken at the
//! start of a transfer:
//!
//! ```text
//! estimated_rtt = mean(samples)
//! deviation     = mean(|sample - estimated_rtt|)
//! timeout       = estimated_rtt + 4 * deviation
//! ```
//!
//! A sample only counts when its ACK is unambiguous: the packet was sent
//! exactly once before the ACK arrived (Karn's rule). An ACK that follows a
//! retransmission could belong to either copy and is ignored.

use std::collections::HashMap;
use std::time::Duration;

use quanta::Instant;

/// Multiplier on the deviation term of the timeout.
pub const DEVIATION_WEIGHT: f64 = 4.0;

/// One transmission of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendRecord {
    pub sequence: u32,
    pub sent_at: Instant,
}

/// One acknowledgment as it arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRecord {
    pub sequence: u32,
    pub received_at: Instant,
}

/// Round-trip statistics in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttEstimate {
    pub estimated_rtt: f64,
    pub deviation: f64,
    pub timeout: f64,
    /// Number of unambiguous samples behind this estimate.
    pub samples: usize,
}

impl RttEstimate {
    /// Estimate used when no sample is available.
    pub fn fallback(default_timeout: Duration) -> Self {
        let secs = default_timeout.as_secs_f64();
        RttEstimate {
            estimated_rtt: secs,
            deviation: 0.0,
            timeout: secs,
            samples: 0,
        }
    }

    /// The timeout clamped into `[min, max]`.
    pub fn retransmission_timeout(&self, min: Duration, max: Duration) -> Duration {
        Duration::try_from_secs_f64(self.timeout.max(0.0))
            .unwrap_or(max)
            .clamp(min, max)
    }
}

/// Compute an estimate from raw send/ACK records.
///
/// Only the first ACK of each sequence number is considered. Returns `None`
/// when no sample is unambiguous.
pub fn estimate(sends: &[SendRecord], acks: &[AckRecord]) -> Option<RttEstimate> {
    let mut first_ack: HashMap<u32, Instant> = HashMap::new();
    for ack in acks {
        first_ack
            .entry(ack.sequence)
            .and_modify(|t| {
                if ack.received_at < *t {
                    *t = ack.received_at;
                }
            })
            .or_insert(ack.received_at);
    }

    let mut samples = Vec::with_capacity(first_ack.len());
    for (&sequence, &acked_at) in &first_ack {
        let mut before_ack = sends
            .iter()
            .filter(|s| s.sequence == sequence && s.sent_at <= acked_at);
        let (Some(only), None) = (before_ack.next(), before_ack.next()) else {
            continue;
        };
        samples.push(acked_at.duration_since(only.sent_at).as_secs_f64());
    }

    if samples.is_empty() {
        return None;
    }

    let n = samples.len() as f64;
    let estimated_rtt = samples.iter().sum::<f64>() / n;
    let deviation = samples
        .iter()
        .map(|s| (s - estimated_rtt).abs())
        .sum::<f64>()
        / n;

    Some(RttEstimate {
        estimated_rtt,
        deviation,
        timeout: estimated_rtt + DEVIATION_WEIGHT * deviation,
        samples: samples.len(),
    })
}

/// Accumulates send/ACK records while a transfer samples its RTT.
#[derive(Debug, Default)]
pub struct RttLog {
    sends: Vec<SendRecord>,
    acks: Vec<AckRecord>,
}

impl RttLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_send(&mut self, sequence: u32, sent_at: Instant) {
        self.sends.push(SendRecord { sequence, sent_at });
    }

    pub fn record_ack(&mut self, sequence: u32, received_at: Instant) {
        self.acks.push(AckRecord {
            sequence,
            received_at,
        });
    }

    pub fn estimate(&self) -> Option<RttEstimate> {
        estimate(&self.sends, &self.acks)
    }
}
