//! # Transfer Statistics
//!
//! Counters for one `send` or `receive` call, serializable for logging and
//! JSON export.

use serde::Serialize;

use crate::rtt::RttEstimate;

// ─── Sender Stats ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct SenderStats {
    /// Packets in the stream.
    pub chunks: u64,
    /// Datagrams transmitted, including retransmissions.
    pub packets_sent: u64,
    /// Payload bytes transmitted, including retransmissions.
    pub bytes_sent: u64,
    /// Retransmitted datagrams.
    pub retransmissions: u64,
    /// Receive timeouts in the windowed phase.
    pub timeouts: u64,
    /// ACKs that retired an in-flight packet.
    pub acks_received: u64,
    /// ACKs for packets already retired or never sent.
    pub duplicate_acks: u64,
    /// Datagrams on the ACK path that did not parse.
    pub malformed_acks: u64,
    /// Unambiguous RTT samples from the bootstrap phase.
    pub rtt_samples: u64,
    /// Mean sampled RTT in µs (the fallback when nothing was sampled).
    pub estimated_rtt_us: u64,
    /// Mean absolute RTT deviation in µs.
    pub rtt_deviation_us: u64,
    /// Retransmission timeout used for the windowed phase, in µs.
    pub rto_us: u64,
}

impl SenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of transmissions that were retransmissions.
    pub fn retransmit_ratio(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.packets_sent as f64
        }
    }

    pub(crate) fn record_rtt(&mut self, estimate: &RttEstimate, rto: std::time::Duration) {
        self.rtt_samples = estimate.samples as u64;
        self.estimated_rtt_us = (estimate.estimated_rtt * 1e6) as u64;
        self.rtt_deviation_us = (estimate.deviation * 1e6) as u64;
        self.rto_us = rto.as_micros() as u64;
    }
}

// ─── Receiver Stats ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReceiverStats {
    /// Datagrams read from the channel (excluding the close marker).
    pub datagrams_received: u64,
    /// Packets held because they arrived ahead of `expected_seq`.
    pub packets_buffered: u64,
    /// Packets already held in the reorder buffer.
    pub duplicates: u64,
    /// Packets below `expected_seq` (already delivered).
    pub stale: u64,
    /// Packets dropped because the reorder buffer was full.
    pub buffer_full_drops: u64,
    /// Datagrams shorter than the header.
    pub malformed: u64,
    /// Acknowledgments sent.
    pub acks_sent: u64,
    /// Packets written to the sink.
    pub packets_delivered: u64,
    /// Bytes written to the sink.
    pub bytes_delivered: u64,
    /// High-water mark of buffered payload bytes.
    pub peak_buffered_bytes: u64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of received datagrams that ended up delivered.
    pub fn goodput_ratio(&self) -> f64 {
        if self.datagrams_received == 0 {
            0.0
        } else {
            self.packets_delivered as f64 / self.datagrams_received as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratios_handle_zero() {
        assert_eq!(SenderStats::new().retransmit_ratio(), 0.0);
        assert_eq!(ReceiverStats::new().goodput_ratio(), 0.0);
    }

    #[test]
    fn ratios() {
        let tx = SenderStats {
            packets_sent: 12,
            retransmissions: 3,
            ..Default::default()
        };
        assert!((tx.retransmit_ratio() - 0.25).abs() < 1e-12);

        let rx = ReceiverStats {
            datagrams_received: 10,
            packets_delivered: 8,
            ..Default::default()
        };
        assert!((rx.goodput_ratio() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn stats_serialize_to_json() {
        let tx = SenderStats {
            chunks: 9,
            packets_sent: 9,
            ..Default::default()
        };
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["chunks"], 9);
        assert_eq!(json["packets_sent"], 9);
        assert_eq!(json["retransmissions"], 0);
    }
}
