//! Property-based tests for the send window and reorder buffer.
//!
//! The two state machines are driven in lockstep without any I/O: packets
//! and ACKs pass directly between them, with loss, duplication and
//! reordering chosen by proptest.

use bytes::Bytes;
use proptest::prelude::*;
use quanta::Instant;
use ferry_transport::receiver::{Offer, ReceiveBuffer};
use ferry_transport::sender::{AckOutcome, SendWindow};
use ferry_transport::wire::{Ack, Packet};

// ─── Helpers ────────────────────────────────────────────────────────────────

fn stream(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 251) as u8).collect()
}

/// Rounds after which the simulated network stops losing datagrams, so every
/// loss pattern terminates.
const LOSSY_ROUNDS: usize = 200;

struct Link<'a> {
    pattern: &'a [bool],
    cursor: usize,
    round: usize,
}

impl Link<'_> {
    /// Whether the next datagram is lost.
    fn drops(&mut self) -> bool {
        if self.round >= LOSSY_ROUNDS {
            return false;
        }
        let lost = self.pattern[self.cursor % self.pattern.len()];
        self.cursor += 1;
        lost
    }
}

/// Run one transfer to completion. Returns the delivered bytes.
fn lockstep(
    data: &[u8],
    max_packet_size: usize,
    window_size: usize,
    capacity: usize,
    loss: &[bool],
    reverse_rounds: bool,
) -> Vec<u8> {
    let mut window =
        SendWindow::new(Bytes::copy_from_slice(data), max_packet_size, window_size).unwrap();
    let mut buffer = ReceiveBuffer::new(capacity);
    let mut link = Link {
        pattern: loss,
        cursor: 0,
        round: 0,
    };
    let mut delivered = Vec::with_capacity(data.len());

    while !window.is_complete() {
        let now = Instant::now();
        let mut out = window.fill(now);
        if out.is_empty() {
            out = window.retransmit_window(now, None).unwrap();
        }
        if reverse_rounds && link.round % 2 == 1 {
            out.reverse();
        }

        for pkt in out {
            if link.drops() {
                continue;
            }
            let decoded = Packet::decode(pkt.data).unwrap();
            let offer = buffer.offer(decoded.sequence, decoded.payload);
            for payload in buffer.drain_ready() {
                delivered.extend_from_slice(&payload);
            }
            assert!(buffer.invariants_hold());

            if !offer.should_ack() || link.drops() {
                continue;
            }
            let ack = Ack::decode(&Ack::new(decoded.sequence).encode()).unwrap();
            window.on_ack(ack.sequence);
            assert!(window.invariants_hold());
        }
        link.round += 1;
    }
    delivered
}

// ─── Properties ─────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn lossy_lockstep_delivers_stream(
        len in 0usize..20_000,
        max_packet_size in 1usize..1500,
        window_size in 1usize..24,
        capacity_packets in 1usize..24,
        loss in prop::collection::vec(prop::bool::weighted(0.3), 1..32),
        reverse_rounds in any::<bool>(),
    ) {
        let data = stream(len);
        let capacity = capacity_packets * max_packet_size;
        let out = lockstep(&data, max_packet_size, window_size, capacity, &loss, reverse_rounds);
        prop_assert_eq!(out, data);
    }

    #[test]
    fn any_arrival_order_reassembles(
        n in 1u32..64,
        seed_order in prop::collection::vec(any::<u32>(), 1..200),
    ) {
        // Every sequence at least once, followed by arbitrary repeats.
        let mut arrivals: Vec<u32> = (0..n).collect();
        arrivals.extend(seed_order.iter().map(|s| s % n));
        let len = arrivals.len();
        for (i, s) in seed_order.iter().enumerate() {
            arrivals.swap(i % len, (*s as usize) % len);
        }

        let mut buffer = ReceiveBuffer::new(usize::MAX);
        let mut delivered = Vec::new();
        for seq in arrivals {
            let offer = buffer.offer(seq, Bytes::from(seq.to_be_bytes().to_vec()));
            prop_assert_ne!(offer, Offer::BufferFull);
            prop_assert!(offer.should_ack());
            delivered.extend(buffer.drain_ready());
            prop_assert!(buffer.invariants_hold());
        }

        prop_assert_eq!(buffer.expected_seq(), n);
        prop_assert!(buffer.is_empty());
        let seqs: Vec<u32> = delivered
            .iter()
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        prop_assert_eq!(seqs, (0..n).collect::<Vec<u32>>());
    }

    #[test]
    fn window_invariants_under_arbitrary_acks(
        chunks in 1usize..200,
        window_size in 1usize..32,
        acks in prop::collection::vec(any::<u32>(), 0..400),
    ) {
        let mut window = SendWindow::new(Bytes::from(vec![0u8; chunks]), 1, window_size).unwrap();
        let now = Instant::now();
        for raw in acks {
            window.fill(now);
            let seq = raw % (chunks as u32 + 8);
            let base_before = window.base();
            match window.on_ack(seq) {
                AckOutcome::Retired { base } => {
                    prop_assert!(base >= base_before);
                    prop_assert_eq!(base, window.base());
                }
                AckOutcome::Duplicate | AckOutcome::Unknown => {
                    prop_assert_eq!(window.base(), base_before);
                }
            }
            prop_assert!(window.invariants_hold());
        }

        // Acking everything in flight, repeatedly, completes the transfer.
        while !window.is_complete() {
            window.fill(now);
            let in_flight: Vec<u32> = window.in_flight().map(|(seq, _)| seq).collect();
            for seq in in_flight {
                window.on_ack(seq);
            }
            prop_assert!(window.invariants_hold());
        }
        prop_assert_eq!(window.base(), chunks as u32);
    }

    #[test]
    fn retransmission_covers_exactly_unacked(
        chunks in 1usize..64,
        window_size in 1usize..16,
        acked in prop::collection::vec(any::<bool>(), 16),
    ) {
        let mut window = SendWindow::new(Bytes::from(vec![7u8; chunks]), 1, window_size).unwrap();
        let now = Instant::now();
        let sent: Vec<u32> = window.fill(now).iter().map(|p| p.sequence).collect();
        for (&seq, &ack) in sent.iter().zip(acked.iter()) {
            if ack {
                window.on_ack(seq);
            }
        }
        let mut expected: Vec<u32> = window.in_flight().map(|(seq, _)| seq).collect();
        expected.sort_unstable();
        let resent: Vec<u32> = window
            .retransmit_window(now, None)
            .unwrap()
            .iter()
            .map(|p| p.sequence)
            .collect();
        prop_assert_eq!(resent, expected);
    }
}
