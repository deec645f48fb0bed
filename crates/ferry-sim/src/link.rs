//! # Simulated link
//!
//! A duplex, in-process datagram link. Each direction has its own
//! [`Impairer`]; a datagram is stamped with its delivery time when sent and
//! held in a time-ordered heap on the receiving endpoint until that time, so
//! delay and jitter reorder traffic the way a real path does.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use ferry_transport::channel::{Channel, RecvError};

use crate::impairment::{Impairer, ImpairmentConfig};

// ─── Counters ───────────────────────────────────────────────────────────────

/// Per-direction counters, shared by both endpoints.
#[derive(Debug, Default)]
pub struct LinkStats {
    sent: AtomicU64,
    dropped: AtomicU64,
    duplicated: AtomicU64,
    delivered: AtomicU64,
}

/// Point-in-time copy of [`LinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub delivered: u64,
}

impl LinkStats {
    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            sent: self.sent.load(AtomicOrdering::Relaxed),
            dropped: self.dropped.load(AtomicOrdering::Relaxed),
            duplicated: self.duplicated.load(AtomicOrdering::Relaxed),
            delivered: self.delivered.load(AtomicOrdering::Relaxed),
        }
    }
}

// ─── Scheduled datagram ─────────────────────────────────────────────────────

#[derive(Debug)]
struct Scheduled {
    deliver_at: Instant,
    /// Send order; breaks ties so equal delivery times keep FIFO order.
    ordinal: u64,
    payload: Bytes,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deliver_at, self.ordinal).cmp(&(other.deliver_at, other.ordinal))
    }
}

// ─── Endpoint ───────────────────────────────────────────────────────────────

/// One end of a simulated link. Implements [`Channel`].
#[derive(Debug)]
pub struct SimEndpoint {
    outbound: Option<Sender<Scheduled>>,
    inbound: Receiver<Scheduled>,
    impairer: Impairer,
    pending: BinaryHeap<Reverse<Scheduled>>,
    next_ordinal: u64,
    peer_gone: bool,
    outbound_stats: Arc<LinkStats>,
    inbound_stats: Arc<LinkStats>,
}

/// Build a duplex link. `forward` impairs traffic from the first endpoint to
/// the second, `reverse` the other way.
pub fn link(forward: ImpairmentConfig, reverse: ImpairmentConfig) -> (SimEndpoint, SimEndpoint) {
    let (a_tx, b_rx) = crossbeam_channel::unbounded();
    let (b_tx, a_rx) = crossbeam_channel::unbounded();
    let forward_stats = Arc::new(LinkStats::default());
    let reverse_stats = Arc::new(LinkStats::default());

    let a = SimEndpoint::new(a_tx, a_rx, forward, forward_stats.clone(), reverse_stats.clone());
    let b = SimEndpoint::new(b_tx, b_rx, reverse, reverse_stats, forward_stats);
    (a, b)
}

impl SimEndpoint {
    fn new(
        outbound: Sender<Scheduled>,
        inbound: Receiver<Scheduled>,
        impairment: ImpairmentConfig,
        outbound_stats: Arc<LinkStats>,
        inbound_stats: Arc<LinkStats>,
    ) -> Self {
        SimEndpoint {
            outbound: Some(outbound),
            inbound,
            impairer: Impairer::new(impairment),
            pending: BinaryHeap::new(),
            next_ordinal: 0,
            peer_gone: false,
            outbound_stats,
            inbound_stats,
        }
    }

    /// Counters for traffic this endpoint sends.
    pub fn outbound_stats(&self) -> Arc<LinkStats> {
        self.outbound_stats.clone()
    }

    /// Counters for traffic this endpoint receives.
    pub fn inbound_stats(&self) -> Arc<LinkStats> {
        self.inbound_stats.clone()
    }

    fn absorb(&mut self, item: Scheduled) {
        self.pending.push(Reverse(item));
    }

    fn absorb_ready(&mut self) {
        loop {
            match self.inbound.try_recv() {
                Ok(item) => self.absorb(item),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.peer_gone = true;
                    return;
                }
            }
        }
    }

    fn pop_due(&mut self, now: Instant, max_len: usize) -> Option<Bytes> {
        if self.pending.peek()?.0.deliver_at > now {
            return None;
        }
        let Reverse(item) = self.pending.pop()?;
        self.inbound_stats
            .delivered
            .fetch_add(1, AtomicOrdering::Relaxed);
        let mut payload = item.payload;
        payload.truncate(max_len);
        Some(payload)
    }
}

impl Channel for SimEndpoint {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let Some(outbound) = &self.outbound else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "endpoint already closed",
            ));
        };
        self.outbound_stats
            .sent
            .fetch_add(1, AtomicOrdering::Relaxed);

        let delays = self.impairer.plan();
        if delays.is_empty() {
            self.outbound_stats
                .dropped
                .fetch_add(1, AtomicOrdering::Relaxed);
            tracing::trace!(len = datagram.len(), "sim link dropped datagram");
            return Ok(());
        }
        if delays.len() > 1 {
            self.outbound_stats
                .duplicated
                .fetch_add(1, AtomicOrdering::Relaxed);
        }

        let now = Instant::now();
        let payload = Bytes::copy_from_slice(datagram);
        for delay in delays {
            let item = Scheduled {
                deliver_at: now + delay,
                ordinal: self.next_ordinal,
                payload: payload.clone(),
            };
            self.next_ordinal += 1;
            // A vanished peer loses the datagram, as a real network would.
            let _ = outbound.send(item);
        }
        Ok(())
    }

    fn recv_timeout(
        &mut self,
        max_len: usize,
        timeout: Option<Duration>,
    ) -> Result<Bytes, RecvError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            self.absorb_ready();
            let now = Instant::now();
            if let Some(payload) = self.pop_due(now, max_len) {
                return Ok(payload);
            }
            if self.peer_gone && self.pending.is_empty() {
                return Ok(Bytes::new());
            }
            if deadline.is_some_and(|d| d <= now) {
                return Err(RecvError::Timeout);
            }

            let next_due = self.pending.peek().map(|item| item.0.deliver_at);
            let wake = match (next_due, deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };

            if self.peer_gone {
                // Only the heap remains; sleep until its head is due.
                if let Some(wake) = wake {
                    std::thread::sleep(wake.saturating_duration_since(now));
                }
                continue;
            }

            let received = match wake {
                Some(wake) => self
                    .inbound
                    .recv_timeout(wake.saturating_duration_since(now)),
                None => self
                    .inbound
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(item) => self.absorb(item),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.peer_gone = true,
            }
        }
    }

    /// Drop the outbound side. The peer reads zero-length once everything
    /// already in flight has been delivered.
    fn close(&mut self) -> io::Result<()> {
        self.outbound = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Option<Duration> = Some(Duration::from_secs(2));

    #[test]
    fn clean_link_is_fifo() {
        let (mut a, mut b) = link(ImpairmentConfig::default(), ImpairmentConfig::default());
        for i in 0u8..10 {
            a.send(&[i]).unwrap();
        }
        for i in 0u8..10 {
            assert_eq!(b.recv_timeout(16, WAIT).unwrap(), &[i][..]);
        }
        let stats = a.outbound_stats().snapshot();
        assert_eq!(stats.sent, 10);
        assert_eq!(stats.delivered, 10);
    }

    #[test]
    fn both_directions_work() {
        let (mut a, mut b) = link(ImpairmentConfig::default(), ImpairmentConfig::default());
        a.send(b"ping").unwrap();
        assert_eq!(b.recv_timeout(16, WAIT).unwrap(), &b"ping"[..]);
        b.send(b"pong").unwrap();
        assert_eq!(a.recv_timeout(16, WAIT).unwrap(), &b"pong"[..]);
    }

    #[test]
    fn delay_schedule_reorders() {
        let forward = ImpairmentConfig {
            delay_schedule: vec![Duration::from_millis(40), Duration::ZERO],
            ..Default::default()
        };
        let (mut a, mut b) = link(forward, ImpairmentConfig::default());
        a.send(b"first").unwrap();
        a.send(b"second").unwrap();
        assert_eq!(b.recv_timeout(16, WAIT).unwrap(), &b"second"[..]);
        assert_eq!(b.recv_timeout(16, WAIT).unwrap(), &b"first"[..]);
    }

    #[test]
    fn delayed_datagram_is_not_early() {
        let forward = ImpairmentConfig {
            delay: Duration::from_millis(200),
            ..Default::default()
        };
        let (mut a, mut b) = link(forward, ImpairmentConfig::default());
        a.send(b"late").unwrap();
        let err = b
            .recv_timeout(16, Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, RecvError::Timeout));
        assert_eq!(b.recv_timeout(16, WAIT).unwrap(), &b"late"[..]);
    }

    #[test]
    fn dropped_and_duplicated_are_counted() {
        let forward = ImpairmentConfig {
            drop_every_nth: Some(2),
            duplicate_rate: 1.0,
            ..Default::default()
        };
        let (mut a, mut b) = link(forward, ImpairmentConfig::default());
        for i in 0u8..4 {
            a.send(&[i]).unwrap();
        }
        a.close().unwrap();
        let mut got = Vec::new();
        loop {
            let d = b.recv_timeout(16, WAIT).unwrap();
            if d.is_empty() {
                break;
            }
            got.push(d[0]);
        }
        assert_eq!(got, vec![0, 0, 2, 2]);
        let stats = b.inbound_stats().snapshot();
        assert_eq!(
            stats,
            LinkSnapshot {
                sent: 4,
                dropped: 2,
                duplicated: 2,
                delivered: 4,
            }
        );
    }

    #[test]
    fn close_drains_then_reads_empty() {
        let forward = ImpairmentConfig {
            delay: Duration::from_millis(30),
            ..Default::default()
        };
        let (mut a, mut b) = link(forward, ImpairmentConfig::default());
        a.send(b"last").unwrap();
        a.close().unwrap();
        assert_eq!(b.recv_timeout(16, WAIT).unwrap(), &b"last"[..]);
        assert!(b.recv_timeout(16, WAIT).unwrap().is_empty());
        assert!(a.send(b"more").is_err());
    }

    #[test]
    fn send_to_dropped_peer_is_silent() {
        let (mut a, b) = link(ImpairmentConfig::default(), ImpairmentConfig::default());
        drop(b);
        a.send(b"into the void").unwrap();
    }

    #[test]
    fn truncates_to_max_len() {
        let (mut a, mut b) = link(ImpairmentConfig::default(), ImpairmentConfig::default());
        a.send(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(b.recv_timeout(3, WAIT).unwrap(), &[1, 2, 3][..]);
    }
}
