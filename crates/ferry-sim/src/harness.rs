//! End-to-end transfer over a simulated link.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use bytes::Bytes;
use ferry_transport::channel::Channel;
use ferry_transport::stats::{ReceiverStats, SenderStats};
use ferry_transport::{Receiver, Sender, TransportConfig};

use crate::impairment::ImpairmentConfig;
use crate::link::{link, LinkSnapshot};

/// Install a compact `tracing` subscriber honouring `RUST_LOG` (default
/// `info`). Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .try_init();
}

/// Outcome of [`run_transfer`].
#[derive(Debug, Clone)]
pub struct TransferReport {
    /// Bytes the receiver wrote to its sink.
    pub delivered: Vec<u8>,
    pub sender: SenderStats,
    pub receiver: ReceiverStats,
    /// Data direction (sender to receiver).
    pub forward: LinkSnapshot,
    /// ACK direction.
    pub reverse: LinkSnapshot,
    pub elapsed: Duration,
}

/// Send `data` across a link impaired by `forward` (data path) and `reverse`
/// (ACK path). The receiver runs on its own thread; the sender closes its
/// endpoint when done so the receiver sees end-of-stream.
pub fn run_transfer(
    data: &[u8],
    config: &TransportConfig,
    forward: ImpairmentConfig,
    reverse: ImpairmentConfig,
) -> anyhow::Result<TransferReport> {
    let (mut tx, mut rx) = link(forward, reverse);
    let forward_stats = tx.outbound_stats();
    let reverse_stats = rx.outbound_stats();

    let rx_config = config.clone();
    let receiver = thread::Builder::new()
        .name("ferry-sim-rx".into())
        .spawn(move || -> anyhow::Result<(Vec<u8>, ReceiverStats)> {
            let mut receiver = Receiver::new(rx_config);
            let mut sink = Vec::new();
            receiver
                .receive(&mut rx, &mut sink)
                .context("receiver failed")?;
            Ok((sink, receiver.stats().clone()))
        })
        .context("failed to spawn receiver thread")?;

    let started = Instant::now();
    let mut sender = Sender::new(config.clone());
    let sent = sender.send(&mut tx, Bytes::copy_from_slice(data));
    tx.close().context("failed to close sender endpoint")?;
    drop(tx);

    let received = receiver
        .join()
        .map_err(|_| anyhow!("receiver thread panicked"))?;
    sent.context("sender failed")?;
    let (delivered, receiver_stats) = received?;
    let elapsed = started.elapsed();

    let report = TransferReport {
        delivered,
        sender: sender.stats().clone(),
        receiver: receiver_stats,
        forward: forward_stats.snapshot(),
        reverse: reverse_stats.snapshot(),
        elapsed,
    };
    tracing::info!(
        bytes = report.delivered.len(),
        packets_sent = report.sender.packets_sent,
        retransmissions = report.sender.retransmissions,
        forward_dropped = report.forward.dropped,
        reverse_dropped = report.reverse.dropped,
        elapsed_ms = elapsed.as_millis() as u64,
        "transfer finished"
    );
    Ok(report)
}
