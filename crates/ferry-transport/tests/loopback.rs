//! # Loopback tests: full transfers over real sockets
//!
//! Sender and receiver run on separate threads, talking over 127.0.0.1
//! through the UDP and length-prefixed TCP channel adapters.

use std::net::{TcpListener, UdpSocket};
use std::thread;
use std::time::Duration;

use ferry_transport::{
    receive, send, Channel, Receiver, Sender, StreamChannel, TransportConfig, TransportError,
    UdpChannel,
};

// ─── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 13 % 256) as u8).collect()
}

fn udp_pair() -> (UdpChannel, UdpChannel) {
    let a = UdpSocket::bind("127.0.0.1:0").unwrap();
    let b = UdpSocket::bind("127.0.0.1:0").unwrap();
    a.connect(b.local_addr().unwrap()).unwrap();
    b.connect(a.local_addr().unwrap()).unwrap();
    (UdpChannel::new(a), UdpChannel::new(b))
}

fn tcp_pair() -> (StreamChannel, StreamChannel) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = StreamChannel::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, StreamChannel::new(server))
}

fn test_config() -> TransportConfig {
    TransportConfig {
        idle_timeout: Some(Duration::from_secs(10)),
        max_retransmissions: Some(100),
        ..TransportConfig::default()
    }
}

/// Run a transfer with the receiver on its own thread.
fn transfer<C>(mut tx: C, mut rx: C, data: Vec<u8>) -> Vec<u8>
where
    C: Channel + Send + 'static,
{
    let config = test_config();
    let rx_config = config.clone();
    let receiver = thread::Builder::new()
        .name("ferry-rx".into())
        .spawn(move || {
            let mut sink = Vec::new();
            receive(&mut rx, &mut sink, &rx_config).unwrap();
            sink
        })
        .unwrap();

    send(&mut tx, data, &config).unwrap();
    tx.close().unwrap();
    receiver.join().unwrap()
}

// ─── UDP ────────────────────────────────────────────────────────────────────

#[test]
fn udp_transfer_small() {
    init_tracing();
    let (tx, rx) = udp_pair();
    let data = payload(12_000);
    assert_eq!(transfer(tx, rx, data.clone()), data);
}

#[test]
fn udp_transfer_large() {
    init_tracing();
    let (tx, rx) = udp_pair();
    let data = payload(1_000_000);
    assert_eq!(transfer(tx, rx, data.clone()), data);
}

#[test]
fn udp_transfer_empty() {
    init_tracing();
    let (tx, rx) = udp_pair();
    assert!(transfer(tx, rx, Vec::new()).is_empty());
}

#[test]
fn udp_sender_reports_stats() {
    init_tracing();
    let (mut tx, mut rx) = udp_pair();
    let config = test_config();
    let rx_config = config.clone();
    let receiver = thread::spawn(move || {
        let mut receiver = Receiver::new(rx_config);
        let mut sink = Vec::new();
        receiver.receive(&mut rx, &mut sink).unwrap();
        (sink.len(), receiver.stats().clone())
    });

    let mut sender = Sender::new(config);
    sender.send(&mut tx, payload(50_000)).unwrap();
    tx.close().unwrap();
    let (received, rx_stats) = receiver.join().unwrap();

    let stats = sender.stats();
    assert_eq!(received, 50_000);
    assert_eq!(stats.chunks, 36);
    assert!(stats.packets_sent >= 36);
    assert!(stats.rtt_samples > 0);
    assert!(sender.rtt().is_some());
    assert_eq!(rx_stats.bytes_delivered, 50_000);
    assert_eq!(rx_stats.packets_delivered, 36);
}

#[test]
fn udp_receiver_idle_timeout() {
    init_tracing();
    let (_tx, mut rx) = udp_pair();
    let config = TransportConfig {
        idle_timeout: Some(Duration::from_millis(100)),
        ..TransportConfig::default()
    };
    let err = receive(&mut rx, &mut Vec::new(), &config).unwrap_err();
    assert!(matches!(err, TransportError::IdleTimeout(_)));
}

// ─── TCP framing ────────────────────────────────────────────────────────────

#[test]
fn stream_transfer() {
    init_tracing();
    let (tx, rx) = tcp_pair();
    let data = payload(300_000);
    assert_eq!(transfer(tx, rx, data.clone()), data);
}

#[test]
fn stream_receiver_close_is_peer_closed() {
    init_tracing();
    let (mut tx, rx) = tcp_pair();
    drop(rx);
    let config = TransportConfig {
        bootstrap_timeout: Duration::from_millis(20),
        ..TransportConfig::default()
    };
    let err = send(&mut tx, payload(10_000), &config).unwrap_err();
    assert!(
        matches!(err, TransportError::PeerClosed { .. } | TransportError::Channel(_)),
        "{err}"
    );
}
