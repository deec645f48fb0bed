#![no_main]

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use ferry_transport::channel::{Channel, RecvError};
use ferry_transport::receiver::ReceiveBuffer;
use ferry_transport::{Receiver, TransportConfig};
use libfuzzer_sys::fuzz_target;

/// Replays datagrams, discards ACKs, then reports the peer closed.
struct Replay(VecDeque<Bytes>);

impl Channel for Replay {
    fn send(&mut self, _datagram: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn recv_timeout(&mut self, max_len: usize, _timeout: Option<Duration>) -> Result<Bytes, RecvError> {
        Ok(self
            .0
            .pop_front()
            .map(|mut d| {
                d.truncate(max_len);
                d
            })
            .unwrap_or_default())
    }
}

/// Split the input into datagrams: each is prefixed by a one-byte length.
/// Zero-length datagrams are skipped so the stream only ends at the close.
fn datagrams(mut data: &[u8]) -> VecDeque<Bytes> {
    let mut out = VecDeque::new();
    while let Some((&len, rest)) = data.split_first() {
        let len = (len as usize).min(rest.len());
        if len > 0 {
            out.push_back(Bytes::copy_from_slice(&rest[..len]));
        }
        data = &rest[len..];
    }
    out
}

fuzz_target!(|data: &[u8]| {
    let dgs = datagrams(data);

    // The reorder buffer must keep its invariants under arbitrary offers.
    let mut buffer = ReceiveBuffer::new(64);
    for dg in &dgs {
        if dg.len() >= 4 {
            let seq = u32::from_be_bytes([dg[0], dg[1], dg[2], dg[3]]) % 64;
            buffer.offer(seq, dg.slice(4..));
            buffer.drain_ready().for_each(drop);
            assert!(buffer.invariants_hold());
        }
    }

    // The full receive loop must never panic.
    let config = TransportConfig {
        max_packet_size: 32,
        buffer_capacity_bytes: 128,
        ..TransportConfig::default()
    };
    let mut sink = Vec::new();
    let _ = Receiver::new(config).receive(&mut Replay(dgs), &mut sink);
});
