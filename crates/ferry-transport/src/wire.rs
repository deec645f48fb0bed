//! # Ferry Wire Format
//!
//! Two datagram shapes travel over the channel, both framed only by the
//! datagram boundary (no length field, no checksum).
//!
//! ## Data packet
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  Sequence Number (32, big endian)             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 Payload (0..=max_packet_size bytes)  ...      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! ## Acknowledgment
//!
//! Exactly the 4-byte big-endian sequence number being acknowledged.
//! Acknowledgments are selective: ACK `n` says nothing about `n - 1`.
//!
//! Sequence numbers are packet indices, assigned densely from 0.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Size of the sequence-number header on every data packet.
pub const HEADER_LEN: usize = 4;

/// Size of an acknowledgment datagram.
pub const ACK_LEN: usize = 4;

/// Default chunking granularity (bytes of payload per packet).
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1400;

/// Largest payload that still fits a single UDP datagram behind the header.
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507 - HEADER_LEN;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// A datagram that cannot be interpreted. Always recoverable: the datagram
/// is dropped and the peer's retransmission logic takes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("datagram of {len} bytes is shorter than the 4-byte header")]
    Truncated { len: usize },
    #[error("acknowledgment must be exactly 4 bytes, got {len}")]
    AckLength { len: usize },
}

// ─── Data Packet ─────────────────────────────────────────────────────────────

/// One chunk of the stream together with its packet index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence: u32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence: u32, payload: Bytes) -> Self {
        Packet { sequence, payload }
    }

    /// Encoded size on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialize into a fresh datagram.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u32(self.sequence);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a datagram. The returned payload shares the datagram's storage.
    pub fn decode(mut datagram: Bytes) -> Result<Self, WireError> {
        if datagram.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                len: datagram.len(),
            });
        }
        let sequence = datagram.get_u32();
        Ok(Packet {
            sequence,
            payload: datagram,
        })
    }
}

// ─── Acknowledgment ──────────────────────────────────────────────────────────

/// Selective acknowledgment naming exactly one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub sequence: u32,
}

impl Ack {
    pub fn new(sequence: u32) -> Self {
        Ack { sequence }
    }

    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.sequence.to_be_bytes())
    }

    pub fn decode(mut datagram: &[u8]) -> Result<Self, WireError> {
        if datagram.len() != ACK_LEN {
            return Err(WireError::AckLength {
                len: datagram.len(),
            });
        }
        Ok(Ack {
            sequence: datagram.get_u32(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_header_is_big_endian() {
        let pkt = Packet::new(0x0102_0304, Bytes::from_static(b"xy"));
        let wire = pkt.encode();
        assert_eq!(&wire[..], &[0x01, 0x02, 0x03, 0x04, b'x', b'y']);
        assert_eq!(wire.len(), pkt.encoded_len());
    }

    #[test]
    fn packet_decode_shares_payload() {
        let wire = Packet::new(7, Bytes::from_static(b"hello")).encode();
        let decoded = Packet::decode(wire.clone()).unwrap();
        assert_eq!(decoded.sequence, 7);
        assert_eq!(decoded.payload, &b"hello"[..]);
        assert_eq!(decoded.payload.as_ptr(), wire[HEADER_LEN..].as_ptr());
    }

    #[test]
    fn header_only_packet_has_empty_payload() {
        let decoded = Packet::decode(Bytes::from_static(&[0, 0, 0, 9])).unwrap();
        assert_eq!(decoded.sequence, 9);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn short_datagram_is_truncated() {
        for len in 0..HEADER_LEN {
            let err = Packet::decode(Bytes::from(vec![0u8; len])).unwrap_err();
            assert_eq!(err, WireError::Truncated { len });
        }
    }

    #[test]
    fn ack_is_exactly_four_bytes() {
        let wire = Ack::new(0xDEAD_BEEF).encode();
        assert_eq!(&wire[..], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(Ack::decode(&wire).unwrap().sequence, 0xDEAD_BEEF);
    }

    #[test]
    fn ack_with_wrong_length_is_rejected() {
        assert_eq!(Ack::decode(&[1, 2, 3]), Err(WireError::AckLength { len: 3 }));
        assert_eq!(
            Ack::decode(&[0, 0, 0, 1, 0]),
            Err(WireError::AckLength { len: 5 })
        );
    }
}
