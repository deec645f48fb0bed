#![no_main]

use bytes::Bytes;
use ferry_transport::wire::{Ack, Packet};
use libfuzzer_sys::fuzz_target;

/// Neither decoder may panic, and a decoded packet must re-encode to the
/// exact input.
fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = Packet::decode(Bytes::copy_from_slice(data)) {
        assert_eq!(&packet.encode()[..], data);
    }
    if let Ok(ack) = Ack::decode(data) {
        assert_eq!(&ack.encode()[..], data);
    }
});
