//! Fuzz target for packet reassembly.
//!
//! Feeds arbitrary packet sequences through the framer. The framer must
//! never panic; malformed input only bumps counters or drains silently.

#![no_main]

use arbitrary::Arbitrary;
use coffer_proto::Framer;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Stream {
    packets: Vec<Vec<u8>>,
}

fuzz_target!(|stream: Stream| {
    let mut framer = Framer::new();
    for packet in &stream.packets {
        let truncated = &packet[..packet.len().min(64)];
        let _ = framer.push(truncated);
    }
});
