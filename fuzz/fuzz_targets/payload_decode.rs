//! Fuzz target for typed payload decoding.
//!
//! Arbitrary bytes against every known type code. Decoding must return a
//! structured error for garbage, never panic, and every successfully
//! decoded message must re-encode.

#![no_main]

use coffer_proto::{Message, MessageType};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let code = u16::from_be_bytes([data[0], data[1]]);
    let Some(message_type) = MessageType::from_u16(code) else {
        return;
    };
    if let Ok(message) = Message::decode(message_type, &data[2..]) {
        let _ = message.encode();
    }
});
