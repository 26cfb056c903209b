//! Fuzz target for storage record parsing and migration.
//!
//! Arbitrary slot images must parse, migrate or be refused without
//! panicking; torn flash contents are normal input here.

#![no_main]

use coffer_core::storage::{migrate, StorageRecord};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = migrate::upgrade(data);
    if let Some(record) = StorageRecord::parse(data) {
        // Parsed records expose every getter without panicking.
        let _ = record.mnemonic();
        let _ = record.node();
        let _ = record.pin_failed_attempts();
        let _ = record.policies();
        let _ = record.uuid_str();
    }
});
