//! Randomized-sequence and power-loss properties.

use std::time::Duration;

use coffer_core::{storage::Storage, HARDENED};
use coffer_harness::{
    host::ReplyAssertions, CutoffFlash, DeviceSnapshot, InvariantRegistry, SeededEntropy, SimHost,
};
use coffer_proto::{
    messages::{
        device::{ApplySettings, Ping},
        keys::{GetAddress, GetPublicKey},
        provision::LoadDevice,
        tx::SignTx,
    },
    Message,
};
use proptest::prelude::*;

const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// The message vocabulary of the randomized driver.
#[derive(Debug, Clone)]
enum Op {
    Initialize,
    Ping,
    ClearSession,
    GetPublicKey,
    GetAddress,
    SignTxStart,
    Cancel,
    LoadConfirmed,
    WipeConfirmed,
    Hold,
    Decline,
    AdvanceSecs(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Initialize),
        Just(Op::Ping),
        Just(Op::ClearSession),
        Just(Op::GetPublicKey),
        Just(Op::GetAddress),
        Just(Op::SignTxStart),
        Just(Op::Cancel),
        Just(Op::LoadConfirmed),
        Just(Op::WipeConfirmed),
        Just(Op::Hold),
        Just(Op::Decline),
        (1u8..30).prop_map(Op::AdvanceSecs),
    ]
}

fn apply(host: &mut SimHost, op: &Op) {
    match op {
        Op::Initialize => {
            host.send(&Message::Initialize);
        }
        Op::Ping => {
            host.send(&Message::Ping(Ping {
                message: Some("p".into()),
                ..Default::default()
            }));
        }
        Op::ClearSession => {
            host.send(&Message::ClearSession);
        }
        Op::GetPublicKey => {
            host.send(&Message::GetPublicKey(GetPublicKey {
                address_n: vec![44 | HARDENED, HARDENED, HARDENED],
            }));
        }
        Op::GetAddress => {
            host.send(&Message::GetAddress(GetAddress {
                address_n: vec![44 | HARDENED, HARDENED, HARDENED, 0, 0],
                coin_name: Some("Bitcoin".into()),
                ..Default::default()
            }));
        }
        Op::SignTxStart => {
            host.send(&Message::SignTx(SignTx {
                inputs_count: 1,
                outputs_count: 1,
                ..Default::default()
            }));
        }
        Op::Cancel => {
            host.send(&Message::Cancel);
        }
        Op::LoadConfirmed => {
            host.send(&Message::LoadDevice(LoadDevice {
                mnemonic: Some(ABANDON.into()),
                ..Default::default()
            }));
            host.confirm_with_hold();
        }
        Op::WipeConfirmed => {
            host.send(&Message::WipeDevice);
            host.confirm_with_hold();
        }
        Op::Hold => {
            host.confirm_with_hold();
        }
        Op::Decline => {
            host.decline();
        }
        Op::AdvanceSecs(secs) => {
            host.advance(Duration::from_secs(u64::from(*secs)));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Random message sequences never break the storage invariants, and
    /// an Initialize afterwards always yields Features.
    #[test]
    fn random_sequences_hold_invariants(
        seed in 0u64..1000,
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        let registry = InvariantRegistry::standard();
        let mut host = SimHost::application(seed);
        let mut before = DeviceSnapshot::capture(host.device());

        for op in &ops {
            apply(&mut host, op);
            let after = DeviceSnapshot::capture(host.device());
            if let Err(violation) = registry.check_step(&before, &after, &host.replies) {
                prop_assert!(false, "{:?} violated by {:?}", violation, op);
            }
            before = after;
        }

        // Whatever happened, Initialize returns the device to a known
        // state and answers with Features.
        let replies = host.send(&Message::Initialize);
        prop_assert!(replies.iter().any(|m| matches!(m, Message::Features(_))));
    }
}

fn label_msg(label: &str) -> Message {
    Message::ApplySettings(ApplySettings { label: Some(label.to_owned()), ..Default::default() })
}

/// Sweep a power cut over a storage commit: the next boot must always
/// read either the old or the new record, never garbage.
#[test]
fn power_loss_mid_commit_preserves_previous_record() {
    // Budget for one full commit: erase target sector, program the body,
    // program the magic, erase the previous sector.
    let record_len = coffer_core::storage::RECORD_LEN as u64;
    let full_commit: u64 = 16 * 1024 + record_len + 16 * 1024;
    // Sample cut points across the whole window, denser near the magic
    // write where the commit token flips.
    let mut cut_points: Vec<u64> = (0..full_commit).step_by(1024).collect();
    cut_points.extend((16 * 1024)..(16 * 1024 + record_len));

    for cut in cut_points {
        // Build a provisioned device with a known label.
        let mut host = SimHost::application(100);
        host.send(&label_msg("before"));
        host.confirm_with_hold();

        let mut flash = CutoffFlash::new(host.into_flash());

        // Reopen storage directly and attempt a second commit that dies.
        let mut entropy = SeededEntropy::new(101);
        let mut storage = Storage::open(&mut flash, &mut entropy).unwrap();
        storage.record_mut().set_label("after");
        flash.cut_after(cut);
        let _ = storage.commit(&mut flash);

        // Reboot: whatever survived must parse, and the label is one of
        // the two committed values, never a torn mix.
        let rebooted = flash.into_inner();
        let mut host = SimHost::application_with_flash(rebooted, 102);
        let features = host.send(&Message::Initialize).expect_features().clone();
        let label = features.label.unwrap_or_default();
        assert!(
            label == "before" || label == "after",
            "cut at {cut}: torn label {label:?}"
        );
    }
}
