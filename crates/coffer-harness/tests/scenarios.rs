//! End-to-end device scenarios over the simulated wire.

use std::time::Duration;

use coffer_core::{
    device::Screen,
    storage::Storage,
    upload::{UploadEngine, UploadState},
    HARDENED,
};
use coffer_harness::{host::ReplyAssertions, FirmwareImage, SimHost};
use coffer_proto::{
    messages::{
        device::Ping,
        keys::GetAddress,
        provision::LoadDevice,
        tx::{RequestType, SignTx},
    },
    FailureCode, Message,
};

const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

fn load_abandon(host: &mut SimHost) {
    let replies = host.send(&Message::LoadDevice(LoadDevice {
        mnemonic: Some(ABANDON.into()),
        passphrase_protection: Some(false),
        ..Default::default()
    }));
    assert!(matches!(replies.last(), Some(Message::ButtonRequest(_))));
    host.confirm_with_hold().expect_success();
}

/// S1: fresh device answers Initialize with an uninitialized Features.
#[test]
fn s1_fresh_device_initialize() {
    coffer_harness::init_tracing();
    let mut host = SimHost::application(1);
    let replies = host.send(&Message::Initialize);
    let features = replies.expect_features();
    assert_eq!(features.vendor.as_deref(), Some("keepkey.com"));
    assert_eq!(features.initialized, Some(false));
    assert_eq!(features.pin_protection, Some(false));
    assert_eq!(features.passphrase_protection, Some(false));
    assert_eq!(features.bootloader_mode, Some(false));
    assert!(features.device_id.is_some());
}

/// S2: load the reference mnemonic, derive the first BIP-44 address.
#[test]
fn s2_load_device_then_get_address() {
    let mut host = SimHost::application(2);
    load_abandon(&mut host);

    let features = host.send(&Message::Initialize).expect_features().clone();
    assert_eq!(features.initialized, Some(true));
    assert_eq!(features.imported, Some(true));

    let replies = host.send(&Message::GetAddress(GetAddress {
        address_n: vec![44 | HARDENED, HARDENED, HARDENED, 0, 0],
        coin_name: Some("Bitcoin".into()),
        show_display: Some(false),
        ..Default::default()
    }));
    match replies.first() {
        Some(Message::Address(address)) => {
            assert_eq!(address.address, "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA");
        }
        other => unreachable!("expected Address, got {other:?}"),
    }
}

/// S3: firmware upload with a broken magic fails and zeroizes the shadow.
#[test]
fn s3_firmware_upload_bad_magic() {
    let mut host = SimHost::bootloader(3);

    let replies = host.send(&Message::FirmwareErase);
    assert!(matches!(replies.last(), Some(Message::ButtonRequest(_))));
    host.confirm_with_hold().expect_success();

    let payload = FirmwareImage::with_code_len(2048).broken_magic().build();
    let replies = host.send_firmware_upload(&payload);
    let (code, text) = replies.expect_failure();
    assert_eq!(code, FailureCode::FirmwareError);
    assert_eq!(text, "Not valid firmware");

    let device = host.device();
    assert_eq!(device.upload_state(), UploadState::Error);
    assert!(!device.has_storage_shadow(), "shadow must be dropped on error");
    assert!(!UploadEngine::magic_present(device.flash_ref()));
}

/// S4: a validly signed image with a matching hash lands, storage comes
/// back, and the magic is present.
#[test]
fn s4_firmware_upload_good_image() {
    // Provision a seed first so there is storage worth restoring.
    let mut app = SimHost::application(4);
    load_abandon(&mut app);
    let flash = app.into_flash();

    let mut host = SimHost::bootloader_with_flash(flash, 4);
    host.send(&Message::FirmwareErase);
    host.confirm_with_hold().expect_success();

    let payload = FirmwareImage::with_code_len(8192).signed([1, 2, 3]).flags(0x01).build();
    let replies = host.send_firmware_upload(&payload);
    // Upload complete; the device now shows the declared fingerprint.
    assert!(matches!(replies.last(), Some(Message::ButtonRequest(_))));
    match host.last_screen() {
        Some(Screen::Fingerprint { hex }) => {
            assert_eq!(hex, &hex::encode(&payload[..32]));
        }
        other => unreachable!("expected fingerprint screen, got {other:?}"),
    }

    let replies = host.confirm_with_hold();
    assert_eq!(replies.expect_success(), "Upload complete");

    let device = host.device();
    assert_eq!(device.upload_state(), UploadState::Finished);
    assert!(UploadEngine::magic_present(device.flash_ref()));

    // Storage survived the upgrade: reboot into the application and check.
    let flash = host.into_flash();
    let mut app = SimHost::application_with_flash(flash, 5);
    let features = app.send(&Message::Initialize).expect_features().clone();
    assert_eq!(features.initialized, Some(true));
}

/// S5: Initialize mid-signing aborts cleanly with only Features visible.
#[test]
fn s5_sign_tx_interrupted_by_initialize() {
    let mut host = SimHost::application(6);
    load_abandon(&mut host);

    let replies = host.send(&Message::SignTx(SignTx {
        inputs_count: 2,
        outputs_count: 1,
        coin_name: Some("Bitcoin".into()),
        ..Default::default()
    }));
    match replies.first() {
        Some(Message::TxRequest(req)) => {
            assert_eq!(req.request, Some(RequestType::TxInput));
            assert_eq!(req.details.as_ref().and_then(|d| d.request_index), Some(0));
        }
        other => unreachable!("expected TxRequest, got {other:?}"),
    }

    let count_before = host.replies.len();
    let replies = host.send(&Message::Initialize);
    replies.expect_features();
    // Exactly one reply: no stray failure, no pending TxRequest.
    assert_eq!(host.replies.len(), count_before + 1);
    assert_eq!(
        replies
            .iter()
            .filter(|m| matches!(m, Message::Failure(_) | Message::TxRequest(_)))
            .count(),
        0
    );

    // The signing session is gone: a TxAck now is unexpected.
    let replies = host.send(&Message::TxAck(coffer_proto::messages::tx::TxAck::default()));
    let (code, _) = replies.expect_failure();
    assert_eq!(code, FailureCode::UnexpectedMessage);
}

/// S6: wrong PINs charge an exponential cooldown before the next attempt.
#[test]
fn s6_wrong_pin_backoff() {
    let mut host = SimHost::application(7);
    let replies = host.send(&Message::LoadDevice(LoadDevice {
        mnemonic: Some(ABANDON.into()),
        pin: Some("1234".into()),
        ..Default::default()
    }));
    assert!(matches!(replies.last(), Some(Message::ButtonRequest(_))));
    host.confirm_with_hold().expect_success();

    // Protected operation: ping with pin_protection.
    let ping = Message::Ping(Ping {
        message: Some("knock".into()),
        pin_protection: Some(true),
        ..Default::default()
    });

    for attempt in 1..=3u32 {
        let replies = host.send(&ping);
        assert!(
            matches!(replies.last(), Some(Message::PinMatrixRequest(_))),
            "attempt {attempt}: expected matrix request"
        );
        let (code, _) = host.enter_pin("9999").expect_failure();
        assert_eq!(code, FailureCode::PinInvalid);
    }

    // Attempt 4: three failures on the counter imposes a 2^3 second wait
    // before the matrix is even offered.
    let replies = host.send(&ping);
    assert!(
        !replies.iter().any(|m| matches!(m, Message::PinMatrixRequest(_))),
        "matrix must be withheld during cooldown"
    );
    let replies = host.advance(Duration::from_secs(7));
    assert!(!replies.iter().any(|m| matches!(m, Message::PinMatrixRequest(_))));
    let replies = host.advance(Duration::from_secs(2));
    assert!(
        replies.iter().any(|m| matches!(m, Message::PinMatrixRequest(_))),
        "matrix should be offered after the cooldown"
    );

    // Correct entry resets the counter and completes the ping.
    let replies = host.enter_pin("1234");
    assert_eq!(replies.expect_success(), "knock");

    let snapshot = {
        let device = host.device();
        Storage::read_active_raw(device.flash_ref()).unwrap().unwrap()
    };
    let record = coffer_core::storage::StorageRecord::parse(&snapshot).unwrap();
    assert_eq!(record.pin_failed_attempts(), 0);
}

/// Wrong-PIN counter survives a power cycle: it is committed before the
/// verdict is reported.
#[test]
fn pin_counter_survives_reboot() {
    let mut host = SimHost::application(8);
    let replies = host.send(&Message::LoadDevice(LoadDevice {
        mnemonic: Some(ABANDON.into()),
        pin: Some("42".into()),
        ..Default::default()
    }));
    assert!(matches!(replies.last(), Some(Message::ButtonRequest(_))));
    host.confirm_with_hold().expect_success();

    let ping = Message::Ping(Ping { pin_protection: Some(true), ..Default::default() });
    host.send(&ping);
    host.enter_pin("11").expect_failure();
    host.send(&ping);
    host.enter_pin("11").expect_failure();

    let flash = host.into_flash();
    let mut rebooted = SimHost::application_with_flash(flash, 9);
    let raw = Storage::read_active_raw(rebooted.device().flash_ref()).unwrap().unwrap();
    let record = coffer_core::storage::StorageRecord::parse(&raw).unwrap();
    assert_eq!(record.pin_failed_attempts(), 2);
}

/// Declining a confirmation cancels the action.
#[test]
fn declined_confirmation_cancels() {
    let mut host = SimHost::application(10);
    host.send(&Message::WipeDevice);
    let (code, _) = host.decline().expect_failure();
    assert_eq!(code, FailureCode::ActionCancelled);
}

/// Cancel is idempotent.
#[test]
fn cancel_is_idempotent() {
    let mut host = SimHost::application(11);
    let (code, _) = host.send(&Message::Cancel).expect_failure();
    assert_eq!(code, FailureCode::ActionCancelled);
    let (code, _) = host.send(&Message::Cancel).expect_failure();
    assert_eq!(code, FailureCode::ActionCancelled);
}

/// Bootloader mode refuses wallet operations.
#[test]
fn bootloader_rejects_wallet_messages() {
    let mut host = SimHost::bootloader(12);
    let features = host.send(&Message::Initialize).expect_features().clone();
    assert_eq!(features.bootloader_mode, Some(true));

    let replies = host.send(&Message::GetAddress(GetAddress::default()));
    let (code, _) = replies.expect_failure();
    assert_eq!(code, FailureCode::UnexpectedMessage);
}

/// Application mode refuses firmware operations.
#[test]
fn application_rejects_firmware_messages() {
    let mut host = SimHost::application(13);
    let (code, text) = host.send(&Message::FirmwareErase).expect_failure();
    assert_eq!(code, FailureCode::UnexpectedMessage);
    assert_eq!(text, "Not in bootloader mode");

    let payload = FirmwareImage::with_code_len(512).build();
    let (code, _) = host.send_firmware_upload(&payload).expect_failure();
    assert_eq!(code, FailureCode::UnexpectedMessage);
}
