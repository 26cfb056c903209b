//! The device: dispatcher, mode tables and interaction plumbing.
//!
//! One [`Device`] value owns everything: flash, storage shadow, session
//! cache, framer and whichever engine is mid-flight. Events go in, actions
//! come out; there is no other I/O.
//!
//! # Blocking interactions without blocking
//!
//! The original firmware busy-waits inside `confirm()`; here consent is a
//! value. A handler that needs the user emits the request
//! (`ButtonRequest`, `PinMatrixRequest`, `PassphraseRequest`), the
//! in-flight message is *parked*, and the handler unwinds with
//! [`Interrupt::Pending`]. When the interaction resolves, the parked
//! message is re-dispatched with the grant recorded; confirmation call
//! sites consume grants in call order, so multi-step handlers replay
//! deterministically and never double-ask.
//!
//! `Initialize` is the universal reset point: it tears down any parked
//! operation, any engine and the session cache, and answers `Features`.
//! The `reset_msg_stack` flag swallows the one failure reply an aborted
//! operation might still try to send, so the host only ever sees the
//! fresh `Features`.

mod app;
mod boot;

use coffer_proto::{
    frame::Packet,
    messages::device::{
        ButtonRequestType, Failure, Features, PinMatrixRequest, PinMatrixRequestType, Success,
    },
    FailureCode, Framer, FramerEvent, Message, MessageType,
};
use zeroize::Zeroizing;

use crate::{
    clock::DeviceInstant,
    confirm::{ConfirmFlow, ConfirmOutcome},
    entropy::Entropy,
    flash::Flash,
    pin::{self, PinMatrix},
    recovery::RecoverySession,
    reset::ResetSession,
    session::{RootSource, Session},
    sign::ActiveSigner,
    storage::Storage,
    upload::UploadEngine,
};

/// Vendor string reported in `Features`.
pub const VENDOR: &str = "keepkey.com";

/// Firmware version reported in `Features`.
pub const VERSION: (u32, u32, u32) = (1, 0, 2);

/// Bootloader version reported in bootloader-mode `Features`.
pub const BOOTLOADER_VERSION: (u32, u32, u32) = (1, 0, 0);

/// Which dispatch table the device started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    /// Full wallet operation.
    Application,
    /// Firmware update only.
    Bootloader,
}

/// Everything that can happen to the device.
#[derive(Debug, Clone)]
pub enum DeviceEvent<I> {
    /// One HID packet arrived (at most 64 bytes).
    Packet {
        /// Raw endpoint bytes.
        bytes: Vec<u8>,
        /// Arrival time.
        now: I,
    },
    /// The physical button went down.
    ButtonPressed {
        /// Edge time.
        now: I,
    },
    /// The physical button came up.
    ButtonReleased {
        /// Edge time.
        now: I,
    },
    /// Periodic clock tick from the main loop.
    Tick {
        /// Tick time.
        now: I,
    },
}

/// What the display would show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    /// Idle home screen.
    Home,
    /// Informational notification.
    Notify {
        /// Headline.
        title: String,
        /// Body text.
        body: String,
    },
    /// Warning banner.
    Warning {
        /// Body text.
        body: String,
    },
    /// Hold-to-confirm prompt.
    Confirm {
        /// Headline.
        title: String,
        /// Body text.
        body: String,
    },
    /// Scrambled PIN matrix, in display order.
    PinMatrix {
        /// Digits shown in cells 1..=9.
        digits: [u8; 9],
    },
    /// Recovery substitution cipher.
    Cipher {
        /// Scrambled alphabet.
        cipher: String,
        /// Progress hint for the current word.
        word_hint: String,
    },
    /// Recovery sentence backup display.
    Words {
        /// The sentence to write down.
        sentence: String,
    },
    /// Firmware fingerprint for manual comparison.
    Fingerprint {
        /// SHA-256 of the flashed image, hex.
        hex: String,
    },
}

/// What the device wants the outside world to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    /// Send one HID packet to the host.
    Transmit(Packet),
    /// Refresh the display.
    Display(Screen),
}

/// Control-flow result of a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupt {
    /// Parked awaiting user or host interaction; a request was emitted.
    Pending,
    /// Terminal failure for this message.
    Failed(FailureCode, String),
}

impl Interrupt {
    /// Terminal failure with an explicit code.
    pub fn failed(code: FailureCode, text: impl Into<String>) -> Self {
        Self::Failed(code, text.into())
    }

    /// `Failure{Other}` shorthand.
    pub fn other(text: impl Into<String>) -> Self {
        Self::Failed(FailureCode::Other, text.into())
    }
}

/// Consent surface handed to the signing engines.
pub trait ConfirmGate {
    /// Hold-to-confirm; `Err(Pending)` after emitting the request.
    fn confirm(
        &mut self,
        kind: ButtonRequestType,
        title: &str,
        body: &str,
    ) -> Result<(), Interrupt>;

    /// Single-click review screen.
    fn review(
        &mut self,
        kind: ButtonRequestType,
        title: &str,
        body: &str,
    ) -> Result<(), Interrupt>;
}

enum Interaction<I> {
    Confirm(ConfirmFlow<I>),
    PinCooldown { until: I, kind: PinMatrixRequestType },
    PinEntry { kind: PinMatrixRequestType, matrix: PinMatrix, first: Option<Zeroizing<String>> },
    Passphrase,
}

enum Parked {
    Message(Message),
    UploadFinalize,
}

/// The device state machine.
pub struct Device<F: Flash, E: Entropy, I: DeviceInstant> {
    mode: DeviceMode,
    flash: F,
    entropy: E,
    framer: Framer,
    storage: Option<Storage>,
    session: Session,
    interaction: Option<Interaction<I>>,
    parked: Option<Parked>,
    granted: u32,
    used_grants: u32,
    staged_new_pin: Option<Zeroizing<String>>,
    pin_entered_this_op: bool,
    pub(crate) signer: Option<ActiveSigner>,
    pub(crate) recovery: Option<RecoverySession>,
    pub(crate) reset_flow: Option<ResetSession>,
    pub(crate) upload: UploadEngine,
    pub(crate) storage_shadow: Option<Zeroizing<Vec<u8>>>,
    raw_drop_remaining: u32,
    reset_msg_stack: bool,
    out: Vec<DeviceAction>,
}

impl<F: Flash, E: Entropy, I: DeviceInstant> Device<F, E, I> {
    /// Boot in application mode: open storage, clear the session.
    pub fn application(mut flash: F, mut entropy: E) -> Result<Self, crate::CoreError> {
        let storage = Storage::open(&mut flash, &mut entropy)?;
        Ok(Self::build(DeviceMode::Application, flash, entropy, Some(storage)))
    }

    /// Boot in bootloader mode: storage is untouched until `FirmwareErase`.
    pub fn bootloader(flash: F, entropy: E) -> Self {
        Self::build(DeviceMode::Bootloader, flash, entropy, None)
    }

    fn build(mode: DeviceMode, flash: F, entropy: E, storage: Option<Storage>) -> Self {
        Self {
            mode,
            flash,
            entropy,
            framer: Framer::new(),
            storage,
            session: Session::new(),
            interaction: None,
            parked: None,
            granted: 0,
            used_grants: 0,
            staged_new_pin: None,
            pin_entered_this_op: false,
            signer: None,
            recovery: None,
            reset_flow: None,
            upload: UploadEngine::new(),
            storage_shadow: None,
            raw_drop_remaining: 0,
            reset_msg_stack: false,
            out: Vec::new(),
        }
    }

    /// Which mode the device booted in.
    #[must_use]
    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Framer diagnostics.
    #[must_use]
    pub fn framer_stats(&self) -> coffer_proto::FramerStats {
        self.framer.stats()
    }

    /// Direct storage access for provisioning and tests.
    pub fn storage_mut(&mut self) -> Option<&mut Storage> {
        self.storage.as_mut()
    }

    /// Direct flash access for provisioning and tests.
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Read-only flash access, for snapshotting.
    #[must_use]
    pub fn flash_ref(&self) -> &F {
        &self.flash
    }

    /// Tear the device down, keeping the flash (for reboot simulation).
    #[must_use]
    pub fn into_flash(self) -> F {
        self.flash
    }

    /// Firmware-upload engine state (bootloader mode).
    #[must_use]
    pub fn upload_state(&self) -> crate::upload::UploadState {
        self.upload.state()
    }

    /// True while the bootloader holds a storage snapshot in RAM.
    #[must_use]
    pub fn has_storage_shadow(&self) -> bool {
        self.storage_shadow.is_some()
    }

    /// Toggle a feature policy and persist it.
    pub fn set_policy(&mut self, name: &str, enabled: bool) -> Result<(), crate::CoreError> {
        let Some(storage) = self.storage.as_mut() else {
            return Ok(());
        };
        storage.record_mut().set_policy(name, enabled);
        storage.commit(&mut self.flash)?;
        Ok(())
    }

    /// Feed one event through the device.
    pub fn handle(&mut self, event: DeviceEvent<I>) -> Vec<DeviceAction> {
        match event {
            DeviceEvent::Packet { bytes, now } => {
                if let Some(framer_event) = self.framer.push(&bytes) {
                    self.on_framer_event(framer_event, now);
                }
            }
            DeviceEvent::ButtonPressed { now } => {
                if let Some(Interaction::Confirm(flow)) = &mut self.interaction {
                    flow.press(now);
                }
            }
            DeviceEvent::ButtonReleased { now } => self.on_release(now),
            DeviceEvent::Tick { now } => self.on_tick(now),
        }
        self.reset_msg_stack = false;
        std::mem::take(&mut self.out)
    }

    fn on_framer_event(&mut self, event: FramerEvent, now: I) {
        match event {
            FramerEvent::UnknownType(code) => {
                tracing::warn!(code, "unknown message type");
                self.send_failure(FailureCode::UnexpectedMessage, "Unknown message");
            }
            FramerEvent::RawSegment { message_type, bytes, declared } => {
                self.on_raw_segment(message_type, &bytes, declared);
            }
            FramerEvent::Message { message_type, payload } => {
                match Message::decode(message_type, &payload) {
                    Ok(message) => self.route(message, now),
                    Err(error) => {
                        tracing::warn!(%error, "payload decode failed");
                        self.send_failure(FailureCode::SyntaxError, "Malformed message");
                    }
                }
            }
        }
    }

    fn on_raw_segment(&mut self, message_type: MessageType, bytes: &[u8], declared: u32) {
        debug_assert_eq!(message_type, MessageType::FirmwareUpload);
        match self.mode {
            DeviceMode::Bootloader => self.upload_segment(bytes, declared),
            DeviceMode::Application => {
                // Reply once per stream, then swallow the rest.
                if self.raw_drop_remaining == 0 {
                    self.send_failure(FailureCode::UnexpectedMessage, "Not in bootloader mode");
                    self.raw_drop_remaining = declared.saturating_sub(bytes.len() as u32);
                } else {
                    self.raw_drop_remaining =
                        self.raw_drop_remaining.saturating_sub(bytes.len() as u32);
                }
            }
        }
    }

    fn route(&mut self, message: Message, now: I) {
        // Reset points come first, whatever else is in flight.
        if matches!(message, Message::Initialize) {
            self.abort_everything(true);
            self.msg_initialize();
            return;
        }
        if matches!(message, Message::Cancel) {
            self.abort_everything(false);
            self.send_failure(FailureCode::ActionCancelled, "Aborted");
            self.go_home();
            return;
        }

        // An interaction in flight owns the wire.
        if self.interaction.is_some() {
            self.route_interaction(message, now);
            return;
        }

        self.deliver(message, now, false);
    }

    fn route_interaction(&mut self, message: Message, now: I) {
        match message {
            Message::ButtonAck => {
                if let Some(Interaction::Confirm(flow)) = &mut self.interaction {
                    flow.ack();
                } else {
                    self.send_failure(FailureCode::UnexpectedMessage, "No button request pending");
                }
            }
            Message::PinMatrixAck(ack) => {
                if matches!(self.interaction, Some(Interaction::PinEntry { .. })) {
                    self.on_pin_ack(&ack.pin, now);
                } else {
                    self.send_failure(FailureCode::UnexpectedMessage, "No PIN request pending");
                }
            }
            Message::PassphraseAck(ack) => {
                if matches!(self.interaction, Some(Interaction::Passphrase)) {
                    self.session.cache_passphrase(ack.passphrase);
                    self.interaction = None;
                    self.resume(now);
                } else {
                    self.send_failure(
                        FailureCode::UnexpectedMessage,
                        "No passphrase request pending",
                    );
                }
            }
            _ => {
                let code = match self.interaction {
                    Some(Interaction::Confirm(_)) => FailureCode::ButtonExpected,
                    Some(
                        Interaction::PinEntry { .. } | Interaction::PinCooldown { .. },
                    ) => FailureCode::PinExpected,
                    _ => FailureCode::Other,
                };
                self.send_failure(code, "Another interaction is in progress");
            }
        }
    }

    /// Dispatch a message, parking it when it suspends on the user.
    fn deliver(&mut self, message: Message, now: I, replay: bool) {
        if !replay {
            self.granted = 0;
        }
        self.used_grants = 0;

        match self.dispatch(&message, now) {
            Ok(()) => {
                self.parked = None;
                self.granted = 0;
                self.staged_new_pin = None;
                self.pin_entered_this_op = false;
            }
            Err(Interrupt::Pending) => {
                self.parked = Some(Parked::Message(message));
            }
            Err(Interrupt::Failed(code, text)) => {
                self.parked = None;
                self.granted = 0;
                self.staged_new_pin = None;
                self.pin_entered_this_op = false;
                self.send_failure(code, &text);
                self.go_home();
            }
        }
    }

    fn dispatch(&mut self, message: &Message, now: I) -> Result<(), Interrupt> {
        match self.mode {
            DeviceMode::Application => self.dispatch_app(message, now),
            DeviceMode::Bootloader => self.dispatch_boot(message, now),
        }
    }

    /// Re-run whatever was parked, with grants carried over.
    fn resume(&mut self, now: I) {
        match self.parked.take() {
            Some(Parked::Message(message)) => self.deliver(message, now, true),
            Some(Parked::UploadFinalize) => {
                self.used_grants = 0;
                self.finish_upload();
            }
            None => {}
        }
    }

    fn on_tick(&mut self, now: I) {
        match &mut self.interaction {
            Some(Interaction::Confirm(flow)) => flow.tick(now),
            Some(Interaction::PinCooldown { until, kind }) => {
                if now >= *until {
                    let kind = *kind;
                    self.interaction = None;
                    self.start_pin_entry(kind);
                }
            }
            _ => {}
        }
    }

    fn on_release(&mut self, now: I) {
        let Some(Interaction::Confirm(flow)) = &mut self.interaction else {
            return;
        };
        match flow.release(now) {
            ConfirmOutcome::Pending => {}
            ConfirmOutcome::Committed => {
                self.interaction = None;
                self.granted += 1;
                self.resume(now);
            }
            ConfirmOutcome::Aborted => {
                self.interaction = None;
                self.on_consent_refused();
            }
        }
    }

    fn on_consent_refused(&mut self) {
        match self.parked.take() {
            Some(Parked::UploadFinalize) => {
                self.upload.mark_error();
                self.storage_shadow = None;
                self.send_failure(FailureCode::FirmwareError, "Upload aborted");
            }
            _ => {
                self.granted = 0;
                self.staged_new_pin = None;
                self.pin_entered_this_op = false;
                self.send_failure(FailureCode::ActionCancelled, "Action cancelled");
            }
        }
        self.go_home();
    }

    fn on_pin_ack(&mut self, positions: &str, now: I) {
        let Some(Interaction::PinEntry { kind, matrix, first }) = self.interaction.take() else {
            return;
        };
        let Some(pin) = matrix.decode(positions) else {
            self.parked = None;
            self.granted = 0;
            self.send_failure(FailureCode::PinCancelled, "PIN entry cancelled");
            self.go_home();
            return;
        };

        match kind {
            PinMatrixRequestType::Current => self.check_current_pin(&pin, now),
            PinMatrixRequestType::NewFirst => {
                let matrix = PinMatrix::generate(&mut self.entropy);
                self.push_display(Screen::PinMatrix { digits: *matrix.digits() });
                self.interaction = Some(Interaction::PinEntry {
                    kind: PinMatrixRequestType::NewSecond,
                    matrix,
                    first: Some(Zeroizing::new(pin)),
                });
                self.push_pin_request(PinMatrixRequestType::NewSecond);
            }
            PinMatrixRequestType::NewSecond => {
                if first.as_ref().map(|f| f.as_str()) == Some(pin.as_str()) {
                    self.staged_new_pin = Some(Zeroizing::new(pin));
                    self.resume(now);
                } else {
                    self.parked = None;
                    self.granted = 0;
                    self.send_failure(FailureCode::PinInvalid, "PINs do not match");
                    self.go_home();
                }
            }
        }
    }

    fn check_current_pin(&mut self, pin: &str, now: I) {
        let Some(storage) = self.storage.as_mut() else {
            self.send_failure(FailureCode::Other, "Storage unavailable");
            return;
        };

        if storage.record().pin_matches(pin) {
            storage.record_mut().reset_pin_fails();
            if let Err(error) = storage.commit(&mut self.flash) {
                tracing::error!(%error, "failed to persist PIN counter reset");
            }
            self.session.cache_pin();
            self.pin_entered_this_op = true;
            self.resume(now);
        } else {
            // Charge the failure to flash before reporting it, so a power
            // cycle cannot reset the counter.
            storage.record_mut().increase_pin_fails();
            if let Err(error) = storage.commit(&mut self.flash) {
                tracing::error!(%error, "failed to persist PIN failure counter");
            }
            self.session.clear();
            self.parked = None;
            self.granted = 0;
            self.send_failure(FailureCode::PinInvalid, "Invalid PIN");
            self.go_home();
        }
    }

    // Interaction starters, used by handlers

    fn start_pin_entry(&mut self, kind: PinMatrixRequestType) {
        let matrix = PinMatrix::generate(&mut self.entropy);
        self.push_display(Screen::PinMatrix { digits: *matrix.digits() });
        self.interaction = Some(Interaction::PinEntry { kind, matrix, first: None });
        self.push_pin_request(kind);
    }

    fn push_pin_request(&mut self, kind: PinMatrixRequestType) {
        self.queue(Message::PinMatrixRequest(PinMatrixRequest { kind: Some(kind) }));
    }

    /// Gate on the current PIN, with cached-PIN policy and backoff.
    pub(crate) fn require_pin(&mut self, now: I) -> Result<(), Interrupt> {
        self.require_pin_with(now, true)
    }

    /// Gate on the current PIN, always asking even when cached.
    pub(crate) fn require_pin_fresh(&mut self, now: I) -> Result<(), Interrupt> {
        self.require_pin_with(now, false)
    }

    fn require_pin_with(&mut self, now: I, allow_cached: bool) -> Result<(), Interrupt> {
        let record = self
            .storage
            .as_ref()
            .ok_or_else(|| Interrupt::other("Storage unavailable"))?
            .record();
        if !record.has_pin() {
            return Ok(());
        }
        if self.pin_entered_this_op {
            return Ok(());
        }
        if allow_cached && self.session.pin_cached() && record.policy_enabled("Pin Caching") {
            return Ok(());
        }

        let delay = pin::backoff_delay(record.pin_failed_attempts());
        if delay > std::time::Duration::ZERO {
            self.push_display(Screen::Warning { body: "Wrong PIN entered, please wait".into() });
            self.interaction = Some(Interaction::PinCooldown {
                until: now + delay,
                kind: PinMatrixRequestType::Current,
            });
        } else {
            self.start_pin_entry(PinMatrixRequestType::Current);
        }
        Err(Interrupt::Pending)
    }

    /// Collect a fresh PIN (entered twice). Returns the staged PIN on
    /// replay, once both entries matched.
    pub(crate) fn request_new_pin(&mut self) -> Result<String, Interrupt> {
        if let Some(staged) = &self.staged_new_pin {
            return Ok(staged.as_str().to_owned());
        }
        self.start_pin_entry(PinMatrixRequestType::NewFirst);
        Err(Interrupt::Pending)
    }

    /// Gate on the session passphrase.
    pub(crate) fn require_passphrase(&mut self) -> Result<(), Interrupt> {
        let record = self
            .storage
            .as_ref()
            .ok_or_else(|| Interrupt::other("Storage unavailable"))?
            .record();
        if !record.passphrase_protection() || self.session.passphrase_cached() {
            return Ok(());
        }
        self.push_display(Screen::Notify {
            title: "Passphrase".into(),
            body: "Enter your passphrase on the computer".into(),
        });
        self.interaction = Some(Interaction::Passphrase);
        self.queue(Message::PassphraseRequest);
        Err(Interrupt::Pending)
    }

    /// Clone of the session root, deriving it (and gating on the
    /// passphrase) as needed.
    pub(crate) fn root_clone(&mut self) -> Result<coffer_crypto::HdNode, Interrupt> {
        self.require_passphrase()?;
        if !self.session.has_root() {
            // Seed stretching takes a noticeable moment on real hardware.
            self.push_display(Screen::Notify {
                title: "Waking up".into(),
                body: "Building root node".into(),
            });
        }
        let record = self
            .storage
            .as_ref()
            .ok_or_else(|| Interrupt::other("Storage unavailable"))?
            .record();
        match self.session.root_node(record, |_, _| {}) {
            RootSource::Ready(node) => Ok(node.clone()),
            RootSource::Uninitialized => Err(Interrupt::failed(
                FailureCode::NotInitialized,
                "Device not initialized",
            )),
            RootSource::Corrupt => Err(Interrupt::other("Stored seed is corrupt")),
            // require_passphrase() above either cached one or found
            // protection off.
            RootSource::NeedPassphrase => Err(Interrupt::other("Passphrase unavailable")),
        }
    }

    pub(crate) fn commit_storage(&mut self) -> Result<(), Interrupt> {
        let Some(storage) = self.storage.as_mut() else {
            return Err(Interrupt::other("Storage unavailable"));
        };
        storage
            .commit(&mut self.flash)
            .map_err(|e| Interrupt::other(format!("Storage commit failed: {e}")))
    }

    pub(crate) fn storage_ref(&self) -> Result<&Storage, Interrupt> {
        self.storage.as_ref().ok_or_else(|| Interrupt::other("Storage unavailable"))
    }

    pub(crate) fn storage_mut_checked(&mut self) -> Result<&mut Storage, Interrupt> {
        self.storage.as_mut().ok_or_else(|| Interrupt::other("Storage unavailable"))
    }

    // Teardown

    fn abort_everything(&mut self, from_initialize: bool) {
        let was_busy = self.interaction.is_some()
            || self.parked.is_some()
            || self.signer.is_some()
            || self.recovery.is_some()
            || self.reset_flow.is_some();
        if from_initialize && was_busy {
            self.reset_msg_stack = true;
        }
        self.interaction = None;
        self.parked = None;
        self.granted = 0;
        self.used_grants = 0;
        self.staged_new_pin = None;
        self.pin_entered_this_op = false;
        self.signer = None;
        self.recovery = None;
        self.reset_flow = None;
        if from_initialize {
            self.session.clear();
        }
    }

    // Wire helpers

    pub(crate) fn queue(&mut self, message: Message) {
        match message.to_packets() {
            Ok(packets) => {
                for packet in packets {
                    self.framer.note_tx(true);
                    self.out.push(DeviceAction::Transmit(packet));
                }
            }
            Err(error) => {
                tracing::error!(%error, "reply encoding failed");
                self.framer.note_tx(false);
            }
        }
    }

    pub(crate) fn send_success(&mut self, text: &str) {
        if self.take_reset_flag() {
            return;
        }
        self.queue(Message::Success(Success { message: Some(text.to_owned()) }));
    }

    pub(crate) fn send_failure(&mut self, code: FailureCode, text: &str) {
        if self.take_reset_flag() {
            return;
        }
        self.queue(Message::Failure(Failure {
            code: Some(code),
            message: Some(text.to_owned()),
        }));
    }

    /// Consume the reset flag; when set, answer with `Features` instead of
    /// whatever reply was about to go out.
    fn take_reset_flag(&mut self) -> bool {
        if self.reset_msg_stack {
            self.reset_msg_stack = false;
            self.msg_initialize();
            true
        } else {
            false
        }
    }

    pub(crate) fn push_display(&mut self, screen: Screen) {
        self.out.push(DeviceAction::Display(screen));
    }

    pub(crate) fn go_home(&mut self) {
        self.push_display(Screen::Home);
    }

    /// Build and send the `Features` reply for the current mode.
    pub(crate) fn msg_initialize(&mut self) {
        let features = match self.mode {
            DeviceMode::Bootloader => Features {
                vendor: Some(VENDOR.to_owned()),
                major_version: Some(BOOTLOADER_VERSION.0),
                minor_version: Some(BOOTLOADER_VERSION.1),
                patch_version: Some(BOOTLOADER_VERSION.2),
                bootloader_mode: Some(true),
                ..Default::default()
            },
            DeviceMode::Application => {
                let record = self.storage.as_ref().map(Storage::record);
                Features {
                    vendor: Some(VENDOR.to_owned()),
                    major_version: Some(VERSION.0),
                    minor_version: Some(VERSION.1),
                    patch_version: Some(VERSION.2),
                    bootloader_mode: Some(false),
                    device_id: record.map(|r| r.uuid_str()),
                    pin_protection: Some(record.is_some_and(|r| r.has_pin())),
                    passphrase_protection: Some(
                        record.is_some_and(crate::storage::StorageRecord::passphrase_protection),
                    ),
                    language: record.and_then(|r| r.language()),
                    label: record.and_then(|r| r.label()),
                    initialized: Some(
                        record.is_some_and(crate::storage::StorageRecord::is_initialized),
                    ),
                    imported: Some(record.is_some_and(crate::storage::StorageRecord::imported)),
                    coins: crate::coins::COINS.iter().map(crate::coins::CoinDef::info).collect(),
                    policies: record
                        .map(|r| {
                            r.policies()
                                .into_iter()
                                .map(|(policy_name, enabled)| {
                                    coffer_proto::messages::device::PolicyInfo {
                                        policy_name,
                                        enabled,
                                    }
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                    ..Default::default()
                }
            }
        };
        self.queue(Message::Features(Box::new(features)));
    }
}

impl<F: Flash, E: Entropy, I: DeviceInstant> ConfirmGate for Device<F, E, I> {
    fn confirm(
        &mut self,
        kind: ButtonRequestType,
        title: &str,
        body: &str,
    ) -> Result<(), Interrupt> {
        if self.used_grants < self.granted {
            self.used_grants += 1;
            return Ok(());
        }
        self.push_display(Screen::Confirm { title: title.to_owned(), body: body.to_owned() });
        self.queue(Message::ButtonRequest(coffer_proto::messages::device::ButtonRequest {
            code: Some(kind),
        }));
        self.interaction = Some(Interaction::Confirm(ConfirmFlow::confirm(kind, title, body)));
        Err(Interrupt::Pending)
    }

    fn review(
        &mut self,
        kind: ButtonRequestType,
        title: &str,
        body: &str,
    ) -> Result<(), Interrupt> {
        if self.used_grants < self.granted {
            self.used_grants += 1;
            return Ok(());
        }
        self.push_display(Screen::Notify { title: title.to_owned(), body: body.to_owned() });
        self.queue(Message::ButtonRequest(coffer_proto::messages::device::ButtonRequest {
            code: Some(kind),
        }));
        self.interaction = Some(Interaction::Confirm(ConfirmFlow::review(kind, title, body)));
        Err(Interrupt::Pending)
    }
}
