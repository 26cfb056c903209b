//! Scripted host: drives a device over the wire plus the button.

use std::time::Duration;

use coffer_core::{
    device::{Device, DeviceAction, DeviceEvent, Screen},
    MemFlash,
};
use coffer_proto::{FailureCode, Framer, FramerEvent, Message, MessageType};

use crate::{
    chaos::CutoffFlash,
    env::{SeededEntropy, SimInstant},
};

/// How long the simulated finger holds the button for a confirmation.
const HOLD: Duration = Duration::from_millis(1500);

type SimDevice = Device<CutoffFlash, SeededEntropy, SimInstant>;

/// A host (plus a finger) attached to one simulated device.
pub struct SimHost {
    device: SimDevice,
    now: SimInstant,
    rx: Framer,
    /// Every message the device has sent, in order.
    pub replies: Vec<Message>,
    /// Every screen the device has shown, in order.
    pub screens: Vec<Screen>,
}

impl SimHost {
    /// Application-mode device on fresh flash.
    #[must_use]
    pub fn application(seed: u64) -> Self {
        Self::application_with_flash(MemFlash::new(), seed)
    }

    /// Application-mode device on existing flash (reboot).
    #[must_use]
    pub fn application_with_flash(flash: MemFlash, seed: u64) -> Self {
        #[allow(clippy::expect_used)]
        let device = Device::application(CutoffFlash::new(flash), SeededEntropy::new(seed))
            .expect("storage opens on simulated flash");
        Self::wrap(device)
    }

    /// Bootloader-mode device on fresh flash.
    #[must_use]
    pub fn bootloader(seed: u64) -> Self {
        Self::bootloader_with_flash(MemFlash::new(), seed)
    }

    /// Bootloader-mode device on existing flash.
    #[must_use]
    pub fn bootloader_with_flash(flash: MemFlash, seed: u64) -> Self {
        Self::wrap(Device::bootloader(CutoffFlash::new(flash), SeededEntropy::new(seed)))
    }

    fn wrap(device: SimDevice) -> Self {
        Self {
            device,
            now: SimInstant::ZERO,
            rx: Framer::new(),
            replies: Vec::new(),
            screens: Vec::new(),
        }
    }

    /// The device under test.
    pub fn device(&mut self) -> &mut SimDevice {
        &mut self.device
    }

    /// Tear the host down, keeping the flash for a "reboot".
    #[must_use]
    pub fn into_flash(self) -> MemFlash {
        self.device.into_flash().into_inner()
    }

    fn absorb(&mut self, actions: Vec<DeviceAction>) -> Vec<Message> {
        let mut new_replies = Vec::new();
        for action in actions {
            match action {
                DeviceAction::Transmit(packet) => {
                    if let Some(FramerEvent::Message { message_type, payload }) =
                        self.rx.push(packet.as_bytes())
                    {
                        #[allow(clippy::expect_used)]
                        let message = Message::decode(message_type, &payload)
                            .expect("device replies decode");
                        tracing::debug!(?message_type, "device replied");
                        new_replies.push(message);
                    }
                }
                DeviceAction::Display(screen) => self.screens.push(screen),
            }
        }
        self.replies.extend(new_replies.iter().cloned());
        new_replies
    }

    /// Send one message, returning the replies it produced.
    pub fn send(&mut self, message: &Message) -> Vec<Message> {
        #[allow(clippy::expect_used)]
        let packets = message.to_packets().expect("host message encodes");
        let mut replies = Vec::new();
        for packet in packets {
            let actions = self.device.handle(DeviceEvent::Packet {
                bytes: packet.as_bytes().to_vec(),
                now: self.now,
            });
            replies.extend(self.absorb(actions));
        }
        replies
    }

    /// Stream a raw `FirmwareUpload` payload.
    pub fn send_firmware_upload(&mut self, payload: &[u8]) -> Vec<Message> {
        #[allow(clippy::expect_used)]
        let packets = Framer::segment(MessageType::FirmwareUpload.to_u16(), payload)
            .expect("upload payload segments");
        let mut replies = Vec::new();
        for packet in packets {
            let actions = self.device.handle(DeviceEvent::Packet {
                bytes: packet.as_bytes().to_vec(),
                now: self.now,
            });
            replies.extend(self.absorb(actions));
        }
        replies
    }

    /// Advance virtual time, delivering a tick.
    pub fn advance(&mut self, duration: Duration) -> Vec<Message> {
        self.now = self.now + duration;
        let actions = self.device.handle(DeviceEvent::Tick { now: self.now });
        self.absorb(actions)
    }

    /// Acknowledge the button request and hold the button to confirm.
    pub fn confirm_with_hold(&mut self) -> Vec<Message> {
        let mut replies = self.send(&Message::ButtonAck);
        let actions = self.device.handle(DeviceEvent::ButtonPressed { now: self.now });
        replies.extend(self.absorb(actions));
        replies.extend(self.advance(HOLD));
        let actions = self.device.handle(DeviceEvent::ButtonReleased { now: self.now });
        replies.extend(self.absorb(actions));
        replies
    }

    /// Acknowledge and click (review screens commit on a click).
    pub fn confirm_with_click(&mut self) -> Vec<Message> {
        let mut replies = self.send(&Message::ButtonAck);
        let actions = self.device.handle(DeviceEvent::ButtonPressed { now: self.now });
        replies.extend(self.absorb(actions));
        replies.extend(self.advance(Duration::from_millis(50)));
        let actions = self.device.handle(DeviceEvent::ButtonReleased { now: self.now });
        replies.extend(self.absorb(actions));
        replies
    }

    /// Release the button before the hold timer: decline.
    pub fn decline(&mut self) -> Vec<Message> {
        let mut replies = self.send(&Message::ButtonAck);
        let actions = self.device.handle(DeviceEvent::ButtonPressed { now: self.now });
        replies.extend(self.absorb(actions));
        replies.extend(self.advance(Duration::from_millis(100)));
        let actions = self.device.handle(DeviceEvent::ButtonReleased { now: self.now });
        replies.extend(self.absorb(actions));
        replies
    }

    /// The scrambled matrix currently displayed, if any.
    #[must_use]
    pub fn displayed_matrix(&self) -> Option<[u8; 9]> {
        self.screens.iter().rev().find_map(|screen| match screen {
            Screen::PinMatrix { digits } => Some(*digits),
            _ => None,
        })
    }

    /// Enter a PIN the way a user would: read the displayed matrix and
    /// send the positions.
    pub fn enter_pin(&mut self, pin: &str) -> Vec<Message> {
        #[allow(clippy::expect_used)]
        let digits = self.displayed_matrix().expect("a matrix is displayed");
        let mut positions = String::new();
        for digit in pin.bytes() {
            #[allow(clippy::expect_used)]
            let cell = digits.iter().position(|&d| d == digit).expect("digit on matrix");
            positions.push(char::from(b'1' + cell as u8));
        }
        self.send(&Message::PinMatrixAck(
            coffer_proto::messages::device::PinMatrixAck { pin: positions },
        ))
    }

    /// Most recent screen.
    #[must_use]
    pub fn last_screen(&self) -> Option<&Screen> {
        self.screens.last()
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> SimInstant {
        self.now
    }
}

/// Assertion helpers over reply batches.
pub trait ReplyAssertions {
    /// The single `Success` in this batch.
    fn expect_success(&self) -> &str;

    /// The single `Failure` in this batch.
    fn expect_failure(&self) -> (FailureCode, String);

    /// The `Features` reply in this batch.
    fn expect_features(&self) -> &coffer_proto::messages::device::Features;
}

impl ReplyAssertions for Vec<Message> {
    #[allow(clippy::panic)]
    fn expect_success(&self) -> &str {
        for message in self {
            if let Message::Success(success) = message {
                return success.message.as_deref().unwrap_or("");
            }
        }
        panic!("expected Success, got {self:?}");
    }

    #[allow(clippy::panic)]
    fn expect_failure(&self) -> (FailureCode, String) {
        for message in self {
            if let Message::Failure(failure) = message {
                return (
                    failure.code.unwrap_or(FailureCode::Other),
                    failure.message.clone().unwrap_or_default(),
                );
            }
        }
        panic!("expected Failure, got {self:?}");
    }

    #[allow(clippy::panic)]
    fn expect_features(&self) -> &coffer_proto::messages::device::Features {
        for message in self {
            if let Message::Features(features) = message {
                return features;
            }
        }
        panic!("expected Features, got {self:?}");
    }
}
