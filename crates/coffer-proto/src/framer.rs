//! Packet reassembly and segmentation.
//!
//! Inbound: 64-byte packets are folded into the framer one at a time. For
//! normal messages the framer buffers until the declared payload length has
//! arrived, then hands the whole payload up once. For raw messages (firmware
//! upload) each segment is handed up as it arrives and the consumer keeps
//! its own cursor.
//!
//! Outbound: a type code plus encoded payload is split into one first packet
//! and as many continuation packets as needed.
//!
//! Framer errors are non-fatal. Malformed input increments a counter and the
//! packet is dropped; only an unknown type code produces an event, because
//! the device must answer it with `Failure{UnexpectedMessage}`.

use crate::{
    frame::{Packet, CONT_CAPACITY, FIRST_CAPACITY, FIRST_HEADER_LEN, REPORT_MARKER},
    types::{MessageClass, MessageType},
    ProtocolError, Result,
};

/// Largest buffered payload the framer will accept for a normal message.
///
/// Raw messages are not buffered and are bounded by their consumer instead.
pub const MAX_PAYLOAD: usize = 64 * 1024;

/// Diagnostic counters, mirroring what the device exposes over debug link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    /// Packets shorter than the minimum header.
    pub runt_packet: u16,
    /// Packets whose report marker was wrong.
    pub invalid_marker: u16,
    /// Messages whose declared length exceeded [`MAX_PAYLOAD`].
    pub oversize: u16,
    /// First packets naming a type code we do not know.
    pub unknown_type: u16,
    /// Packets successfully handed to the transmit path.
    pub tx_packets: u16,
    /// Transmit attempts reported failed by the driver.
    pub tx_errors: u16,
}

/// What a folded-in packet produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// A normal message is fully reassembled.
    Message {
        /// Type named by the first packet.
        message_type: MessageType,
        /// Complete payload, exactly the declared length.
        payload: Vec<u8>,
    },
    /// One segment of a raw message.
    RawSegment {
        /// Type named by the first packet.
        message_type: MessageType,
        /// Segment bytes, already trimmed to the declared total.
        bytes: Vec<u8>,
        /// Total payload length declared by the first packet.
        declared: u32,
    },
    /// First packet named a type code we do not know.
    ///
    /// The message's remaining packets are drained silently; the consumer
    /// should answer with `Failure{UnexpectedMessage}`.
    UnknownType(u16),
}

enum Reassembly {
    Idle,
    /// Accumulating a normal message.
    Buffering {
        message_type: MessageType,
        declared: usize,
        buf: Vec<u8>,
    },
    /// Forwarding raw segments; `received` tracks progress toward `declared`.
    Streaming {
        message_type: MessageType,
        declared: usize,
        received: usize,
    },
    /// Discarding the rest of an unknown or oversized message.
    Draining { remaining: usize },
}

/// Reassembly state machine. One instance per HID interface.
pub struct Framer {
    state: Reassembly,
    stats: FramerStats,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    /// Fresh framer in the idle state.
    #[must_use]
    pub fn new() -> Self {
        Self { state: Reassembly::Idle, stats: FramerStats::default() }
    }

    /// Diagnostic counters.
    #[must_use]
    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    /// Record the outcome of a transmit attempt.
    pub fn note_tx(&mut self, ok: bool) {
        if ok {
            self.stats.tx_packets = self.stats.tx_packets.wrapping_add(1);
        } else {
            self.stats.tx_errors = self.stats.tx_errors.wrapping_add(1);
        }
    }

    /// True while a message is partially received.
    #[must_use]
    pub fn mid_message(&self) -> bool {
        !matches!(self.state, Reassembly::Idle)
    }

    /// Abandon any partially received message.
    pub fn reset(&mut self) {
        self.state = Reassembly::Idle;
    }

    /// Fold in one received packet.
    ///
    /// `bytes` is whatever the endpoint delivered, at most 64 bytes. Returns
    /// an event when the packet completed a message, carried a raw segment,
    /// or named an unknown type. Malformed packets are counted and dropped.
    pub fn push(&mut self, bytes: &[u8]) -> Option<FramerEvent> {
        if bytes.is_empty() || bytes[0] != REPORT_MARKER {
            self.stats.invalid_marker = self.stats.invalid_marker.wrapping_add(1);
            return None;
        }

        // A preamble only begins a message when we are not mid-message; a
        // stray "##" inside a continuation is payload, not a header.
        let starts_message = bytes.len() > 2
            && bytes[1] == b'#'
            && bytes[2] == b'#'
            && !self.mid_message();

        if starts_message {
            if bytes.len() < FIRST_HEADER_LEN {
                self.stats.runt_packet = self.stats.runt_packet.wrapping_add(1);
                return None;
            }
            let code = u16::from_be_bytes([bytes[3], bytes[4]]);
            let declared =
                u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;
            let chunk = &bytes[FIRST_HEADER_LEN..];
            return self.begin(code, declared, chunk);
        }

        if bytes.len() < 2 && self.mid_message() {
            // Marker-only packet mid-message carries nothing.
            return None;
        }

        let chunk = if bytes.len() > 1 { &bytes[1..] } else { &[][..] };
        self.continue_message(chunk)
    }

    fn begin(&mut self, code: u16, declared: usize, chunk: &[u8]) -> Option<FramerEvent> {
        let Some(message_type) = MessageType::from_u16(code) else {
            self.stats.unknown_type = self.stats.unknown_type.wrapping_add(1);
            self.state = Reassembly::Draining {
                remaining: declared.saturating_sub(chunk.len()),
            };
            self.settle_drain();
            return Some(FramerEvent::UnknownType(code));
        };

        match message_type.class() {
            MessageClass::Raw => {
                let take = chunk.len().min(declared);
                self.state = Reassembly::Streaming { message_type, declared, received: take };
                self.settle_stream();
                Some(FramerEvent::RawSegment {
                    message_type,
                    bytes: chunk[..take].to_vec(),
                    declared: declared as u32,
                })
            }
            MessageClass::Normal | MessageClass::Debug => {
                if declared > MAX_PAYLOAD {
                    self.stats.oversize = self.stats.oversize.wrapping_add(1);
                    self.state = Reassembly::Draining {
                        remaining: declared.saturating_sub(chunk.len()),
                    };
                    self.settle_drain();
                    return None;
                }
                let take = chunk.len().min(declared);
                let mut buf = Vec::with_capacity(declared);
                buf.extend_from_slice(&chunk[..take]);
                self.state = Reassembly::Buffering { message_type, declared, buf };
                self.settle_buffer()
            }
        }
    }

    fn continue_message(&mut self, chunk: &[u8]) -> Option<FramerEvent> {
        match &mut self.state {
            Reassembly::Idle => {
                // Continuation with no message in flight: not even a runt,
                // just noise from a desynchronized host.
                self.stats.runt_packet = self.stats.runt_packet.wrapping_add(1);
                None
            }
            Reassembly::Buffering { declared, buf, .. } => {
                let take = chunk.len().min(declared.saturating_sub(buf.len()));
                buf.extend_from_slice(&chunk[..take]);
                self.settle_buffer()
            }
            Reassembly::Streaming { message_type, declared, received } => {
                let message_type = *message_type;
                let take = chunk.len().min(declared.saturating_sub(*received));
                *received += take;
                let declared_total = *declared as u32;
                self.settle_stream();
                Some(FramerEvent::RawSegment {
                    message_type,
                    bytes: chunk[..take].to_vec(),
                    declared: declared_total,
                })
            }
            Reassembly::Draining { remaining } => {
                *remaining = remaining.saturating_sub(chunk.len());
                self.settle_drain();
                None
            }
        }
    }

    /// Emit the buffered message once complete.
    fn settle_buffer(&mut self) -> Option<FramerEvent> {
        if let Reassembly::Buffering { message_type, declared, buf } = &self.state {
            if buf.len() >= *declared {
                let message_type = *message_type;
                let payload = buf.clone();
                self.state = Reassembly::Idle;
                return Some(FramerEvent::Message { message_type, payload });
            }
        }
        None
    }

    fn settle_stream(&mut self) {
        if let Reassembly::Streaming { declared, received, .. } = &self.state {
            if *received >= *declared {
                self.state = Reassembly::Idle;
            }
        }
    }

    fn settle_drain(&mut self) {
        if let Reassembly::Draining { remaining } = &self.state {
            if *remaining == 0 {
                self.state = Reassembly::Idle;
            }
        }
    }

    /// Split an encoded payload into wire packets.
    ///
    /// # Errors
    ///
    /// `ProtocolError::PayloadTooLarge` when `payload` length does not fit
    /// the 32-bit length field.
    pub fn segment(message_type: u16, payload: &[u8]) -> Result<Vec<Packet>> {
        let total = u32::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        })?;

        let first_take = payload.len().min(FIRST_CAPACITY);
        let mut packets = vec![Packet::first(message_type, total, &payload[..first_take])?];

        let mut rest = &payload[first_take..];
        while !rest.is_empty() {
            let take = rest.len().min(CONT_CAPACITY);
            packets.push(Packet::continuation(&rest[..take])?);
            rest = &rest[take..];
        }
        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn feed(framer: &mut Framer, packets: &[Packet]) -> Vec<FramerEvent> {
        packets.iter().filter_map(|p| framer.push(p.as_bytes())).collect()
    }

    #[test]
    fn single_packet_message() {
        let mut framer = Framer::new();
        let packets = Framer::segment(MessageType::Ping.to_u16(), &[1, 2, 3]).unwrap();
        let events = feed(&mut framer, &packets);
        assert_eq!(
            events,
            vec![FramerEvent::Message { message_type: MessageType::Ping, payload: vec![1, 2, 3] }]
        );
        assert!(!framer.mid_message());
    }

    #[test]
    fn empty_payload_completes_immediately() {
        let mut framer = Framer::new();
        let packets = Framer::segment(MessageType::Initialize.to_u16(), &[]).unwrap();
        let events = feed(&mut framer, &packets);
        assert_eq!(
            events,
            vec![FramerEvent::Message {
                message_type: MessageType::Initialize,
                payload: vec![]
            }]
        );
    }

    #[test]
    fn multi_packet_reassembly() {
        let mut framer = Framer::new();
        let payload: Vec<u8> = (0..200u16).map(|i| (i % 251) as u8).collect();
        let packets = Framer::segment(MessageType::SignMessage.to_u16(), &payload).unwrap();
        assert!(packets.len() > 1);
        let events = feed(&mut framer, &packets);
        assert_eq!(
            events,
            vec![FramerEvent::Message {
                message_type: MessageType::SignMessage,
                payload
            }]
        );
    }

    #[test]
    fn stray_preamble_in_continuation_is_payload() {
        let mut framer = Framer::new();
        let mut payload = vec![0u8; FIRST_CAPACITY];
        payload.extend_from_slice(b"##after");
        let packets = Framer::segment(MessageType::SignMessage.to_u16(), &payload).unwrap();
        // Continuation starts with "##" but must be treated as data.
        assert_eq!(&packets[1].as_bytes()[1..3], b"##");
        let events = feed(&mut framer, &packets);
        match &events[0] {
            FramerEvent::Message { payload: got, .. } => assert_eq!(got, &payload),
            other => unreachable!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn runt_packet_counted_and_dropped() {
        let mut framer = Framer::new();
        assert_eq!(framer.push(&[b'?', b'#', b'#', 0, 1]), None);
        assert_eq!(framer.stats().runt_packet, 1);
    }

    #[test]
    fn bad_marker_counted() {
        let mut framer = Framer::new();
        assert_eq!(framer.push(&[0xAB; 64]), None);
        assert_eq!(framer.stats().invalid_marker, 1);
    }

    #[test]
    fn unknown_type_drains_message() {
        let mut framer = Framer::new();
        let payload = vec![0u8; 100];
        let packets = Framer::segment(0x7EEE, &payload).unwrap();
        let events = feed(&mut framer, &packets);
        assert_eq!(events, vec![FramerEvent::UnknownType(0x7EEE)]);
        assert_eq!(framer.stats().unknown_type, 1);
        assert!(!framer.mid_message());
    }

    #[test]
    fn oversize_message_dropped() {
        let mut framer = Framer::new();
        let first = Packet::first(
            MessageType::Ping.to_u16(),
            (MAX_PAYLOAD as u32) + 1,
            &[0u8; FIRST_CAPACITY],
        )
        .unwrap();
        assert_eq!(framer.push(first.as_bytes()), None);
        assert_eq!(framer.stats().oversize, 1);
    }

    #[test]
    fn raw_segments_stream_through() {
        let mut framer = Framer::new();
        let payload: Vec<u8> = (0..150u16).map(|i| i as u8).collect();
        let packets = Framer::segment(MessageType::FirmwareUpload.to_u16(), &payload).unwrap();
        let events = feed(&mut framer, &packets);
        assert_eq!(events.len(), packets.len());
        let mut collected = Vec::new();
        for event in events {
            match event {
                FramerEvent::RawSegment { message_type, bytes, declared } => {
                    assert_eq!(message_type, MessageType::FirmwareUpload);
                    assert_eq!(declared, 150);
                    collected.extend_from_slice(&bytes);
                }
                other => unreachable!("unexpected event {other:?}"),
            }
        }
        assert_eq!(collected, payload);
        assert!(!framer.mid_message());
    }

    proptest! {
        /// Segmenting then reassembling returns the original payload.
        #[test]
        fn segment_reassemble_round_trip(payload in prop::collection::vec(any::<u8>(), 0..4096)) {
            let mut framer = Framer::new();
            let packets = Framer::segment(MessageType::TxAck.to_u16(), &payload).unwrap();
            let mut events = Vec::new();
            for packet in &packets {
                if let Some(event) = framer.push(packet.as_bytes()) {
                    events.push(event);
                }
            }
            prop_assert_eq!(events.len(), 1);
            match &events[0] {
                FramerEvent::Message { payload: got, .. } => prop_assert_eq!(got, &payload),
                other => prop_assert!(false, "unexpected event {:?}", other),
            }
        }

        /// Raw payloads survive segmentation as ordered segments.
        #[test]
        fn raw_round_trip(payload in prop::collection::vec(any::<u8>(), 1..4096)) {
            let mut framer = Framer::new();
            let packets =
                Framer::segment(MessageType::FirmwareUpload.to_u16(), &payload).unwrap();
            let mut collected = Vec::new();
            for packet in &packets {
                if let Some(FramerEvent::RawSegment { bytes, .. }) = framer.push(packet.as_bytes()) {
                    collected.extend_from_slice(&bytes);
                }
            }
            prop_assert_eq!(collected, payload);
        }
    }
}
