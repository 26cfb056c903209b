//! End-to-end wire properties: message -> packets -> framer -> message.

use coffer_proto::{
    messages::{device, keys, tx},
    Framer, FramerEvent, Message,
};
use proptest::prelude::*;

fn pump(message: &Message) -> Message {
    let packets = message.to_packets().expect("should segment");
    let mut framer = Framer::new();
    let mut out = None;
    for packet in &packets {
        if let Some(FramerEvent::Message { message_type, payload }) =
            framer.push(packet.as_bytes())
        {
            out = Some(Message::decode(message_type, &payload).expect("should decode"));
        }
    }
    out.expect("message should complete")
}

#[test]
fn initialize_survives_the_wire() {
    assert_eq!(pump(&Message::Initialize), Message::Initialize);
}

#[test]
fn large_sign_message_spans_many_packets() {
    let message = Message::SignMessage(keys::SignMessage {
        address_n: vec![0x8000_002C, 0x8000_0000, 0x8000_0000, 0, 0],
        message: vec![0x5A; 3000],
        coin_name: Some("Bitcoin".into()),
    });
    let packets = message.to_packets().expect("should segment");
    assert!(packets.len() > 40);
    assert_eq!(pump(&message), message);
}

proptest! {
    #[test]
    fn ping_survives_the_wire(
        text in proptest::option::of("[ -~]{0,200}"),
        button in proptest::option::of(any::<bool>()),
    ) {
        let message = Message::Ping(device::Ping {
            message: text,
            button_protection: button,
            pin_protection: None,
            passphrase_protection: None,
        });
        prop_assert_eq!(pump(&message), message);
    }

    #[test]
    fn tx_output_survives_the_wire(
        amount in any::<u64>(),
        address in proptest::option::of("[1-9A-HJ-NP-Za-km-z]{25,34}"),
        path in proptest::collection::vec(any::<u32>(), 0..6),
    ) {
        let message = Message::TxAck(tx::TxAck {
            tx: Some(tx::TransactionType {
                inputs: vec![],
                outputs: vec![tx::TxOutput {
                    address,
                    address_n: path,
                    amount,
                    script_type: Some(tx::OutputScriptType::PayToAddress),
                    address_type: None,
                    op_return_data: None,
                    exchange_type: None,
                }],
            }),
        });
        prop_assert_eq!(pump(&message), message);
    }
}
