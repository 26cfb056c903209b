//! Cosmos signing engine.
//!
//! Cosmos signs the SHA-256 of a canonical JSON sign-doc. The document
//! streams through the hash as messages arrive, with user-controlled
//! fields escaped, so the device never holds the whole document.

use coffer_crypto::{address, ecdsa, HdNode};
use coffer_proto::{
    messages::{
        cosmos::{CosmosMsgSend, CosmosSignTx, CosmosSignedTx, CosmosTxRequest},
        device::ButtonRequestType,
    },
    FailureCode, Message,
};
use sha2::{Digest, Sha256};

use crate::device::{ConfirmGate, Interrupt};

/// Bech32 prefix of Cosmos Hub accounts.
const ACCOUNT_HRP: &str = "cosmos";

/// Default denomination.
const DEFAULT_DENOM: &str = "uatom";

/// Micro-units per ATOM, for display.
const UATOM_PER_ATOM: u64 = 1_000_000;

/// The Cosmos signing state machine.
pub struct CosmosSigner {
    sha: Sha256,
    msgs_left: u32,
    first_msg: bool,
    node: HdNode,
    own_address: String,
    sequence: u64,
}

/// Escape a string for embedding in the canonical JSON document.
fn escape_json(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

fn format_atom(uatom: u64) -> String {
    let whole = uatom / UATOM_PER_ATOM;
    let frac = uatom % UATOM_PER_ATOM;
    if frac == 0 {
        format!("{whole} ATOM")
    } else {
        let mut frac_str = format!("{frac:06}");
        while frac_str.ends_with('0') {
            frac_str.pop();
        }
        format!("{whole}.{frac_str} ATOM")
    }
}

impl CosmosSigner {
    /// Validate, confirm the fee, and begin hashing the sign-doc.
    pub fn start(
        gate: &mut dyn ConfirmGate,
        msg: &CosmosSignTx,
        root: &HdNode,
    ) -> Result<(Self, Message), Interrupt> {
        if msg.msg_count < 1 {
            return Err(Interrupt::other("Transaction must have at least one message"));
        }

        let mut node = root.clone();
        if node.derive_path(&msg.address_n).is_err() {
            return Err(Interrupt::other("Failed to derive private key"));
        }
        let own_address = address::cosmos(ACCOUNT_HRP, &node.public_key)
            .map_err(|_| Interrupt::other("Failed to encode account address"))?;

        gate.confirm(
            ButtonRequestType::SignTx,
            "Cosmos Transaction",
            &format!(
                "Sign transaction on {} paying up to {} in fees?",
                msg.chain_id,
                format_atom(msg.fee_amount)
            ),
        )?;

        let mut sha = Sha256::new();
        let memo = escape_json(msg.memo.as_deref().unwrap_or(""));
        Digest::update(
            &mut sha,
            format!(
                "{{\"account_number\":\"{}\",\"chain_id\":\"{}\",\"fee\":{{\"amount\":[{{\"amount\":\"{}\",\"denom\":\"{DEFAULT_DENOM}\"}}],\"gas\":\"{}\"}},\"memo\":\"{memo}\",\"msgs\":[",
                msg.account_number,
                escape_json(&msg.chain_id),
                msg.fee_amount,
                msg.gas,
            )
            .as_bytes(),
        );

        let signer = Self {
            sha,
            msgs_left: msg.msg_count,
            first_msg: true,
            node,
            own_address,
            sequence: msg.sequence,
        };
        Ok((signer, Message::CosmosTxRequest(CosmosTxRequest {})))
    }

    /// Feed one `MsgSend`, confirming it with the user.
    pub fn msg_ack(
        &mut self,
        gate: &mut dyn ConfirmGate,
        send: &CosmosMsgSend,
    ) -> Result<(bool, Message), Interrupt> {
        if self.msgs_left == 0 {
            return Err(Interrupt::failed(
                FailureCode::UnexpectedMessage,
                "All messages already received",
            ));
        }
        if send.from_address != self.own_address {
            return Err(Interrupt::other("Sender address is not ours"));
        }
        let denom = send.denom.as_deref().unwrap_or(DEFAULT_DENOM);
        if denom != DEFAULT_DENOM {
            return Err(Interrupt::other("Unsupported denomination"));
        }

        gate.confirm(
            ButtonRequestType::ConfirmOutput,
            "Confirm Send",
            &format!("Send {} to {}?", format_atom(send.amount), send.to_address),
        )?;

        if !self.first_msg {
            Digest::update(&mut self.sha, b",");
        }
        self.first_msg = false;
        Digest::update(
            &mut self.sha,
            format!(
                "{{\"type\":\"cosmos-sdk/MsgSend\",\"value\":{{\"amount\":[{{\"amount\":\"{}\",\"denom\":\"{denom}\"}}],\"from_address\":\"{}\",\"to_address\":\"{}\"}}}}",
                send.amount,
                escape_json(&send.from_address),
                escape_json(&send.to_address),
            )
            .as_bytes(),
        );

        self.msgs_left -= 1;
        if self.msgs_left > 0 {
            Ok((false, Message::CosmosTxRequest(CosmosTxRequest {})))
        } else {
            Ok((true, self.finish()?))
        }
    }

    fn finish(&mut self) -> Result<Message, Interrupt> {
        Digest::update(&mut self.sha, format!("],\"sequence\":\"{}\"}}", self.sequence).as_bytes());
        let digest: [u8; 32] = std::mem::take(&mut self.sha).finalize().into();
        let signature = ecdsa::sign_compact(self.node.private_key(), &digest)
            .map_err(|_| Interrupt::other("Signing failed"))?;
        tracing::debug!("cosmos transaction signed");
        Ok(Message::CosmosSignedTx(CosmosSignedTx {
            signature: signature.to_vec(),
            public_key: self.node.public_key.to_vec(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HARDENED;

    struct YesGate;

    impl ConfirmGate for YesGate {
        fn confirm(
            &mut self,
            _kind: ButtonRequestType,
            _title: &str,
            _body: &str,
        ) -> Result<(), Interrupt> {
            Ok(())
        }

        fn review(
            &mut self,
            _kind: ButtonRequestType,
            _title: &str,
            _body: &str,
        ) -> Result<(), Interrupt> {
            Ok(())
        }
    }

    fn root() -> HdNode {
        HdNode::from_seed(&[6u8; 64]).unwrap()
    }

    fn sign_tx(msg_count: u32) -> CosmosSignTx {
        CosmosSignTx {
            address_n: vec![44 | HARDENED, 118 | HARDENED, HARDENED, 0, 0],
            account_number: 24,
            chain_id: "cosmoshub-4".into(),
            fee_amount: 5000,
            gas: 200_000,
            memo: Some("lunch".into()),
            sequence: 3,
            msg_count,
        }
    }

    fn own_address() -> String {
        let mut node = root();
        node.derive_path(&[44 | HARDENED, 118 | HARDENED, HARDENED, 0, 0]).unwrap();
        address::cosmos(ACCOUNT_HRP, &node.public_key).unwrap()
    }

    fn send(amount: u64) -> CosmosMsgSend {
        CosmosMsgSend {
            from_address: own_address(),
            to_address: "cosmos1qperwt9wrnkg5k9e5gzfgjppzpqhyav5j24d66".into(),
            amount,
            denom: None,
        }
    }

    #[test]
    fn single_message_produces_signature() {
        let (mut signer, _) = CosmosSigner::start(&mut YesGate, &sign_tx(1), &root()).unwrap();
        let (done, reply) = signer.msg_ack(&mut YesGate, &send(1_000_000)).unwrap();
        assert!(done);
        match reply {
            Message::CosmosSignedTx(signed) => {
                assert_eq!(signed.signature.len(), 64);
                assert_eq!(signed.public_key.len(), 33);
            }
            other => unreachable!("unexpected {other:?}"),
        }
    }

    #[test]
    fn two_messages_request_in_between() {
        let (mut signer, first) = CosmosSigner::start(&mut YesGate, &sign_tx(2), &root()).unwrap();
        assert!(matches!(first, Message::CosmosTxRequest(_)));
        let (done, mid) = signer.msg_ack(&mut YesGate, &send(1)).unwrap();
        assert!(!done);
        assert!(matches!(mid, Message::CosmosTxRequest(_)));
        let (done, _) = signer.msg_ack(&mut YesGate, &send(2)).unwrap();
        assert!(done);
    }

    #[test]
    fn foreign_sender_rejected() {
        let (mut signer, _) = CosmosSigner::start(&mut YesGate, &sign_tx(1), &root()).unwrap();
        let mut bad = send(5);
        bad.from_address = "cosmos1notmyaddress".into();
        assert!(signer.msg_ack(&mut YesGate, &bad).is_err());
    }

    #[test]
    fn signature_is_deterministic_over_doc() {
        let run = || {
            let (mut signer, _) =
                CosmosSigner::start(&mut YesGate, &sign_tx(1), &root()).unwrap();
            let (_, reply) = signer.msg_ack(&mut YesGate, &send(42)).unwrap();
            match reply {
                Message::CosmosSignedTx(signed) => signed.signature,
                other => unreachable!("unexpected {other:?}"),
            }
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn json_escaping() {
        assert_eq!(escape_json("plain"), "plain");
        assert_eq!(escape_json("a\"b"), "a\\\"b");
        assert_eq!(escape_json("a\\b"), "a\\\\b");
        assert_eq!(escape_json("a\nb"), "a\\nb");
        assert_eq!(escape_json("\u{01}"), "\\u0001");
    }
}
