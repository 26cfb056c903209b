//! Ethereum signing engine.
//!
//! The transaction is hashed as it streams: the RLP list header and the
//! scalar fields go into the Keccak context up front, then the data field
//! arrives in `EthereumTxAck` chunks until the declared length is
//! consumed. The finished digest is signed with a recoverable signature
//! and EIP-155 replay protection when a chain id is present.

use coffer_crypto::{address, ecdsa, rlp, HdNode};
use coffer_proto::{
    messages::{
        device::ButtonRequestType,
        ethereum::{EthereumSignTx, EthereumTxRequest},
        tx::OutputAddressType,
    },
    FailureCode, Message,
};
use sha3::{Digest, Keccak256};

use super::exchange;
use crate::device::{ConfirmGate, Interrupt};

/// Streaming chunk size requested from the host.
const DATA_CHUNK: u32 = 1024;

/// Upper bound on the data field, far below the RLP length limit.
const MAX_DATA_LEN: u32 = 16_000_000;

/// Wei per ether, for display.
const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;

/// The Ethereum signing state machine, alive while data chunks stream.
pub struct EthereumSigner {
    keccak: Keccak256,
    data_left: u32,
    chain_id: u32,
    node: HdNode,
}

fn parse_u128(bytes: &[u8], what: &'static str) -> Result<u128, Interrupt> {
    if bytes.len() > 16 {
        return Err(Interrupt::other(format!("{what} too large")));
    }
    let mut out = 0u128;
    for &b in bytes {
        out = (out << 8) | u128::from(b);
    }
    Ok(out)
}

fn format_ether(wei: u128) -> String {
    let whole = wei / WEI_PER_ETH;
    let frac = (wei % WEI_PER_ETH) / (WEI_PER_ETH / 1_000_000);
    if frac == 0 {
        format!("{whole} ETH")
    } else {
        let mut frac_str = format!("{frac:06}");
        while frac_str.ends_with('0') {
            frac_str.pop();
        }
        format!("{whole}.{frac_str} ETH")
    }
}

impl EthereumSigner {
    /// Validate, confirm and begin hashing an `EthereumSignTx`.
    ///
    /// Returns the signer (when data chunks remain) and the reply to send:
    /// either a request for more data or the finished signature.
    pub fn start(
        gate: &mut dyn ConfirmGate,
        msg: &EthereumSignTx,
        root: &HdNode,
        exchange_enabled: bool,
    ) -> Result<(Option<Self>, Message), Interrupt> {
        let mut node = root.clone();
        if node.derive_path(&msg.address_n).is_err() {
            return Err(Interrupt::other("Failed to derive private key"));
        }

        if msg.nonce.len() > 32 || msg.gas_price.len() > 32 || msg.gas_limit.len() > 32 {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "Scalar field too long"));
        }
        let to = match msg.to.as_deref() {
            None => &[][..],
            Some(bytes) if bytes.len() == 20 || bytes.is_empty() => bytes,
            Some(_) => {
                return Err(Interrupt::failed(FailureCode::SyntaxError, "Address has wrong length"))
            }
        };

        let data_total = msg.data_length.unwrap_or(0);
        let initial = msg.data_initial_chunk.as_deref().unwrap_or(&[]);
        if data_total > MAX_DATA_LEN {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "Data length exceeds limit"));
        }
        if data_total > 0 && initial.is_empty() {
            return Err(Interrupt::other("Data length provided, but no initial chunk"));
        }
        if initial.len() as u32 > data_total {
            return Err(Interrupt::other("Invalid size of initial chunk"));
        }
        if to.is_empty() && data_total == 0 {
            // Contract creation without code is never meaningful.
            return Err(Interrupt::other("Contract creation without data"));
        }

        let value = parse_u128(&msg.value, "Value")?;
        let chain_id = msg.chain_id.unwrap_or(0);

        // Consent, in a fixed order so parked replays line up.
        let mut effective_to = to.to_vec();
        match msg.address_type {
            Some(OutputAddressType::Transfer) => {
                if !to.is_empty() {
                    return Err(Interrupt::other("Transfer must not carry a destination"));
                }
                let mut target = root.clone();
                if target.derive_path(&msg.to_address_n).is_err() {
                    return Err(Interrupt::other("Failed to derive transfer target"));
                }
                let raw = address::ethereum_pubkeyhash(&target.public_key)
                    .map_err(|_| Interrupt::other("Failed to derive transfer target"))?;
                let account = msg
                    .to_address_n
                    .get(2)
                    .map_or(0, |a| a & !crate::HARDENED);
                gate.confirm(
                    ButtonRequestType::ConfirmTransferToAccount,
                    "Transfer",
                    &format!("Transfer {} to account #{account}?", format_ether(value)),
                )?;
                effective_to = raw.to_vec();
            }
            Some(OutputAddressType::Exchange) => {
                let Some(contract) = &msg.exchange_type else {
                    return Err(Interrupt::failed(
                        FailureCode::SyntaxError,
                        "Exchange transaction without contract",
                    ));
                };
                if !exchange_enabled {
                    return Err(Interrupt::other("ShapeShift policy not enabled"));
                }
                let to_fixed: [u8; 20] = effective_to
                    .as_slice()
                    .try_into()
                    .map_err(|_| Interrupt::other("Exchange needs a destination"))?;
                let summary =
                    exchange::validate_ethereum(contract, &to_fixed, &msg.value, root)
                        .map_err(|e| Interrupt::other(format!("Exchange contract invalid: {e}")))?;
                gate.confirm(
                    ButtonRequestType::ConfirmExchange,
                    "Confirm Exchange",
                    &summary.text,
                )?;
            }
            _ => {
                let shown = if effective_to.is_empty() {
                    "new contract".to_owned()
                } else {
                    let mut raw = [0u8; 20];
                    raw.copy_from_slice(&effective_to);
                    address::eip55(&raw)
                };
                gate.confirm(
                    ButtonRequestType::ConfirmOutput,
                    "Send",
                    &format!("Send {} to {shown}?", format_ether(value)),
                )?;
            }
        }

        if data_total > 0 {
            gate.review(
                ButtonRequestType::Other,
                "Warning",
                "Signing of arbitrary contract data is recommended only for experienced users",
            )?;
            gate.confirm(
                ButtonRequestType::ConfirmOutput,
                "Confirm Data",
                &format!("Sign {data_total} bytes of contract data?"),
            )?;
        }

        let gas_price = parse_u128(&msg.gas_price, "Gas price")?;
        let gas_limit = parse_u128(&msg.gas_limit, "Gas limit")?;
        let max_fee = gas_price
            .checked_mul(gas_limit)
            .ok_or_else(|| Interrupt::other("Fee overflow"))?;
        gate.confirm(
            ButtonRequestType::SignTx,
            "Transaction",
            &format!(
                "Send {} from your wallet, paying up to {} for gas?",
                format_ether(value),
                format_ether(max_fee)
            ),
        )?;

        // Everything confirmed; start the streaming hash.
        let mut payload_len = rlp::scalar_encoded_len(&msg.nonce)
            + rlp::scalar_encoded_len(&msg.gas_price)
            + rlp::scalar_encoded_len(&msg.gas_limit)
            + rlp::string_encoded_len(effective_to.len(), effective_to.first().copied())
            + rlp::scalar_encoded_len(&msg.value)
            + rlp::string_encoded_len(data_total as usize, initial.first().copied());
        if chain_id != 0 {
            payload_len += rlp::encode_u64(u64::from(chain_id)).len() + 2;
        }

        let mut keccak = Keccak256::new();
        Digest::update(&mut keccak, rlp::list_header(payload_len));
        Digest::update(&mut keccak, rlp::encode_scalar(&msg.nonce));
        Digest::update(&mut keccak, rlp::encode_scalar(&msg.gas_price));
        Digest::update(&mut keccak, rlp::encode_scalar(&msg.gas_limit));
        Digest::update(&mut keccak, rlp::encode_string(&effective_to));
        Digest::update(&mut keccak, rlp::encode_scalar(&msg.value));
        if data_total == 0 {
            Digest::update(&mut keccak, rlp::encode_string(&[]));
        } else if data_total == 1 && initial[0] < 0x80 {
            Digest::update(&mut keccak, initial);
        } else {
            Digest::update(&mut keccak, rlp::string_header(data_total as usize));
            Digest::update(&mut keccak, initial);
        }

        let mut signer =
            Self { keccak, data_left: data_total - initial.len() as u32, chain_id, node };
        if signer.data_left > 0 {
            let want = signer.data_left.min(DATA_CHUNK);
            let reply = Message::EthereumTxRequest(EthereumTxRequest {
                data_length: Some(want),
                ..Default::default()
            });
            Ok((Some(signer), reply))
        } else {
            let reply = signer.finish()?;
            Ok((None, reply))
        }
    }

    /// Feed one streamed data chunk.
    pub fn data_ack(&mut self, chunk: &[u8]) -> Result<(bool, Message), Interrupt> {
        if chunk.is_empty() || chunk.len() as u32 > self.data_left {
            return Err(Interrupt::other("Invalid data chunk size"));
        }
        Digest::update(&mut self.keccak, chunk);
        self.data_left -= chunk.len() as u32;

        if self.data_left > 0 {
            let want = self.data_left.min(DATA_CHUNK);
            Ok((
                false,
                Message::EthereumTxRequest(EthereumTxRequest {
                    data_length: Some(want),
                    ..Default::default()
                }),
            ))
        } else {
            Ok((true, self.finish()?))
        }
    }

    fn finish(&mut self) -> Result<Message, Interrupt> {
        if self.chain_id != 0 {
            Digest::update(&mut self.keccak, rlp::encode_u64(u64::from(self.chain_id)));
            Digest::update(&mut self.keccak, [0x80]);
            Digest::update(&mut self.keccak, [0x80]);
        }
        let digest: [u8; 32] = std::mem::take(&mut self.keccak).finalize().into();

        let (signature, recovery) = ecdsa::sign_recoverable(self.node.private_key(), &digest)
            .map_err(|_| Interrupt::other("Signing failed"))?;
        let v = if self.chain_id == 0 {
            27 + u32::from(recovery)
        } else {
            2 * self.chain_id + 35 + u32::from(recovery)
        };
        let bytes = signature.to_bytes();
        tracing::debug!(chain_id = self.chain_id, v, "ethereum transaction signed");
        Ok(Message::EthereumTxRequest(EthereumTxRequest {
            data_length: None,
            signature_v: Some(v),
            signature_r: Some(bytes[..32].to_vec()),
            signature_s: Some(bytes[32..].to_vec()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use coffer_proto::messages::ethereum::EthereumSignTx;

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
        HdNode::from_seed(&[3u8; 64]).unwrap()
    }

    fn simple_tx() -> EthereumSignTx {
        EthereumSignTx {
            address_n: vec![44 | HARDENED, 60 | HARDENED, HARDENED, 0, 0],
            nonce: vec![0x09],
            gas_price: vec![0x04, 0xA8, 0x17, 0xC8, 0x00],
            gas_limit: vec![0x52, 0x08],
            to: Some(vec![0x35; 20]),
            value: vec![0x0D, 0xE0, 0xB6, 0xB3, 0xA7, 0x64, 0x00, 0x00],
            chain_id: Some(1),
            ..Default::default()
        }
    }

    fn extract_vrs(message: &Message) -> (u32, Vec<u8>, Vec<u8>) {
        match message {
            Message::EthereumTxRequest(req) => (
                req.signature_v.unwrap(),
                req.signature_r.clone().unwrap(),
                req.signature_s.clone().unwrap(),
            ),
            other => unreachable!("expected EthereumTxRequest, got {other:?}"),
        }
    }

    #[test]
    fn simple_transfer_signs_in_one_round() {
        let (signer, reply) =
            EthereumSigner::start(&mut YesGate, &simple_tx(), &root(), false).unwrap();
        assert!(signer.is_none());
        let (v, r, s) = extract_vrs(&reply);
        // EIP-155 on mainnet: v is 37 or 38.
        assert!(v == 37 || v == 38);
        assert_eq!(r.len(), 32);
        assert_eq!(s.len(), 32);
    }

    #[test]
    fn legacy_v_without_chain_id() {
        let mut tx = simple_tx();
        tx.chain_id = None;
        let (_, reply) = EthereumSigner::start(&mut YesGate, &tx, &root(), false).unwrap();
        let (v, _, _) = extract_vrs(&reply);
        assert!(v == 27 || v == 28);
    }

    #[test]
    fn data_streams_in_chunks() {
        let mut tx = simple_tx();
        let data = vec![0xCD; 3000];
        tx.data_length = Some(3000);
        tx.data_initial_chunk = Some(data[..1000].to_vec());

        let (signer, reply) =
            EthereumSigner::start(&mut YesGate, &tx, &root(), false).unwrap();
        let mut signer = signer.unwrap();
        match &reply {
            Message::EthereumTxRequest(req) => assert_eq!(req.data_length, Some(1024)),
            other => unreachable!("unexpected {other:?}"),
        }

        let (done, _) = signer.data_ack(&data[1000..2024]).unwrap();
        assert!(!done);
        let (done, reply) = signer.data_ack(&data[2024..]).unwrap();
        assert!(done);
        let (v, _, _) = extract_vrs(&reply);
        assert!(v == 37 || v == 38);
    }

    #[test]
    fn streamed_and_oneshot_hashes_agree() {
        // Same transaction with data delivered in one chunk vs. three must
        // produce the same signature.
        let data = vec![0xEE; 2000];

        let mut oneshot = simple_tx();
        oneshot.data_length = Some(2000);
        oneshot.data_initial_chunk = Some(data.clone());
        let (none, reply_a) =
            EthereumSigner::start(&mut YesGate, &oneshot, &root(), false).unwrap();
        assert!(none.is_none());

        let mut streamed = simple_tx();
        streamed.data_length = Some(2000);
        streamed.data_initial_chunk = Some(data[..500].to_vec());
        let (signer, _) =
            EthereumSigner::start(&mut YesGate, &streamed, &root(), false).unwrap();
        let mut signer = signer.unwrap();
        let (_, _ignored) = signer.data_ack(&data[500..1500]).unwrap();
        let (done, reply_b) = signer.data_ack(&data[1500..]).unwrap();
        assert!(done);

        assert_eq!(extract_vrs(&reply_a), extract_vrs(&reply_b));
    }

    #[test]
    fn oversize_chunk_rejected() {
        let mut tx = simple_tx();
        tx.data_length = Some(100);
        tx.data_initial_chunk = Some(vec![0u8; 50]);
        let (signer, _) = EthereumSigner::start(&mut YesGate, &tx, &root(), false).unwrap();
        let mut signer = signer.unwrap();
        assert!(signer.data_ack(&[0u8; 51]).is_err());
    }

    #[test]
    fn contract_creation_requires_data() {
        let mut tx = simple_tx();
        tx.to = None;
        assert!(EthereumSigner::start(&mut YesGate, &tx, &root(), false).is_err());
    }

    #[test]
    fn transfer_to_own_account() {
        let mut tx = simple_tx();
        tx.to = None;
        tx.address_type = Some(OutputAddressType::Transfer);
        tx.to_address_n = vec![44 | HARDENED, 60 | HARDENED, 1 | HARDENED, 0, 0];
        let (signer, reply) =
            EthereumSigner::start(&mut YesGate, &tx, &root(), false).unwrap();
        assert!(signer.is_none());
        let (v, _, _) = extract_vrs(&reply);
        assert!(v == 37 || v == 38);
    }
}
