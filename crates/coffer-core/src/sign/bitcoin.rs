//! Bitcoin-family interactive signing engine.
//!
//! The transaction never exists in device RAM. The host streams it twice:
//!
//! ```text
//! INIT -> REQUEST_INPUT(0..n)  first pass: commit prevouts, amounts, paths
//!      -> REQUEST_OUTPUT(0..m) confirm non-change outputs, build the
//!                              serialized output image
//!      -> finalize             fee check, final consent, sighash material
//!      -> REQUEST_INPUT(0..n)  second pass: derive, sign, return sig+pubkey
//!      -> TXFINISHED | FAILED
//! ```
//!
//! A streaming SHA-256 commitment covers every field of every input in
//! pass one; pass two recomputes it over the re-fetched inputs and the
//! engine refuses to finish when they differ, so the host cannot swap
//! inputs between the passes.

use coffer_crypto::{address, ecdsa, HdNode};
use coffer_proto::{
    messages::{
        device::ButtonRequestType,
        keys::InputScriptType,
        tx::{
            OutputAddressType, OutputScriptType, RequestType, SignTx, TransactionType, TxInput,
            TxOutput, TxRequest, TxRequestDetails, TxRequestSerialized,
        },
    },
    FailureCode, Message,
};
use sha2::{Digest, Sha256};

use super::{exchange, push_varint};
use crate::{
    coins::{self, CoinDef, MAX_MONEY},
    device::{ConfirmGate, Interrupt},
    HARDENED,
};

const SIGHASH_ALL: u32 = 1;

/// Default input sequence number.
const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    CollectInputs(u32),
    CollectOutputs(u32),
    SignInputs(u32),
    Done,
}

struct InputCommit {
    prev_hash: [u8; 32],
    prev_index: u32,
    sequence: u32,
    amount: u64,
}

struct AnalyzedOutput {
    script_pubkey: Vec<u8>,
    is_change: bool,
    confirm_body: Option<String>,
    exchange_text: Option<String>,
}

/// The Bitcoin-family signing state machine.
pub struct BitcoinSigner {
    coin: &'static CoinDef,
    root: HdNode,
    version: u32,
    lock_time: u32,
    inputs_count: u32,
    outputs_count: u32,
    exchange_enabled: bool,
    phase: Phase,
    commits: Vec<InputCommit>,
    /// Outputs already folded into the running totals; guards consent
    /// replays against double-counting.
    outputs_done: u32,
    outputs_ser: Vec<u8>,
    total_in: u64,
    total_out: u64,
    change_total: u64,
    first_input_path: Vec<u32>,
    pass_hash: Sha256,
    pass1_digest: Option<[u8; 32]>,
    hash_prevouts: [u8; 32],
    hash_sequence: [u8; 32],
    hash_outputs: [u8; 32],
}

impl BitcoinSigner {
    /// Validate a `SignTx` and produce the engine plus its first request.
    pub fn start(
        msg: &SignTx,
        coin: &'static CoinDef,
        root: HdNode,
        exchange_enabled: bool,
    ) -> Result<(Self, Message), Interrupt> {
        if msg.inputs_count < 1 {
            return Err(Interrupt::other("Transaction must have at least one input"));
        }
        if msg.outputs_count < 1 {
            return Err(Interrupt::other("Transaction must have at least one output"));
        }
        if msg.inputs_count.checked_add(msg.outputs_count).is_none() {
            return Err(Interrupt::other("Transaction item count overflow"));
        }

        let signer = Self {
            coin,
            root,
            version: msg.version.unwrap_or(1),
            lock_time: msg.lock_time.unwrap_or(0),
            inputs_count: msg.inputs_count,
            outputs_count: msg.outputs_count,
            exchange_enabled,
            phase: Phase::CollectInputs(0),
            commits: Vec::with_capacity(msg.inputs_count as usize),
            outputs_done: 0,
            outputs_ser: Vec::new(),
            total_in: 0,
            total_out: 0,
            change_total: 0,
            first_input_path: Vec::new(),
            pass_hash: Sha256::new(),
            pass1_digest: None,
            hash_prevouts: [0; 32],
            hash_sequence: [0; 32],
            hash_outputs: [0; 32],
        };
        let request = request_item(RequestType::TxInput, 0, None);
        Ok((signer, request))
    }

    /// True once `TXFINISHED` has been sent.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Feed one `TxAck` through the state machine.
    ///
    /// Confirmation requests surface as `Interrupt::Pending`; the
    /// dispatcher re-delivers the same ack once the user consents, and the
    /// engine re-runs it without having advanced.
    pub fn tx_ack(
        &mut self,
        gate: &mut dyn ConfirmGate,
        tx: &TransactionType,
    ) -> Result<Message, Interrupt> {
        match self.phase {
            Phase::CollectInputs(index) => self.collect_input(index, tx),
            Phase::CollectOutputs(index) => self.collect_output(gate, index, tx),
            Phase::SignInputs(index) => self.sign_input(index, tx),
            Phase::Done => Err(Interrupt::failed(
                FailureCode::UnexpectedMessage,
                "Signing already finished",
            )),
        }
    }

    fn collect_input(&mut self, index: u32, tx: &TransactionType) -> Result<Message, Interrupt> {
        let input = parse_input(tx)?;
        commit_input(&mut self.pass_hash, &input);

        self.total_in = self
            .total_in
            .checked_add(input.amount)
            .ok_or_else(|| Interrupt::other("Input value overflow"))?;
        if index == 0 {
            self.first_input_path = input.address_n.clone();
        }
        self.commits.push(InputCommit {
            prev_hash: input.prev_hash,
            prev_index: input.prev_index,
            sequence: input.sequence,
            amount: input.amount,
        });

        let next = index + 1;
        if next < self.inputs_count {
            self.phase = Phase::CollectInputs(next);
            Ok(request_item(RequestType::TxInput, next, None))
        } else {
            self.pass1_digest = Some(std::mem::take(&mut self.pass_hash).finalize().into());
            self.phase = Phase::CollectOutputs(0);
            Ok(request_item(RequestType::TxOutput, 0, None))
        }
    }

    fn collect_output(
        &mut self,
        gate: &mut dyn ConfirmGate,
        index: u32,
        tx: &TransactionType,
    ) -> Result<Message, Interrupt> {
        let output = tx
            .outputs
            .first()
            .ok_or_else(|| Interrupt::failed(FailureCode::SyntaxError, "No output provided"))?;

        if output.amount > MAX_MONEY {
            return Err(Interrupt::failed(
                FailureCode::NotEnoughFunds,
                "Output amount above maximum",
            ));
        }

        let analyzed = self.analyze_output(output)?;

        // Consent before any state advances; a parked replay re-enters
        // here with the grant already recorded.
        if let Some(text) = &analyzed.exchange_text {
            gate.confirm(ButtonRequestType::ConfirmExchange, "Confirm Exchange", text)?;
        } else if let Some(body) = &analyzed.confirm_body {
            gate.confirm(ButtonRequestType::ConfirmOutput, "Confirm Output", body)?;
        }

        // A replayed ack must not double-count the output it already
        // serialized before parking on a later confirmation.
        if self.outputs_done == index {
            self.total_out = self
                .total_out
                .checked_add(output.amount)
                .ok_or_else(|| Interrupt::other("Output value overflow"))?;
            if analyzed.is_change {
                self.change_total += output.amount;
            }
            self.outputs_ser.extend_from_slice(&output.amount.to_le_bytes());
            push_varint(&mut self.outputs_ser, analyzed.script_pubkey.len() as u64);
            self.outputs_ser.extend_from_slice(&analyzed.script_pubkey);
            self.outputs_done = index + 1;
        }

        let next = index + 1;
        if next < self.outputs_count {
            self.phase = Phase::CollectOutputs(next);
            Ok(request_item(RequestType::TxOutput, next, None))
        } else {
            self.finalize_outputs(gate)
        }
    }

    fn finalize_outputs(&mut self, gate: &mut dyn ConfirmGate) -> Result<Message, Interrupt> {
        if self.total_out > self.total_in {
            return Err(Interrupt::failed(FailureCode::NotEnoughFunds, "Not enough funds"));
        }
        let fee = self.total_in - self.total_out;

        let estimated_kb =
            u64::from(coins::estimate_tx_size(self.inputs_count, self.outputs_count))
                .div_ceil(1000);
        if fee > self.coin.maxfee_kb.saturating_mul(estimated_kb.max(1)) {
            gate.confirm(
                ButtonRequestType::FeeOverThreshold,
                "High Fee",
                &format!("Fee of {} is unusually high. Continue?", self.coin.format_amount(fee)),
            )?;
        }

        let spending = self.total_out - self.change_total;
        gate.confirm(
            ButtonRequestType::SignTx,
            "Sign Transaction",
            &format!(
                "Really send {} with {} fee?",
                self.coin.format_amount(spending),
                self.coin.format_amount(fee)
            ),
        )?;

        // Sighash material for both legacy and witness paths.
        let mut prevouts = Vec::with_capacity(self.commits.len() * 36);
        let mut sequences = Vec::with_capacity(self.commits.len() * 4);
        for commit in &self.commits {
            prevouts.extend_from_slice(&commit.prev_hash);
            prevouts.extend_from_slice(&commit.prev_index.to_le_bytes());
            sequences.extend_from_slice(&commit.sequence.to_le_bytes());
        }
        self.hash_prevouts = address::sha256d(&prevouts);
        self.hash_sequence = address::sha256d(&sequences);
        self.hash_outputs = address::sha256d(&self.outputs_ser);

        self.pass_hash = Sha256::new();
        self.phase = Phase::SignInputs(0);
        tracing::debug!(
            total_in = self.total_in,
            total_out = self.total_out,
            fee,
            "outputs confirmed, signing pass begins"
        );
        Ok(request_item(RequestType::TxInput, 0, None))
    }

    fn sign_input(&mut self, index: u32, tx: &TransactionType) -> Result<Message, Interrupt> {
        let input = parse_input(tx)?;
        commit_input(&mut self.pass_hash, &input);

        let commit = &self.commits[index as usize];
        if commit.prev_hash != input.prev_hash || commit.amount != input.amount {
            return Err(Interrupt::other("Transaction has changed during signing"));
        }

        let mut node = self.root.clone();
        if node.derive_path(&input.address_n).is_err() {
            return Err(Interrupt::other("Failed to derive private key"));
        }

        let script_code = self.script_code(&input, &node)?;
        let digest = match input.script_type {
            InputScriptType::SpendAddress | InputScriptType::SpendMultisig => {
                self.legacy_sighash(index, &script_code)
            }
            InputScriptType::SpendWitness | InputScriptType::SpendP2ShWitness => {
                self.witness_sighash(commit, &script_code)
            }
        };

        let signature = ecdsa::sign_der(node.private_key(), &digest)
            .map_err(|_| Interrupt::other("Signing failed"))?;
        let serialized = TxRequestSerialized {
            signature_index: Some(index),
            signature: Some(signature),
            pubkey: Some(node.public_key.to_vec()),
        };

        let next = index + 1;
        if next < self.inputs_count {
            self.phase = Phase::SignInputs(next);
            Ok(request_item(RequestType::TxInput, next, Some(serialized)))
        } else {
            let pass2: [u8; 32] = std::mem::take(&mut self.pass_hash).finalize().into();
            if Some(pass2) != self.pass1_digest {
                return Err(Interrupt::other("Transaction has changed during signing"));
            }
            self.phase = Phase::Done;
            Ok(Message::TxRequest(TxRequest {
                request: Some(RequestType::TxFinished),
                details: None,
                serialized: Some(serialized),
            }))
        }
    }

    fn analyze_output(&self, output: &TxOutput) -> Result<AnalyzedOutput, Interrupt> {
        // OP_RETURN carries data, never value.
        if output.script_type == Some(OutputScriptType::PayToOpReturn) {
            let data = output.op_return_data.clone().unwrap_or_default();
            if output.amount != 0 {
                return Err(Interrupt::other("OP_RETURN output with nonzero amount"));
            }
            let mut script = vec![0x6A];
            push_varint(&mut script, data.len() as u64);
            script.extend_from_slice(&data);
            return Ok(AnalyzedOutput {
                script_pubkey: script,
                is_change: false,
                confirm_body: Some(format!("OP_RETURN: {}", hex::encode(&data))),
                exchange_text: None,
            });
        }

        // Exchange contract attached to the output.
        if output.address_type == Some(OutputAddressType::Exchange) {
            let Some(contract) = &output.exchange_type else {
                return Err(Interrupt::failed(
                    FailureCode::SyntaxError,
                    "Exchange output without contract",
                ));
            };
            if !self.exchange_enabled {
                return Err(Interrupt::other("ShapeShift policy not enabled"));
            }
            let summary = exchange::validate(contract, output, self.coin, &self.root)
                .map_err(|e| Interrupt::other(format!("Exchange contract invalid: {e}")))?;
            let script = self.script_for_address(
                output.address.as_deref().unwrap_or_default(),
            )?;
            return Ok(AnalyzedOutput {
                script_pubkey: script,
                is_change: false,
                confirm_body: None,
                exchange_text: Some(summary.text),
            });
        }

        // Outputs with a path either belong to our change branch or get
        // shown with their derived address.
        if !output.address_n.is_empty() {
            let mut node = self.root.clone();
            if node.derive_path(&output.address_n).is_err() {
                return Err(Interrupt::other("Failed to derive output key"));
            }
            let script = self.script_for_own_key(&node, output.script_type)?;
            if self.is_change_path(&output.address_n) {
                return Ok(AnalyzedOutput {
                    script_pubkey: script,
                    is_change: true,
                    confirm_body: None,
                    exchange_text: None,
                });
            }
            let shown = address::p2pkh(&node.public_key, self.coin.address_type);
            return Ok(AnalyzedOutput {
                script_pubkey: script,
                is_change: false,
                confirm_body: Some(format!(
                    "Send {} to {shown}?",
                    self.coin.format_amount(output.amount)
                )),
                exchange_text: None,
            });
        }

        let Some(addr) = output.address.as_deref() else {
            return Err(Interrupt::failed(
                FailureCode::SyntaxError,
                "Output needs an address or a path",
            ));
        };
        let script = self.script_for_address(addr)?;
        Ok(AnalyzedOutput {
            script_pubkey: script,
            is_change: false,
            confirm_body: Some(format!(
                "Send {} to {addr}?",
                self.coin.format_amount(output.amount)
            )),
            exchange_text: None,
        })
    }

    /// Change heuristic: same purpose/coin/account as the first input,
    /// internal branch, standard depth.
    fn is_change_path(&self, path: &[u32]) -> bool {
        path.len() == 5
            && self.first_input_path.len() == 5
            && path[..3] == self.first_input_path[..3]
            && path[3] == 1
            && path[4] & HARDENED == 0
    }

    fn script_for_own_key(
        &self,
        node: &HdNode,
        script_type: Option<OutputScriptType>,
    ) -> Result<Vec<u8>, Interrupt> {
        let keyhash = address::hash160(&node.public_key);
        match script_type.unwrap_or(OutputScriptType::PayToAddress) {
            OutputScriptType::PayToAddress => Ok(script_p2pkh(&keyhash)),
            OutputScriptType::PayToWitness => {
                if self.coin.bech32_hrp.is_none() {
                    return Err(Interrupt::other("Coin does not support native segwit"));
                }
                Ok(script_witness_v0(&keyhash))
            }
            OutputScriptType::PayToP2ShWitness => {
                if !self.coin.segwit {
                    return Err(Interrupt::other("Coin does not support segwit"));
                }
                let redeem = script_witness_v0(&keyhash);
                Ok(script_p2sh(&address::hash160(&redeem)))
            }
            OutputScriptType::PayToOpReturn => {
                Err(Interrupt::other("OP_RETURN cannot target a key"))
            }
        }
    }

    fn script_for_address(&self, addr: &str) -> Result<Vec<u8>, Interrupt> {
        if let Some(hrp) = self.coin.bech32_hrp {
            if addr.starts_with(hrp) {
                if let Ok(program) = address::decode_segwit_v0(hrp, addr) {
                    let mut script = vec![0x00];
                    push_varint(&mut script, program.len() as u64);
                    script.extend_from_slice(&program);
                    return Ok(script);
                }
            }
        }
        let (version, hash) = address::decode_base58(addr)
            .map_err(|_| Interrupt::other("Invalid address"))?;
        if version == self.coin.address_type {
            Ok(script_p2pkh(&hash))
        } else if version == self.coin.address_type_p2sh {
            Ok(script_p2sh(&hash))
        } else {
            Err(Interrupt::other("Address version does not match coin"))
        }
    }

    fn script_code(&self, input: &ParsedInput, node: &HdNode) -> Result<Vec<u8>, Interrupt> {
        match input.script_type {
            InputScriptType::SpendAddress => {
                Ok(script_p2pkh(&address::hash160(&node.public_key)))
            }
            InputScriptType::SpendWitness | InputScriptType::SpendP2ShWitness => {
                // BIP-143 script code for a key spend is the P2PKH-style
                // script over the key hash.
                Ok(script_p2pkh(&address::hash160(&node.public_key)))
            }
            InputScriptType::SpendMultisig => {
                let Some(multisig) = &input.multisig else {
                    return Err(Interrupt::failed(
                        FailureCode::SyntaxError,
                        "Multisig input without redeem script",
                    ));
                };
                address::multisig_redeem_script(&multisig.0, multisig.1)
                    .map_err(|_| Interrupt::other("Invalid multisig script"))
            }
        }
    }

    fn legacy_sighash(&self, signing_index: u32, script_code: &[u8]) -> [u8; 32] {
        let mut pre = Vec::with_capacity(
            8 + self.commits.len() * 42 + self.outputs_ser.len() + script_code.len(),
        );
        pre.extend_from_slice(&self.version.to_le_bytes());
        push_varint(&mut pre, self.commits.len() as u64);
        for (k, commit) in self.commits.iter().enumerate() {
            pre.extend_from_slice(&commit.prev_hash);
            pre.extend_from_slice(&commit.prev_index.to_le_bytes());
            if k as u32 == signing_index {
                push_varint(&mut pre, script_code.len() as u64);
                pre.extend_from_slice(script_code);
            } else {
                pre.push(0x00);
            }
            pre.extend_from_slice(&commit.sequence.to_le_bytes());
        }
        push_varint(&mut pre, u64::from(self.outputs_count));
        pre.extend_from_slice(&self.outputs_ser);
        pre.extend_from_slice(&self.lock_time.to_le_bytes());
        pre.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
        address::sha256d(&pre)
    }

    fn witness_sighash(&self, commit: &InputCommit, script_code: &[u8]) -> [u8; 32] {
        let mut pre = Vec::with_capacity(156 + script_code.len());
        pre.extend_from_slice(&self.version.to_le_bytes());
        pre.extend_from_slice(&self.hash_prevouts);
        pre.extend_from_slice(&self.hash_sequence);
        pre.extend_from_slice(&commit.prev_hash);
        pre.extend_from_slice(&commit.prev_index.to_le_bytes());
        push_varint(&mut pre, script_code.len() as u64);
        pre.extend_from_slice(script_code);
        pre.extend_from_slice(&commit.amount.to_le_bytes());
        pre.extend_from_slice(&commit.sequence.to_le_bytes());
        pre.extend_from_slice(&self.hash_outputs);
        pre.extend_from_slice(&self.lock_time.to_le_bytes());
        pre.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
        address::sha256d(&pre)
    }
}

struct ParsedInput {
    address_n: Vec<u32>,
    prev_hash: [u8; 32],
    prev_index: u32,
    sequence: u32,
    amount: u64,
    script_type: InputScriptType,
    multisig: Option<(Vec<Vec<u8>>, u32)>,
}

fn parse_input(tx: &TransactionType) -> Result<ParsedInput, Interrupt> {
    let input: &TxInput = tx
        .inputs
        .first()
        .ok_or_else(|| Interrupt::failed(FailureCode::SyntaxError, "No input provided"))?;
    if input.prev_hash.len() != 32 {
        return Err(Interrupt::failed(FailureCode::SyntaxError, "Invalid prev hash"));
    }
    if input.address_n.is_empty() {
        return Err(Interrupt::failed(FailureCode::SyntaxError, "Input without a path"));
    }
    let mut prev_hash = [0u8; 32];
    prev_hash.copy_from_slice(&input.prev_hash);
    Ok(ParsedInput {
        address_n: input.address_n.clone(),
        prev_hash,
        prev_index: input.prev_index,
        sequence: input.sequence.unwrap_or(SEQUENCE_FINAL),
        amount: input.amount,
        script_type: input.script_type.unwrap_or(InputScriptType::SpendAddress),
        multisig: input
            .multisig
            .as_ref()
            .map(|m| (m.pubkeys.iter().map(|k| k.to_vec()).collect(), m.m)),
    })
}

/// Fold every field of an input into the pass commitment.
fn commit_input(hash: &mut Sha256, input: &ParsedInput) {
    Digest::update(hash, input.prev_hash);
    Digest::update(hash, input.prev_index.to_le_bytes());
    Digest::update(hash, input.amount.to_le_bytes());
    Digest::update(hash, input.sequence.to_le_bytes());
    Digest::update(hash, (input.address_n.len() as u32).to_le_bytes());
    for step in &input.address_n {
        Digest::update(hash, step.to_le_bytes());
    }
    Digest::update(hash, [input.script_type as u8]);
}

fn request_item(
    request: RequestType,
    index: u32,
    serialized: Option<TxRequestSerialized>,
) -> Message {
    Message::TxRequest(TxRequest {
        request: Some(request),
        details: Some(TxRequestDetails { request_index: Some(index) }),
        serialized,
    })
}

fn script_p2pkh(keyhash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xA9, 0x14]);
    script.extend_from_slice(keyhash);
    script.extend_from_slice(&[0x88, 0xAC]);
    script
}

fn script_p2sh(script_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.extend_from_slice(&[0xA9, 0x14]);
    script.extend_from_slice(script_hash);
    script.push(0x87);
    script
}

fn script_witness_v0(keyhash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(22);
    script.extend_from_slice(&[0x00, 0x14]);
    script.extend_from_slice(keyhash);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

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

    /// Records confirmation bodies, then grants.
    struct RecordingGate(Vec<String>);

    impl ConfirmGate for RecordingGate {
        fn confirm(
            &mut self,
            _kind: ButtonRequestType,
            _title: &str,
            body: &str,
        ) -> Result<(), Interrupt> {
            self.0.push(body.to_owned());
            Ok(())
        }

        fn review(
            &mut self,
            _kind: ButtonRequestType,
            _title: &str,
            body: &str,
        ) -> Result<(), Interrupt> {
            self.0.push(body.to_owned());
            Ok(())
        }
    }

    fn root() -> HdNode {
        HdNode::from_seed(&[42u8; 64]).unwrap()
    }

    fn btc() -> &'static CoinDef {
        coins::by_name("Bitcoin").unwrap()
    }

    fn input_at(index: u32, amount: u64) -> TransactionType {
        TransactionType {
            inputs: vec![TxInput {
                address_n: vec![44 | HARDENED, HARDENED, HARDENED, 0, index],
                prev_hash: vec![index as u8 + 1; 32],
                prev_index: index,
                amount,
                sequence: None,
                script_type: Some(InputScriptType::SpendAddress),
                multisig: None,
            }],
            outputs: vec![],
        }
    }

    fn spend_output(amount: u64) -> TransactionType {
        let dest = HdNode::from_seed(&[9u8; 32]).unwrap();
        TransactionType {
            inputs: vec![],
            outputs: vec![TxOutput {
                address: Some(address::p2pkh(&dest.public_key, 0)),
                amount,
                script_type: Some(OutputScriptType::PayToAddress),
                ..Default::default()
            }],
        }
    }

    fn change_output(amount: u64) -> TransactionType {
        TransactionType {
            inputs: vec![],
            outputs: vec![TxOutput {
                address_n: vec![44 | HARDENED, HARDENED, HARDENED, 1, 0],
                amount,
                script_type: Some(OutputScriptType::PayToAddress),
                ..Default::default()
            }],
        }
    }

    fn expect_request(message: &Message, expected: RequestType, index: u32) {
        match message {
            Message::TxRequest(req) => {
                assert_eq!(req.request, Some(expected));
                assert_eq!(
                    req.details.as_ref().and_then(|d| d.request_index),
                    Some(index)
                );
            }
            other => unreachable!("expected TxRequest, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_transactions() {
        let msg = SignTx { inputs_count: 0, outputs_count: 1, ..Default::default() };
        assert!(BitcoinSigner::start(&msg, btc(), root(), false).is_err());
        let msg = SignTx { inputs_count: 1, outputs_count: 0, ..Default::default() };
        assert!(BitcoinSigner::start(&msg, btc(), root(), false).is_err());
    }

    #[test]
    fn two_inputs_one_output_full_run() {
        let msg = SignTx { inputs_count: 2, outputs_count: 1, ..Default::default() };
        let (mut signer, first) = BitcoinSigner::start(&msg, btc(), root(), false).unwrap();
        expect_request(&first, RequestType::TxInput, 0);

        let mut gate = YesGate;
        let r = signer.tx_ack(&mut gate, &input_at(0, 60_000)).unwrap();
        expect_request(&r, RequestType::TxInput, 1);
        let r = signer.tx_ack(&mut gate, &input_at(1, 50_000)).unwrap();
        expect_request(&r, RequestType::TxOutput, 0);
        let r = signer.tx_ack(&mut gate, &spend_output(100_000)).unwrap();
        expect_request(&r, RequestType::TxInput, 0);

        // Second pass returns one signature per input.
        let r = signer.tx_ack(&mut gate, &input_at(0, 60_000)).unwrap();
        match &r {
            Message::TxRequest(req) => {
                let ser = req.serialized.as_ref().unwrap();
                assert_eq!(ser.signature_index, Some(0));
                assert!(ser.signature.as_ref().is_some_and(|s| s.len() > 60));
                assert_eq!(ser.pubkey.as_ref().map(Vec::len), Some(33));
            }
            other => unreachable!("expected TxRequest, got {other:?}"),
        }
        let r = signer.tx_ack(&mut gate, &input_at(1, 50_000)).unwrap();
        match &r {
            Message::TxRequest(req) => assert_eq!(req.request, Some(RequestType::TxFinished)),
            other => unreachable!("expected TxRequest, got {other:?}"),
        }
        assert!(signer.finished());
    }

    #[test]
    fn change_output_not_confirmed() {
        let msg = SignTx { inputs_count: 1, outputs_count: 2, ..Default::default() };
        let (mut signer, _) = BitcoinSigner::start(&msg, btc(), root(), false).unwrap();
        let mut gate = RecordingGate(Vec::new());

        signer.tx_ack(&mut gate, &input_at(0, 100_000)).unwrap();
        signer.tx_ack(&mut gate, &spend_output(40_000)).unwrap();
        signer.tx_ack(&mut gate, &change_output(59_000)).unwrap();

        // One output confirmation plus the final signing consent; no
        // confirmation for the change output.
        assert_eq!(gate.0.len(), 2);
        assert!(gate.0[0].starts_with("Send 0.0004 BTC"));
        assert!(gate.0[1].contains("0.0004 BTC"));
        assert!(gate.0[1].contains("0.00001 BTC"), "fee line: {}", gate.0[1]);
    }

    #[test]
    fn overspending_fails() {
        let msg = SignTx { inputs_count: 1, outputs_count: 1, ..Default::default() };
        let (mut signer, _) = BitcoinSigner::start(&msg, btc(), root(), false).unwrap();
        let mut gate = YesGate;
        signer.tx_ack(&mut gate, &input_at(0, 1_000)).unwrap();
        let err = signer.tx_ack(&mut gate, &spend_output(2_000)).unwrap_err();
        assert!(matches!(err, Interrupt::Failed(FailureCode::NotEnoughFunds, _)));
    }

    #[test]
    fn input_substitution_detected() {
        let msg = SignTx { inputs_count: 1, outputs_count: 1, ..Default::default() };
        let (mut signer, _) = BitcoinSigner::start(&msg, btc(), root(), false).unwrap();
        let mut gate = YesGate;
        signer.tx_ack(&mut gate, &input_at(0, 100_000)).unwrap();
        signer.tx_ack(&mut gate, &spend_output(90_000)).unwrap();

        // Second pass delivers a different input.
        let mut swapped = input_at(0, 100_000);
        swapped.inputs[0].prev_hash = vec![0xEE; 32];
        let err = signer.tx_ack(&mut gate, &swapped).unwrap_err();
        assert!(matches!(err, Interrupt::Failed(FailureCode::Other, _)));
    }

    #[test]
    fn path_substitution_detected() {
        let msg = SignTx { inputs_count: 2, outputs_count: 1, ..Default::default() };
        let (mut signer, _) = BitcoinSigner::start(&msg, btc(), root(), false).unwrap();
        let mut gate = YesGate;
        signer.tx_ack(&mut gate, &input_at(0, 60_000)).unwrap();
        signer.tx_ack(&mut gate, &input_at(1, 50_000)).unwrap();
        signer.tx_ack(&mut gate, &spend_output(100_000)).unwrap();

        signer.tx_ack(&mut gate, &input_at(0, 60_000)).unwrap();
        let mut swapped = input_at(1, 50_000);
        swapped.inputs[0].address_n[4] = 99;
        let err = signer.tx_ack(&mut gate, &swapped).unwrap_err();
        assert!(matches!(err, Interrupt::Failed(FailureCode::Other, _)));
    }

    #[test]
    fn signatures_verify_against_derived_keys() {
        let msg = SignTx { inputs_count: 1, outputs_count: 1, ..Default::default() };
        let (mut signer, _) = BitcoinSigner::start(&msg, btc(), root(), false).unwrap();
        let mut gate = YesGate;
        signer.tx_ack(&mut gate, &input_at(0, 100_000)).unwrap();
        signer.tx_ack(&mut gate, &spend_output(90_000)).unwrap();
        let r = signer.tx_ack(&mut gate, &input_at(0, 100_000)).unwrap();

        let Message::TxRequest(req) = &r else { unreachable!() };
        let ser = req.serialized.as_ref().unwrap();

        // Recompute the sighash the same way and verify the DER signature.
        let mut node = root();
        node.derive_path(&[44 | HARDENED, HARDENED, HARDENED, 0, 0]).unwrap();
        let script_code = script_p2pkh(&address::hash160(&node.public_key));
        let digest = signer.legacy_sighash(0, &script_code);
        ecdsa::verify_der(&node.public_key, &digest, ser.signature.as_ref().unwrap()).unwrap();
    }

    #[test]
    fn witness_input_signs_with_bip143() {
        let msg = SignTx { inputs_count: 1, outputs_count: 1, ..Default::default() };
        let (mut signer, _) = BitcoinSigner::start(&msg, btc(), root(), false).unwrap();
        let mut gate = YesGate;

        let mut witness_input = input_at(0, 100_000);
        witness_input.inputs[0].script_type = Some(InputScriptType::SpendWitness);
        witness_input.inputs[0].address_n = vec![84 | HARDENED, HARDENED, HARDENED, 0, 0];

        signer.tx_ack(&mut gate, &witness_input).unwrap();
        signer.tx_ack(&mut gate, &spend_output(90_000)).unwrap();
        let r = signer.tx_ack(&mut gate, &witness_input).unwrap();
        let Message::TxRequest(req) = &r else { unreachable!() };
        assert_eq!(req.request, Some(RequestType::TxFinished));
        assert!(req.serialized.as_ref().unwrap().signature.is_some());
    }
}
