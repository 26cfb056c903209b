//! Exchange-contract validation.
//!
//! An output may carry a quote signed by the exchange counterparty. Before
//! such an output is even shown to the user, the engine proves four
//! things: the quote signature verifies against the built-in exchange key,
//! the deposit leg matches the output being signed, and both the return
//! and withdrawal addresses derive from *this* device, so a tampered
//! contract cannot bounce funds elsewhere.

use coffer_crypto::{address, ecdsa, HdNode};
use coffer_proto::messages::tx::{ExchangeType, TxOutput};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::coins::{self, CoinDef};

/// Built-in exchange counterparty key (development set; provisioning
/// installs the production key).
pub const EXCHANGE_PUBKEY: [u8; 33] = [
    0x02, 0x5C, 0xBD, 0xF0, 0x64, 0x6E, 0x5D, 0xB4, 0xEA, 0xA3, 0x98, 0xF3, 0x65, 0xF2, 0xEA,
    0x7A, 0x0E, 0x3D, 0x41, 0x9B, 0x7E, 0x03, 0x30, 0xE3, 0x9C, 0xE9, 0x2B, 0xDD, 0xED, 0xCA,
    0xC4, 0xF9, 0xBC,
];

/// Why an exchange contract was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Counterparty signature did not verify.
    #[error("exchange signature verification failed")]
    SignatureFailed,

    /// Deposit coin in the quote is not the coin being signed.
    #[error("deposit coin mismatch")]
    DepositCoinMismatch,

    /// Deposit address in the quote differs from the output address.
    #[error("deposit address mismatch")]
    DepositAddressMismatch,

    /// Deposit amount in the quote differs from the output amount.
    #[error("deposit amount mismatch")]
    DepositAmountMismatch,

    /// Withdrawal coin in the quote is not the declared coin.
    #[error("withdrawal coin mismatch")]
    WithdrawalCoinMismatch,

    /// Return address does not derive from this device.
    #[error("return address is not ours")]
    ReturnAddressForeign,

    /// Withdrawal address does not derive from this device.
    #[error("withdrawal address is not ours")]
    WithdrawalAddressForeign,
}

/// What the user gets shown for a valid contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSummary {
    /// Human-readable one-liner with amounts, coins and rate.
    pub text: String,
}

/// Canonical byte encoding of the quote, the signed blob.
fn encode_response(
    response: &coffer_proto::messages::tx::ExchangeResponse,
) -> Result<Vec<u8>, ExchangeError> {
    let mut blob = Vec::new();
    ciborium::ser::into_writer(response, &mut blob)
        .map_err(|_| ExchangeError::SignatureFailed)?;
    Ok(blob)
}

/// Derive a coin address for a path and check it against an expectation.
fn derives_to(
    root: &HdNode,
    path: &[u32],
    coin: &CoinDef,
    expected: &str,
) -> Result<bool, ExchangeError> {
    let mut node = root.clone();
    if node.derive_path(path).is_err() {
        return Ok(false);
    }
    let ours = address::p2pkh(&node.public_key, coin.address_type);
    Ok(ours == expected)
}

/// Validate a contract against the output carrying it.
pub fn validate(
    exchange: &ExchangeType,
    output: &TxOutput,
    deposit_coin: &CoinDef,
    root: &HdNode,
) -> Result<ExchangeSummary, ExchangeError> {
    let signed = &exchange.signed_exchange_response;
    let response = &signed.response;

    // 1. Counterparty signature over the encoded quote.
    let blob = encode_response(response)?;
    let digest: [u8; 32] = Sha256::digest(&blob).into();
    ecdsa::verify_compact(&EXCHANGE_PUBKEY, &digest, &signed.signature)
        .map_err(|_| ExchangeError::SignatureFailed)?;

    // 2. Deposit leg must be the output being signed.
    if coins::by_shortcut(&response.deposit_address.coin_type)
        .map(|c| c.name)
        != Some(deposit_coin.name)
    {
        return Err(ExchangeError::DepositCoinMismatch);
    }
    if output.address.as_deref() != Some(response.deposit_address.address.as_str()) {
        return Err(ExchangeError::DepositAddressMismatch);
    }
    if output.amount != response.deposit_amount {
        return Err(ExchangeError::DepositAmountMismatch);
    }

    // 3. Withdrawal lands on a coin we know, at an address we own.
    let withdrawal_coin = coins::by_name(&exchange.withdrawal_coin_name)
        .ok_or(ExchangeError::WithdrawalCoinMismatch)?;
    if coins::by_shortcut(&response.withdrawal_address.coin_type).map(|c| c.name)
        != Some(withdrawal_coin.name)
    {
        return Err(ExchangeError::WithdrawalCoinMismatch);
    }
    if !derives_to(
        root,
        &exchange.withdrawal_address_n,
        withdrawal_coin,
        &response.withdrawal_address.address,
    )? {
        return Err(ExchangeError::WithdrawalAddressForeign);
    }

    // 4. Return path must come back to this device too.
    if !derives_to(
        root,
        &exchange.return_address_n,
        deposit_coin,
        &response.return_address.address,
    )? {
        return Err(ExchangeError::ReturnAddressForeign);
    }

    let account = exchange
        .withdrawal_address_n
        .get(2)
        .map_or(0, |a| a & !crate::HARDENED);
    let rate_whole = response.quoted_rate / 100_000_000;
    let rate_frac = (response.quoted_rate % 100_000_000) / 1_000_000;
    let text = format!(
        "{} -> {} at rate {rate_whole}.{rate_frac:02} to account #{account}",
        deposit_coin.format_amount(response.deposit_amount),
        withdrawal_coin.format_amount(response.withdrawal_amount),
    );
    Ok(ExchangeSummary { text })
}

/// Validate a contract attached to an Ethereum transaction.
///
/// Same checks as [`validate`], with Ethereum encodings: the deposit leg
/// is the transaction's destination and value, and the return address is
/// an Ethereum address of this device.
pub fn validate_ethereum(
    exchange: &ExchangeType,
    to: &[u8; 20],
    value: &[u8],
    root: &HdNode,
) -> Result<ExchangeSummary, ExchangeError> {
    let signed = &exchange.signed_exchange_response;
    let response = &signed.response;

    let blob = encode_response(response)?;
    let digest: [u8; 32] = Sha256::digest(&blob).into();
    ecdsa::verify_compact(&EXCHANGE_PUBKEY, &digest, &signed.signature)
        .map_err(|_| ExchangeError::SignatureFailed)?;

    if !response.deposit_address.coin_type.eq_ignore_ascii_case("ETH") {
        return Err(ExchangeError::DepositCoinMismatch);
    }
    let quoted_to = response.deposit_address.address.trim_start_matches("0x");
    if !quoted_to.eq_ignore_ascii_case(&hex::encode(to)) {
        return Err(ExchangeError::DepositAddressMismatch);
    }

    // Values above u64 wei cannot be quoted; treat them as a mismatch.
    if value.len() > 8 || value.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
        != response.deposit_amount
    {
        return Err(ExchangeError::DepositAmountMismatch);
    }

    let withdrawal_coin = coins::by_name(&exchange.withdrawal_coin_name)
        .ok_or(ExchangeError::WithdrawalCoinMismatch)?;
    if !derives_to(
        root,
        &exchange.withdrawal_address_n,
        withdrawal_coin,
        &response.withdrawal_address.address,
    )? {
        return Err(ExchangeError::WithdrawalAddressForeign);
    }

    let mut return_node = root.clone();
    if return_node.derive_path(&exchange.return_address_n).is_err() {
        return Err(ExchangeError::ReturnAddressForeign);
    }
    let ours = address::ethereum_pubkeyhash(&return_node.public_key)
        .map_err(|_| ExchangeError::ReturnAddressForeign)?;
    let quoted_return = response.return_address.address.trim_start_matches("0x");
    if !quoted_return.eq_ignore_ascii_case(&hex::encode(ours)) {
        return Err(ExchangeError::ReturnAddressForeign);
    }

    let account = exchange
        .withdrawal_address_n
        .get(2)
        .map_or(0, |a| a & !crate::HARDENED);
    let text = format!(
        "{} wei -> {} to account #{account}",
        response.deposit_amount,
        withdrawal_coin.format_amount(response.withdrawal_amount),
    );
    Ok(ExchangeSummary { text })
}

#[cfg(test)]
mod tests {
    use coffer_proto::messages::tx::{ExchangeAddress, ExchangeResponse, SignedExchangeResponse};

    use super::*;

    /// Development exchange key: the secret scalar behind
    /// [`EXCHANGE_PUBKEY`].
    fn exchange_secret() -> [u8; 32] {
        let mut secret = [0u8; 32];
        secret[31] = 7;
        secret
    }

    fn root() -> HdNode {
        HdNode::from_seed(&[77u8; 64]).unwrap()
    }

    fn addr_at(path: &[u32], coin: &CoinDef) -> String {
        let mut node = root().clone();
        node.derive_path(path).unwrap();
        address::p2pkh(&node.public_key, coin.address_type)
    }

    fn build_contract() -> (ExchangeType, TxOutput, &'static CoinDef) {
        let btc = coins::by_name("Bitcoin").unwrap();
        let ltc = coins::by_name("Litecoin").unwrap();
        let withdrawal_path =
            vec![44 | crate::HARDENED, 2 | crate::HARDENED, crate::HARDENED, 0, 0];
        let return_path = vec![44 | crate::HARDENED, crate::HARDENED, crate::HARDENED, 0, 1];

        let response = ExchangeResponse {
            deposit_address: ExchangeAddress {
                coin_type: "BTC".into(),
                address: "1ExchangeDepositAddr".into(),
            },
            deposit_amount: 50_000,
            withdrawal_address: ExchangeAddress {
                coin_type: "LTC".into(),
                address: addr_at(&withdrawal_path, ltc),
            },
            withdrawal_amount: 4_000_000,
            return_address: ExchangeAddress {
                coin_type: "BTC".into(),
                address: addr_at(&return_path, btc),
            },
            quoted_rate: 80 * 100_000_000,
            expiration: 1_700_000_000_000,
        };

        let mut blob = Vec::new();
        ciborium::ser::into_writer(&response, &mut blob).unwrap();
        let digest: [u8; 32] = Sha256::digest(&blob).into();
        let signature = ecdsa::sign_compact(&exchange_secret(), &digest).unwrap();

        let exchange = ExchangeType {
            signed_exchange_response: SignedExchangeResponse {
                response,
                signature: signature.to_vec(),
            },
            withdrawal_coin_name: "Litecoin".into(),
            withdrawal_address_n: withdrawal_path,
            return_address_n: return_path,
        };
        let output = TxOutput {
            address: Some("1ExchangeDepositAddr".into()),
            amount: 50_000,
            ..Default::default()
        };
        (exchange, output, btc)
    }

    #[test]
    fn development_key_matches_constant() {
        let node = HdNode::from_parts(0, 0, 0, [0u8; 32], exchange_secret()).unwrap();
        assert_eq!(node.public_key, EXCHANGE_PUBKEY);
    }

    #[test]
    fn valid_contract_accepted() {
        let (exchange, output, coin) = build_contract();
        let summary = validate(&exchange, &output, coin, &root()).unwrap();
        assert!(summary.text.contains("0.0005 BTC"));
        assert!(summary.text.contains("0.04 LTC"));
        assert!(summary.text.contains("account #0"));
    }

    #[test]
    fn tampered_signature_rejected() {
        let (mut exchange, output, coin) = build_contract();
        exchange.signed_exchange_response.signature[5] ^= 1;
        assert_eq!(
            validate(&exchange, &output, coin, &root()),
            Err(ExchangeError::SignatureFailed)
        );
    }

    #[test]
    fn tampered_amount_rejected() {
        let (exchange, mut output, coin) = build_contract();
        output.amount += 1;
        assert_eq!(
            validate(&exchange, &output, coin, &root()),
            Err(ExchangeError::DepositAmountMismatch)
        );
    }

    #[test]
    fn deposit_address_must_match_output() {
        let (exchange, mut output, coin) = build_contract();
        output.address = Some("1SomewhereElse".into());
        assert_eq!(
            validate(&exchange, &output, coin, &root()),
            Err(ExchangeError::DepositAddressMismatch)
        );
    }

    #[test]
    fn foreign_withdrawal_path_rejected() {
        let (mut exchange, output, coin) = build_contract();
        exchange.withdrawal_address_n[4] = 9; // quote signed for index 0
        assert_eq!(
            validate(&exchange, &output, coin, &root()),
            Err(ExchangeError::WithdrawalAddressForeign)
        );
    }

    #[test]
    fn foreign_device_cannot_claim_contract() {
        let (exchange, output, coin) = build_contract();
        let other_root = HdNode::from_seed(&[1u8; 64]).unwrap();
        assert!(matches!(
            validate(&exchange, &output, coin, &other_root),
            Err(ExchangeError::WithdrawalAddressForeign | ExchangeError::ReturnAddressForeign)
        ));
    }
}
