//! Coin table, amount formatting and derivation-path policy.

use coffer_proto::messages::{device::CoinInfo, keys::InputScriptType};

use crate::HARDENED;

/// Largest valid output value: 21 million coins in base units.
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

/// One supported coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoinDef {
    /// Full name, the wire lookup key.
    pub name: &'static str,
    /// Ticker.
    pub shortcut: &'static str,
    /// Base58 version for P2PKH addresses.
    pub address_type: u8,
    /// Base58 version for P2SH addresses.
    pub address_type_p2sh: u8,
    /// BIP-44 coin index (hardened bit not included).
    pub bip44_index: u32,
    /// Warning threshold for the fee, per kilobyte, in base units.
    pub maxfee_kb: u64,
    /// Decimal places of the display unit.
    pub decimals: u32,
    /// Segwit spends supported.
    pub segwit: bool,
    /// Bech32 human-readable part, when native segwit is supported.
    pub bech32_hrp: Option<&'static str>,
}

/// Supported coins, Bitcoin first (the wire default).
pub const COINS: &[CoinDef] = &[
    CoinDef {
        name: "Bitcoin",
        shortcut: "BTC",
        address_type: 0,
        address_type_p2sh: 5,
        bip44_index: 0,
        maxfee_kb: 2_000_000,
        decimals: 8,
        segwit: true,
        bech32_hrp: Some("bc"),
    },
    CoinDef {
        name: "Testnet",
        shortcut: "TEST",
        address_type: 111,
        address_type_p2sh: 196,
        bip44_index: 1,
        maxfee_kb: 10_000_000,
        decimals: 8,
        segwit: true,
        bech32_hrp: Some("tb"),
    },
    CoinDef {
        name: "Litecoin",
        shortcut: "LTC",
        address_type: 48,
        address_type_p2sh: 50,
        bip44_index: 2,
        maxfee_kb: 40_000_000,
        decimals: 8,
        segwit: true,
        bech32_hrp: Some("ltc"),
    },
    CoinDef {
        name: "Dogecoin",
        shortcut: "DOGE",
        address_type: 30,
        address_type_p2sh: 22,
        bip44_index: 3,
        maxfee_kb: 1_000_000_000,
        decimals: 8,
        segwit: false,
        bech32_hrp: None,
    },
];

/// Look a coin up by its full name.
#[must_use]
pub fn by_name(name: &str) -> Option<&'static CoinDef> {
    COINS.iter().find(|c| c.name == name)
}

/// Look a coin up by ticker, case-insensitively.
#[must_use]
pub fn by_shortcut(shortcut: &str) -> Option<&'static CoinDef> {
    COINS.iter().find(|c| c.shortcut.eq_ignore_ascii_case(shortcut))
}

impl CoinDef {
    /// Render a base-unit amount in the display unit, e.g. `"0.015 BTC"`.
    #[must_use]
    pub fn format_amount(&self, base_units: u64) -> String {
        let scale = 10u64.pow(self.decimals);
        let whole = base_units / scale;
        let frac = base_units % scale;
        if frac == 0 {
            return format!("{whole} {}", self.shortcut);
        }
        let mut frac_str = format!("{frac:0width$}", width = self.decimals as usize);
        while frac_str.ends_with('0') {
            frac_str.pop();
        }
        format!("{whole}.{frac_str} {}", self.shortcut)
    }

    /// Wire description for the `Features` reply.
    #[must_use]
    pub fn info(&self) -> CoinInfo {
        CoinInfo {
            coin_name: self.name.to_owned(),
            coin_shortcut: self.shortcut.to_owned(),
            address_type: u32::from(self.address_type),
            address_type_p2sh: u32::from(self.address_type_p2sh),
            maxfee_kb: self.maxfee_kb,
            segwit: self.segwit,
            bech32_hrp: self.bech32_hrp.map(str::to_owned),
        }
    }
}

/// Verdict of the path-policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathCheck {
    /// Path matches the convention for its script type.
    Known,
    /// Unusual path; show it to the user and let them decide.
    Unusual(String),
}

/// Check a derivation path against the account-path conventions.
///
/// A mismatch is advisory: the caller warns and lets the user override
/// with an explicit confirmation.
#[must_use]
pub fn check_path(coin: &CoinDef, path: &[u32], script_type: InputScriptType) -> PathCheck {
    let Some(&purpose) = path.first() else {
        return PathCheck::Unusual("empty path".to_owned());
    };

    let unusual = |reason: &str| PathCheck::Unusual(reason.to_owned());

    match purpose {
        p if p == 44 | HARDENED => {
            if script_type != InputScriptType::SpendAddress {
                return unusual("purpose 44' expects a legacy spend");
            }
            if path.len() != 5 {
                return unusual("purpose 44' expects depth 5");
            }
            if path[1] != coin.bip44_index | HARDENED {
                return unusual("coin index does not match");
            }
            if path[2] & HARDENED == 0 {
                return unusual("account index must be hardened");
            }
            if path[3] & HARDENED != 0 || path[4] & HARDENED != 0 {
                return unusual("change and address indices must not be hardened");
            }
            PathCheck::Known
        }
        p if p == 45 | HARDENED => {
            if script_type != InputScriptType::SpendMultisig {
                return unusual("purpose 45' expects a multisig spend");
            }
            if path.len() != 4 {
                return unusual("purpose 45' expects depth 4");
            }
            PathCheck::Known
        }
        p if p == 48 | HARDENED => {
            if script_type != InputScriptType::SpendMultisig {
                return unusual("purpose 48' expects a multisig spend");
            }
            if path.len() != 5 {
                return unusual("purpose 48' expects depth 5");
            }
            PathCheck::Known
        }
        p if p == 49 | HARDENED => {
            if script_type != InputScriptType::SpendP2ShWitness {
                return unusual("purpose 49' expects a wrapped-segwit spend");
            }
            if !coin.segwit {
                return unusual("coin does not support segwit");
            }
            if path.len() != 5 {
                return unusual("purpose 49' expects depth 5");
            }
            PathCheck::Known
        }
        p if p == 84 | HARDENED => {
            if script_type != InputScriptType::SpendWitness {
                return unusual("purpose 84' expects a native-segwit spend");
            }
            if !coin.segwit || coin.bech32_hrp.is_none() {
                return unusual("coin does not support native segwit");
            }
            if path.len() != 5 {
                return unusual("purpose 84' expects depth 5");
            }
            PathCheck::Known
        }
        _ => unusual("unknown purpose"),
    }
}

/// Rough serialized size of a signed transaction, for fee estimates.
#[must_use]
pub fn estimate_tx_size(inputs: u32, outputs: u32) -> u32 {
    10 + inputs.saturating_mul(149) + outputs.saturating_mul(35)
}
