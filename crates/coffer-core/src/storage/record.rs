//! The persisted storage record.
//!
//! A flat byte image, directly readable from a flash slot. Every field is
//! byte-aligned (multi-byte scalars are little-endian byte arrays behind
//! typed getters), so any slot content can be reinterpreted safely and the
//! serialized form is the in-memory form.
//!
//! ```text
//!  offset | length | field
//! --------+--------+--------------------------------
//!  0x0000 |   4    | magic "stor" (commit token)
//!  0x0004 |   4    | commit_seq, u32 LE (wear rotation winner)
//!  0x0008 |   4    | format_version, u32 LE (migration chain)
//!  0x000C |  12    | uuid
//!  0x0018 |  25    | uuid_str, hex with nul
//!  0x0031 |   1    | has_node
//!  0x0032 | 109    | node (depth, fingerprint, child_num LE; chain code,
//!         |        | private key, public key)
//!  0x009F |   1    | has_mnemonic
//!  0x00A0 | 241    | mnemonic, nul-terminated
//!  ...    |        | flags, pin, counters, language, label, policies
//! ```
//!
//! # Invariants
//!
//! - At most one of `has_node` / `has_mnemonic` is set; the setters
//!   clear the other side.
//! - `format_version` only changes through the migration chain.

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::flash::layout::STORAGE_MAGIC;

/// Current record format version.
pub const STORAGE_FORMAT_VERSION: u32 = 2;

/// Longest stored mnemonic, including the nul.
pub const MNEMONIC_LEN: usize = 241;

/// Longest stored PIN, including the nul.
pub const PIN_LEN: usize = 10;

/// Longest stored language string, including the nul.
pub const LANGUAGE_LEN: usize = 17;

/// Longest stored label, including the nul.
pub const LABEL_LEN: usize = 33;

/// Number of policy slots.
pub const POLICY_COUNT: usize = 2;

/// Size of the v1 record, which lacked the policy table.
pub(crate) const V1_RECORD_LEN: usize = 470;

/// One feature-policy slot.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct PolicyEntry {
    /// Policy name, nul-terminated.
    pub name: [u8; 15],
    /// 1 when enabled.
    pub enabled: u8,
}

/// Stored BIP-32 node fields.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct StoredNode {
    depth: [u8; 4],
    fingerprint: [u8; 4],
    child_num: [u8; 4],
    /// Chain code; encrypted in the legacy passphrase format.
    pub chain_code: [u8; 32],
    /// Private key; encrypted in the legacy passphrase format.
    pub private_key: [u8; 32],
    /// Compressed public key.
    pub public_key: [u8; 33],
}

impl StoredNode {
    /// Derivation depth.
    #[must_use]
    pub fn depth(&self) -> u32 {
        u32::from_le_bytes(self.depth)
    }

    /// Parent fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> u32 {
        u32::from_le_bytes(self.fingerprint)
    }

    /// Child index.
    #[must_use]
    pub fn child_num(&self) -> u32 {
        u32::from_le_bytes(self.child_num)
    }

    /// Fill all scalar fields.
    pub fn set_meta(&mut self, depth: u32, fingerprint: u32, child_num: u32) {
        self.depth = depth.to_le_bytes();
        self.fingerprint = fingerprint.to_le_bytes();
        self.child_num = child_num.to_le_bytes();
    }
}

/// The whole persisted record.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct StorageRecord {
    magic: [u8; 4],
    commit_seq: [u8; 4],
    format_version: [u8; 4],
    uuid: [u8; 12],
    uuid_str: [u8; 25],
    has_node: u8,
    node: StoredNode,
    has_mnemonic: u8,
    mnemonic: [u8; MNEMONIC_LEN],
    passphrase_protection: u8,
    has_pin: u8,
    pin: [u8; PIN_LEN],
    pin_failed_attempts: [u8; 4],
    has_language: u8,
    language: [u8; LANGUAGE_LEN],
    has_label: u8,
    label: [u8; LABEL_LEN],
    imported: u8,
    policies: [PolicyEntry; POLICY_COUNT],
    reserved: [u8; 26],
}

/// Serialized record size.
pub const RECORD_LEN: usize = std::mem::size_of::<StorageRecord>();

fn set_str(dst: &mut [u8], value: &str) {
    dst.fill(0);
    let take = value.len().min(dst.len() - 1);
    dst[..take].copy_from_slice(&value.as_bytes()[..take]);
}

fn get_str(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

impl StorageRecord {
    /// Fresh record: no seed, no PIN, default policies, magic unset.
    #[must_use]
    pub fn fresh() -> Self {
        let mut record = Self::new_zeroed();
        record.format_version = STORAGE_FORMAT_VERSION.to_le_bytes();
        record.set_policy("ShapeShift", false);
        record.set_policy("Pin Caching", true);
        record
    }

    /// Parse a raw slot image at the current format version.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < RECORD_LEN {
            return None;
        }
        Self::read_from_bytes(&bytes[..RECORD_LEN]).ok()
    }

    /// True when the magic commit token is present.
    #[must_use]
    pub fn magic_valid(&self) -> bool {
        &self.magic == STORAGE_MAGIC
    }

    /// Stamp the magic commit token.
    pub fn set_magic(&mut self) {
        self.magic = *STORAGE_MAGIC;
    }

    /// Clear the magic, making the image invalid until committed.
    pub fn clear_magic(&mut self) {
        self.magic = [0; 4];
    }

    /// Wear-rotation sequence number.
    #[must_use]
    pub fn commit_seq(&self) -> u32 {
        u32::from_le_bytes(self.commit_seq)
    }

    /// Bump the wear-rotation sequence number.
    pub fn advance_commit_seq(&mut self) {
        self.commit_seq = self.commit_seq().wrapping_add(1).to_le_bytes();
    }

    /// Record format version.
    #[must_use]
    pub fn format_version(&self) -> u32 {
        u32::from_le_bytes(self.format_version)
    }

    pub(crate) fn set_format_version(&mut self, version: u32) {
        self.format_version = version.to_le_bytes();
    }

    /// Device UUID.
    #[must_use]
    pub fn uuid(&self) -> &[u8; 12] {
        &self.uuid
    }

    /// Device UUID as hex.
    #[must_use]
    pub fn uuid_str(&self) -> String {
        get_str(&self.uuid_str)
    }

    /// Install a new UUID and its hex rendering.
    pub fn set_uuid(&mut self, uuid: [u8; 12]) {
        self.uuid = uuid;
        set_str(&mut self.uuid_str, &hex::encode(uuid));
    }

    /// True when a seed (node or mnemonic) is present.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.has_node != 0 || self.has_mnemonic != 0
    }

    /// Stored node, when the seed is a raw node.
    #[must_use]
    pub fn node(&self) -> Option<&StoredNode> {
        (self.has_node != 0).then_some(&self.node)
    }

    /// Install a node seed, clearing any mnemonic.
    pub fn set_node(&mut self, node: StoredNode) {
        self.node = node;
        self.has_node = 1;
        self.has_mnemonic = 0;
        self.mnemonic.fill(0);
    }

    /// Stored mnemonic, when the seed is a sentence.
    #[must_use]
    pub fn mnemonic(&self) -> Option<String> {
        (self.has_mnemonic != 0).then(|| get_str(&self.mnemonic))
    }

    /// Install a mnemonic seed, clearing any node.
    pub fn set_mnemonic(&mut self, sentence: &str) {
        set_str(&mut self.mnemonic, sentence);
        self.has_mnemonic = 1;
        self.has_node = 0;
        self.node = StoredNode::new_zeroed();
    }

    /// Passphrase protection flag.
    #[must_use]
    pub fn passphrase_protection(&self) -> bool {
        self.passphrase_protection != 0
    }

    /// Set passphrase protection.
    pub fn set_passphrase_protection(&mut self, on: bool) {
        self.passphrase_protection = u8::from(on);
    }

    /// True when a PIN is set.
    #[must_use]
    pub fn has_pin(&self) -> bool {
        self.has_pin != 0 && self.pin[0] != 0
    }

    /// Compare a candidate PIN against the stored one.
    #[must_use]
    pub fn pin_matches(&self, candidate: &str) -> bool {
        self.has_pin() && get_str(&self.pin) == candidate
    }

    /// Stored PIN digits. Debug-link only; never leaves the device
    /// otherwise.
    #[must_use]
    pub fn pin(&self) -> String {
        get_str(&self.pin)
    }

    /// Set or clear the PIN.
    pub fn set_pin(&mut self, pin: Option<&str>) {
        match pin {
            Some(digits) if !digits.is_empty() => {
                set_str(&mut self.pin, digits);
                self.has_pin = 1;
            }
            _ => {
                self.pin.fill(0);
                self.has_pin = 0;
            }
        }
    }

    /// Consecutive failed PIN attempts.
    #[must_use]
    pub fn pin_failed_attempts(&self) -> u32 {
        u32::from_le_bytes(self.pin_failed_attempts)
    }

    /// Count one more failed attempt.
    pub fn increase_pin_fails(&mut self) {
        self.pin_failed_attempts =
            self.pin_failed_attempts().saturating_add(1).to_le_bytes();
    }

    /// Reset the failure counter after a correct entry.
    pub fn reset_pin_fails(&mut self) {
        self.pin_failed_attempts = [0; 4];
    }

    /// Display language, when set.
    #[must_use]
    pub fn language(&self) -> Option<String> {
        (self.has_language != 0).then(|| get_str(&self.language))
    }

    /// Set the display language. Only `"english"` is recognized.
    pub fn set_language(&mut self, language: &str) {
        if language == "english" {
            set_str(&mut self.language, language);
            self.has_language = 1;
        }
    }

    /// Device label, when set.
    #[must_use]
    pub fn label(&self) -> Option<String> {
        (self.has_label != 0).then(|| get_str(&self.label))
    }

    /// Set the device label.
    pub fn set_label(&mut self, label: &str) {
        set_str(&mut self.label, label);
        self.has_label = 1;
    }

    /// True when the seed was imported rather than generated on-device.
    #[must_use]
    pub fn imported(&self) -> bool {
        self.imported != 0
    }

    /// Mark the seed imported.
    pub fn set_imported(&mut self, imported: bool) {
        self.imported = u8::from(imported);
    }

    /// Look up a policy by name.
    #[must_use]
    pub fn policy_enabled(&self, name: &str) -> bool {
        self.policies
            .iter()
            .any(|p| get_str(&p.name) == name && p.enabled != 0)
    }

    /// Set a policy flag. Unknown names claim the first empty slot.
    pub fn set_policy(&mut self, name: &str, enabled: bool) {
        if let Some(entry) = self
            .policies
            .iter_mut()
            .find(|p| get_str(&p.name) == name || p.name[0] == 0)
        {
            set_str(&mut entry.name, name);
            entry.enabled = u8::from(enabled);
        }
    }

    /// All policy slots, for the `Features` reply.
    #[must_use]
    pub fn policies(&self) -> Vec<(String, bool)> {
        self.policies
            .iter()
            .filter(|p| p.name[0] != 0)
            .map(|p| (get_str(&p.name), p.enabled != 0))
            .collect()
    }

    /// Wipe everything except uuid and format version.
    pub fn reset(&mut self) {
        let uuid = self.uuid;
        let uuid_str = self.uuid_str;
        let seq = self.commit_seq;
        *self = Self::fresh();
        self.uuid = uuid;
        self.uuid_str = uuid_str;
        self.commit_seq = seq;
    }
}

impl std::fmt::Debug for StorageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRecord")
            .field("magic_valid", &self.magic_valid())
            .field("commit_seq", &self.commit_seq())
            .field("format_version", &self.format_version())
            .field("initialized", &self.is_initialized())
            .field("has_pin", &self.has_pin())
            .field("pin_failed_attempts", &self.pin_failed_attempts())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_fits_a_storage_sector() {
        assert!(RECORD_LEN <= 0x4000);
        assert_eq!(RECORD_LEN, 528);
    }

    #[test]
    fn byte_image_round_trip() {
        let mut record = StorageRecord::fresh();
        record.set_uuid([9; 12]);
        record.set_mnemonic("legal winner thank year wave sausage worth useful legal winner thank yellow");
        record.set_pin(Some("1234"));
        record.set_label("my coffer");
        record.set_magic();
        record.advance_commit_seq();

        let bytes = record.as_bytes().to_vec();
        let parsed = StorageRecord::read_from_bytes(&bytes).unwrap();
        assert_eq!(parsed.as_bytes(), record.as_bytes());
        assert_eq!(parsed.mnemonic().as_deref(), record.mnemonic().as_deref());
        assert!(parsed.pin_matches("1234"));
    }

    #[test]
    fn seed_forms_are_exclusive() {
        let mut record = StorageRecord::fresh();
        record.set_mnemonic("abandon ability");
        assert!(record.mnemonic().is_some());
        assert!(record.node().is_none());

        let mut node = StoredNode::new_zeroed();
        node.set_meta(0, 0, 0);
        record.set_node(node);
        assert!(record.mnemonic().is_none());
        assert!(record.node().is_some());
    }

    #[test]
    fn pin_fail_counter_saturates() {
        let mut record = StorageRecord::fresh();
        for _ in 0..5 {
            record.increase_pin_fails();
        }
        assert_eq!(record.pin_failed_attempts(), 5);
        record.reset_pin_fails();
        assert_eq!(record.pin_failed_attempts(), 0);
    }

    #[test]
    fn long_fields_truncate_with_nul() {
        let mut record = StorageRecord::fresh();
        record.set_label(&"x".repeat(100));
        assert_eq!(record.label().map(|l| l.len()), Some(LABEL_LEN - 1));
    }

    #[test]
    fn default_policies() {
        let record = StorageRecord::fresh();
        assert!(record.policy_enabled("Pin Caching"));
        assert!(!record.policy_enabled("ShapeShift"));
        assert_eq!(record.policies().len(), 2);
    }

    proptest::proptest! {
        /// Serialize-then-parse is the identity for any field contents.
        #[test]
        fn byte_image_round_trip_any_fields(
            label in "[ -~]{0,40}",
            mnemonic in "[a-z ]{1,260}",
            pin in "[1-9]{1,8}",
            fails in 0u32..100,
        ) {
            let mut record = StorageRecord::fresh();
            record.set_label(&label);
            record.set_mnemonic(&mnemonic);
            record.set_pin(Some(&pin));
            for _ in 0..fails {
                record.increase_pin_fails();
            }
            record.set_magic();

            let parsed = StorageRecord::parse(record.as_bytes()).unwrap();
            proptest::prop_assert_eq!(parsed.as_bytes(), record.as_bytes());
            proptest::prop_assert_eq!(parsed.pin_failed_attempts(), fails);
            proptest::prop_assert!(parsed.pin_matches(&pin));
        }
    }

    #[test]
    fn reset_preserves_identity() {
        let mut record = StorageRecord::fresh();
        record.set_uuid([7; 12]);
        record.set_mnemonic("abandon ability");
        record.set_pin(Some("9"));
        record.advance_commit_seq();
        let uuid_str = record.uuid_str();

        record.reset();
        assert!(!record.is_initialized());
        assert!(!record.has_pin());
        assert_eq!(record.uuid_str(), uuid_str);
        assert_eq!(record.commit_seq(), 1);
    }
}
