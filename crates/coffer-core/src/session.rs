//! Session-scoped secret cache.
//!
//! The derived root node and the host-supplied passphrase live here and
//! only here. Both are discarded on `ClearSession`, on `Initialize`, on
//! any PIN failure, on wipe and at reset; the cache never touches flash.

use coffer_crypto::{legacy, mnemonic, HdNode};
use zeroize::Zeroizing;

use crate::storage::StorageRecord;

/// What [`Session::root_node`] found.
pub enum RootSource<'a> {
    /// Root is cached or was just derived.
    Ready(&'a HdNode),
    /// Seed derivation needs the session passphrase first.
    NeedPassphrase,
    /// No seed in storage.
    Uninitialized,
    /// Stored node bytes were invalid.
    Corrupt,
}

/// In-RAM cache of session secrets.
#[derive(Default)]
pub struct Session {
    root: Option<HdNode>,
    passphrase: Option<Zeroizing<String>>,
    pin_cached: bool,
}

impl Session {
    /// Fresh, empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard everything.
    pub fn clear(&mut self) {
        self.root = None;
        self.passphrase = None;
        self.pin_cached = false;
    }

    /// Cache the session passphrase.
    pub fn cache_passphrase(&mut self, passphrase: String) {
        self.passphrase = Some(Zeroizing::new(passphrase));
    }

    /// True when a passphrase was supplied this session.
    #[must_use]
    pub fn passphrase_cached(&self) -> bool {
        self.passphrase.is_some()
    }

    /// True when a correct PIN was entered this session.
    #[must_use]
    pub fn pin_cached(&self) -> bool {
        self.pin_cached
    }

    /// Record a successful PIN entry.
    pub fn cache_pin(&mut self) {
        self.pin_cached = true;
    }

    /// Drop only the derived root, keeping the passphrase.
    pub fn invalidate_root(&mut self) {
        self.root = None;
    }

    /// True when the root is already derived.
    #[must_use]
    pub fn has_root(&self) -> bool {
        self.root.is_some()
    }

    /// The session root node, deriving it on first use.
    ///
    /// Derivation can take seconds; `progress` keeps the display alive.
    pub fn root_node(
        &mut self,
        record: &StorageRecord,
        mut progress: impl FnMut(u32, u32),
    ) -> RootSource<'_> {
        if self.root.is_some() {
            // INVARIANT: checked is_some right above.
            #[allow(clippy::expect_used)]
            return RootSource::Ready(self.root.as_ref().expect("cached root"));
        }

        let needs_passphrase = record.passphrase_protection();
        if needs_passphrase && self.passphrase.is_none() {
            return RootSource::NeedPassphrase;
        }
        let passphrase = self.passphrase.as_ref().map_or("", |p| p.as_str());

        if let Some(stored) = record.node() {
            let mut chain_code = stored.chain_code;
            let mut private_key = stored.private_key;
            if needs_passphrase && !passphrase.is_empty() {
                // Legacy encrypted-node storage.
                if legacy::decrypt_node_fields(
                    passphrase,
                    &mut chain_code,
                    &mut private_key,
                    &mut progress,
                )
                .is_err()
                {
                    return RootSource::Corrupt;
                }
            }
            let Ok(node) = HdNode::from_parts(
                stored.depth(),
                stored.fingerprint(),
                stored.child_num(),
                chain_code,
                private_key,
            ) else {
                return RootSource::Corrupt;
            };
            self.root = Some(node);
        } else if let Some(sentence) = record.mnemonic() {
            let seed = mnemonic::to_seed(&sentence, passphrase, &mut progress);
            let Ok(node) = HdNode::from_seed(seed.as_ref()) else {
                return RootSource::Corrupt;
            };
            self.root = Some(node);
        } else {
            return RootSource::Uninitialized;
        }

        // INVARIANT: both arms above either returned or set the root.
        #[allow(clippy::expect_used)]
        RootSource::Ready(self.root.as_ref().expect("root just derived"))
    }
}
