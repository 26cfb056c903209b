//! Record format migrations.
//!
//! Slots are read with the format version they were written under, then
//! upgraded step by step to the current layout. A slot written by newer
//! firmware is refused; the device must never downgrade a record silently.

use zerocopy::{FromBytes, FromZeros, IntoBytes};

use super::record::{StorageRecord, RECORD_LEN, STORAGE_FORMAT_VERSION, V1_RECORD_LEN};

/// Outcome of reading a slot image.
#[derive(Debug)]
pub enum Upgrade {
    /// Record parsed (and migrated when needed).
    Ready(Box<StorageRecord>),
    /// Written by newer firmware; do not touch.
    Newer(u32),
    /// Unparseable or from an unsupported ancient version.
    Unusable,
}

/// Parse a slot image, running the migration chain as needed.
#[must_use]
pub fn upgrade(bytes: &[u8]) -> Upgrade {
    if bytes.len() < 12 {
        return Upgrade::Unusable;
    }
    let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    match version {
        STORAGE_FORMAT_VERSION => read_current(bytes),
        1 => migrate_v1(bytes),
        0 => Upgrade::Unusable,
        newer => Upgrade::Newer(newer),
    }
}

fn read_current(bytes: &[u8]) -> Upgrade {
    if bytes.len() < RECORD_LEN {
        return Upgrade::Unusable;
    }
    match StorageRecord::read_from_bytes(&bytes[..RECORD_LEN]) {
        Ok(record) => Upgrade::Ready(Box::new(record)),
        Err(_) => Upgrade::Unusable,
    }
}

/// v1 records end right after the `imported` flag; the policy table and
/// reserved tail were appended in v2. The prefix layout is unchanged, so
/// migration is a prefix copy plus defaults for the new fields.
fn migrate_v1(bytes: &[u8]) -> Upgrade {
    if bytes.len() < V1_RECORD_LEN {
        return Upgrade::Unusable;
    }
    let mut record = StorageRecord::new_zeroed();
    record.as_mut_bytes()[..V1_RECORD_LEN].copy_from_slice(&bytes[..V1_RECORD_LEN]);
    record.set_format_version(STORAGE_FORMAT_VERSION);
    record.set_policy("ShapeShift", false);
    record.set_policy("Pin Caching", true);
    tracing::debug!(from = 1, to = STORAGE_FORMAT_VERSION, "storage record migrated");
    Upgrade::Ready(Box::new(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_version_reads_directly() {
        let mut record = StorageRecord::fresh();
        record.set_magic();
        record.set_label("unchanged");
        match upgrade(record.as_bytes()) {
            Upgrade::Ready(read) => assert_eq!(read.label().as_deref(), Some("unchanged")),
            other => unreachable!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn v1_record_gains_policies() {
        let mut record = StorageRecord::fresh();
        record.set_magic();
        record.set_mnemonic("abandon ability");
        record.set_pin(Some("77"));
        // Forge a v1 image: same prefix, truncated, version 1.
        let mut v1 = record.as_bytes()[..V1_RECORD_LEN].to_vec();
        v1[8..12].copy_from_slice(&1u32.to_le_bytes());

        match upgrade(&v1) {
            Upgrade::Ready(read) => {
                assert_eq!(read.format_version(), STORAGE_FORMAT_VERSION);
                assert!(read.pin_matches("77"));
                assert!(read.policy_enabled("Pin Caching"));
            }
            other => unreachable!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn newer_version_refused() {
        let mut record = StorageRecord::fresh();
        record.set_magic();
        let mut bytes = record.as_bytes().to_vec();
        bytes[8..12].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(upgrade(&bytes), Upgrade::Newer(99)));
    }

    #[test]
    fn garbage_is_unusable() {
        assert!(matches!(upgrade(&[0u8; 4]), Upgrade::Unusable));
    }
}
