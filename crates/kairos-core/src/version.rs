//! # Version/Audit Log
//!
//! Append-only record of every mutation, keyed by `(nid, version)`.
//!
//! Each entry stores the audit metadata (who, when, what kind of mutation)
//! together with a full snapshot of the record body at that version, so
//! "what did the graph look like at version V of node N" is a point lookup
//! and point-in-time reconstruction needs no replay machinery. Entries are
//! never rewritten.

use crate::codec;
use crate::store::{KvRead, Snapshot, SubStore, WriteTxn};
use crate::types::{KairosError, Nid, VersionBody, VersionRecord};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64 over raw bytes.
///
/// Deterministic across processes and releases, unlike `DefaultHasher`.
/// Tamper evidence only; for cryptographic verification use the canonical
/// export digest.
#[must_use]
pub fn payload_hash(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Hash of a version body's serialized form.
pub fn hash_body(body: &VersionBody) -> Result<u64, KairosError> {
    let bytes =
        postcard::to_allocvec(body).map_err(|e| KairosError::Serialization(e.to_string()))?;
    Ok(payload_hash(&bytes))
}

/// Append one entry to the log, inside the caller's transaction.
///
/// The caller guarantees version numbering (strictly increasing, gap-free
/// per NID); the log itself never interprets versions.
pub fn append(txn: &WriteTxn, record: &VersionRecord) -> Result<(), KairosError> {
    let key = codec::version_key(record.entry.nid, record.entry.version);
    let bytes = codec::encode_version(record)?;
    txn.put(SubStore::VersionLog, &key, &bytes)
}

/// The audit history of one NID, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct History {
    pub records: Vec<VersionRecord>,
    /// Damaged log entries skipped during the scan.
    pub skipped: usize,
}

/// Full history of a NID: a pure range scan, finite and restartable.
pub fn history(snap: &Snapshot, nid: Nid) -> Result<History, KairosError> {
    let prefix = codec::nid_key(nid);
    let start = codec::version_key(nid, 0);
    let mut result = History::default();

    for entry in snap.range_from(SubStore::VersionLog, &start)? {
        let (key, value) = entry?;
        if key.len() != 12 || key[0..8] != prefix {
            break;
        }
        match codec::decode_version(&value) {
            Ok(record) => result.records.push(record),
            Err(_) => result.skipped += 1,
        }
    }
    Ok(result)
}

/// The exact record body at one version, if that version exists.
pub fn record_at(
    view: &impl KvRead,
    nid: Nid,
    version: u32,
) -> Result<Option<VersionRecord>, KairosError> {
    let key = codec::version_key(nid, version);
    match view.get_raw(SubStore::VersionLog, &key)? {
        Some(bytes) => Ok(Some(codec::decode_version(&bytes)?)),
        None => Ok(None),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::types::{MutationKind, SourceRecord, SourceStatus, SourceType, Timestamp, VersionEntry};
    use tempfile::tempdir;

    fn sample_record(nid: u64, version: u32) -> VersionRecord {
        let body = VersionBody::Source(SourceRecord {
            nid: Nid(nid),
            source_type: SourceType::Document,
            uri: "file:///notes.pdf".into(),
            title: "notes".into(),
            status: SourceStatus::Pending,
            ingested_at: Timestamp(1_000),
            version,
        });
        VersionRecord {
            entry: VersionEntry {
                nid: Nid(nid),
                version,
                prior_version: version.checked_sub(1).filter(|v| *v > 0),
                mutation: if version == 1 {
                    MutationKind::Created
                } else {
                    MutationKind::StatusChanged
                },
                actor: "test".into(),
                timestamp: Timestamp(1_000 + i64::from(version)),
                payload_hash: hash_body(&body).expect("hash"),
            },
            body,
        }
    }

    #[test]
    fn payload_hash_is_stable() {
        // FNV-1a test vectors.
        assert_eq!(payload_hash(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(payload_hash(b"a"), 0xaf63_dc4c_8601_ec8c);
        // Deterministic across calls.
        assert_eq!(payload_hash(b"kairos"), payload_hash(b"kairos"));
        assert_ne!(payload_hash(b"kairos"), payload_hash(b"kairo"));
    }

    #[test]
    fn history_is_ordered_and_complete() {
        let temp = tempdir().expect("temp dir");
        let store = Store::open(temp.path().join("t.kairos")).expect("open");

        let txn = store.begin_write().expect("write");
        // Append out of order; the log scan must come back sorted by version.
        append(&txn, &sample_record(7, 2)).expect("append");
        append(&txn, &sample_record(7, 1)).expect("append");
        append(&txn, &sample_record(7, 3)).expect("append");
        // A different NID must not leak into the history.
        append(&txn, &sample_record(8, 1)).expect("append");
        txn.commit().expect("commit");

        let snap = store.begin_read().expect("read");
        let history = history(&snap, Nid(7)).expect("history");
        let versions: Vec<u32> = history.records.iter().map(|r| r.entry.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(history.skipped, 0);
    }

    #[test]
    fn record_at_returns_exact_version() {
        let temp = tempdir().expect("temp dir");
        let store = Store::open(temp.path().join("t.kairos")).expect("open");

        let txn = store.begin_write().expect("write");
        append(&txn, &sample_record(7, 1)).expect("append");
        append(&txn, &sample_record(7, 2)).expect("append");
        txn.commit().expect("commit");

        let snap = store.begin_read().expect("read");
        let record = record_at(&snap, Nid(7), 2).expect("read").expect("some");
        assert_eq!(record.entry.version, 2);
        assert!(record_at(&snap, Nid(7), 9).expect("read").is_none());
    }

    #[test]
    fn damaged_entries_are_counted_not_fatal() {
        let temp = tempdir().expect("temp dir");
        let store = Store::open(temp.path().join("t.kairos")).expect("open");

        let txn = store.begin_write().expect("write");
        append(&txn, &sample_record(7, 1)).expect("append");
        // Corrupt entry written under a valid key.
        txn.put(
            SubStore::VersionLog,
            &codec::version_key(Nid(7), 2),
            &[0xFF, 0xFF, 0xFF],
        )
        .expect("put");
        txn.commit().expect("commit");

        let snap = store.begin_read().expect("read");
        let history = history(&snap, Nid(7)).expect("history");
        assert_eq!(history.records.len(), 1);
        assert_eq!(history.skipped, 1);
    }
}
