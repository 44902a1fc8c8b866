//! # Canonical Export
//!
//! Deterministic, bit-exact serialization of the whole store.
//!
//! The redb database file is not guaranteed bit-identical across runs, so
//! the canonical export stream is the source of truth for verification,
//! backup, and re-ingestion by a future store version. Records are emitted
//! in key order from a single snapshot; same data always yields the same
//! bytes.
//!
//! Format: 4 magic bytes + 1 version byte + 8-byte FNV-1a checksum of the
//! payload + postcard payload. The checksum is validated before the payload
//! is deserialized; oversized streams are rejected before any allocation of
//! consequence.

use crate::codec;
use crate::store::SubStore;
use crate::repo::Repository;
use crate::types::{
    EdgeRecord, KairosError, Nid, NodeRecord, SourceRecord, SpanRecord, Timestamp, VersionRecord,
    WindowChain,
};
use crate::version::payload_hash;
use serde::{Deserialize, Serialize};

/// Magic bytes for the canonical export format.
pub const CANONICAL_MAGIC: [u8; 4] = *b"KAIX";

/// Current canonical format version.
pub const CANONICAL_VERSION: u8 = 1;

/// Byte length of the fixed header (magic + version + checksum).
const HEADER_SIZE: usize = 13;

/// Maximum allowed export payload size (500 MB).
///
/// Validated before deserialization to prevent allocation-based DoS from
/// corrupted or malicious streams.
pub const MAX_EXPORT_PAYLOAD_SIZE: usize = 500 * 1024 * 1024;

/// Maximum record count per class accepted on import.
pub const MAX_IMPORT_RECORD_COUNT: usize = 10_000_000;

/// Parsed header of a canonical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub checksum: u64,
}

/// The full store contents in canonical (key-ordered) form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CanonicalStore {
    pub sources: Vec<SourceRecord>,
    pub spans: Vec<SpanRecord>,
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
    /// Window chains, keyed by claim NID.
    pub chains: Vec<(Nid, WindowChain)>,
    /// Source/time postings: (source, timestamp, member).
    pub postings: Vec<(Nid, Timestamp, Nid)>,
    /// Page index entries: (source, page, y_position, span).
    pub pages: Vec<(Nid, u32, u32, Nid)>,
    pub versions: Vec<VersionRecord>,
    pub next_nid: u64,
}

/// Serialize the whole store from one snapshot.
///
/// Fails on the first damaged record: an export must be exact or not at
/// all, unlike query paths which skip and count.
pub fn export_canonical(repo: &Repository) -> Result<Vec<u8>, KairosError> {
    let snap = repo.snapshot()?;
    let mut store = CanonicalStore::default();

    for entry in snap.iter(SubStore::Sources)? {
        store.sources.push(codec::decode_source(&entry?.1)?);
    }
    for entry in snap.iter(SubStore::Spans)? {
        store.spans.push(codec::decode_span(&entry?.1)?);
    }
    for entry in snap.iter(SubStore::Nodes)? {
        store.nodes.push(codec::decode_node(&entry?.1)?);
    }
    for entry in snap.iter(SubStore::Edges)? {
        store.edges.push(codec::decode_edge(&entry?.1)?);
    }
    for entry in snap.iter(SubStore::TemporalIndex)? {
        let (key, value) = entry?;
        // 8-byte keys are window chains, 24-byte keys are postings.
        if key.len() == 8 {
            store
                .chains
                .push((codec::decode_nid_key(&key)?, codec::decode_chain(&value)?));
        } else {
            store.postings.push(codec::decode_posting_key(&key)?);
        }
    }
    for entry in snap.iter(SubStore::PageIndex)? {
        let (key, value) = entry?;
        let (source, page, y) = codec::decode_page_key(&key)?;
        store.pages.push((source, page, y, codec::decode_nid_key(&value)?));
    }
    for entry in snap.iter(SubStore::VersionLog)? {
        store.versions.push(codec::decode_version(&entry?.1)?);
    }

    store.next_nid = match snap.get(SubStore::Meta, b"next_nid")? {
        Some(bytes) => u64::from_be_bytes(bytes.as_slice().try_into().map_err(|_| {
            KairosError::Serialization("meta counter has invalid width".to_string())
        })?),
        None => 1,
    };

    let payload =
        postcard::to_allocvec(&store).map_err(|e| KairosError::Serialization(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&CANONICAL_MAGIC);
    bytes.push(CANONICAL_VERSION);
    bytes.extend_from_slice(&payload_hash(&payload).to_be_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Validate header, bounds, and checksum without deserializing the payload.
pub fn verify_canonical(bytes: &[u8]) -> Result<CanonicalHeader, KairosError> {
    if bytes.len() < HEADER_SIZE {
        return Err(KairosError::Serialization(
            "canonical stream shorter than header".to_string(),
        ));
    }
    if bytes.len() > MAX_EXPORT_PAYLOAD_SIZE {
        return Err(KairosError::Serialization(format!(
            "canonical stream of {} bytes exceeds maximum {} bytes",
            bytes.len(),
            MAX_EXPORT_PAYLOAD_SIZE
        )));
    }

    let mut magic = [0u8; 4];
    magic.copy_from_slice(&bytes[0..4]);
    let version = bytes[4];
    let mut checksum_bytes = [0u8; 8];
    checksum_bytes.copy_from_slice(&bytes[5..13]);
    let checksum = u64::from_be_bytes(checksum_bytes);

    if magic != CANONICAL_MAGIC {
        return Err(KairosError::Serialization(
            "invalid canonical format".to_string(),
        ));
    }
    if version != CANONICAL_VERSION {
        return Err(KairosError::Serialization(format!(
            "unsupported canonical version: {} (expected {})",
            version, CANONICAL_VERSION
        )));
    }
    if payload_hash(&bytes[HEADER_SIZE..]) != checksum {
        return Err(KairosError::Serialization(
            "canonical checksum mismatch".to_string(),
        ));
    }

    Ok(CanonicalHeader {
        magic,
        version,
        checksum,
    })
}

/// Parse a canonical stream after verifying it.
pub fn import_canonical(bytes: &[u8]) -> Result<CanonicalStore, KairosError> {
    verify_canonical(bytes)?;
    let store: CanonicalStore = postcard::from_bytes(&bytes[HEADER_SIZE..])
        .map_err(|e| KairosError::Serialization(format!("canonical payload: {}", e)))?;

    for (what, count) in [
        ("sources", store.sources.len()),
        ("spans", store.spans.len()),
        ("nodes", store.nodes.len()),
        ("edges", store.edges.len()),
        ("versions", store.versions.len()),
    ] {
        if count > MAX_IMPORT_RECORD_COUNT {
            return Err(KairosError::Serialization(format!(
                "{count} {what} exceed import maximum {MAX_IMPORT_RECORD_COUNT}"
            )));
        }
    }
    Ok(store)
}

/// Write a parsed canonical store into an empty repository, one transaction.
///
/// NIDs and the allocation counter are preserved exactly, so an export
/// followed by an import is lossless and a re-export is bit-identical.
pub fn import_into(repo: &Repository, canonical: &CanonicalStore) -> Result<(), KairosError> {
    let (sources, spans, nodes, edges) = repo.counts()?;
    if sources + spans + nodes + edges > 0 {
        return Err(KairosError::Serialization(
            "canonical import requires an empty store".to_string(),
        ));
    }

    let txn = repo.store().begin_write()?;
    let result = (|| -> Result<(), KairosError> {
        for record in &canonical.sources {
            txn.put(
                SubStore::Sources,
                &codec::nid_key(record.nid),
                &codec::encode_source(record)?,
            )?;
        }
        for record in &canonical.spans {
            txn.put(
                SubStore::Spans,
                &codec::nid_key(record.nid),
                &codec::encode_span(record)?,
            )?;
        }
        for record in &canonical.nodes {
            txn.put(
                SubStore::Nodes,
                &codec::nid_key(record.nid),
                &codec::encode_node(record)?,
            )?;
        }
        for record in &canonical.edges {
            txn.put(
                SubStore::Edges,
                &codec::nid_key(record.nid),
                &codec::encode_edge(record)?,
            )?;
        }
        for (claim, chain) in &canonical.chains {
            txn.put(
                SubStore::TemporalIndex,
                &codec::nid_key(*claim),
                &codec::encode_chain(chain)?,
            )?;
        }
        for (source, at, member) in &canonical.postings {
            let key = codec::posting_key(*source, *at, *member)?;
            txn.put(SubStore::TemporalIndex, &key, &codec::nid_key(*member))?;
        }
        for (source, page, y, span) in &canonical.pages {
            let key = codec::page_key(*source, *page, *y);
            txn.put(SubStore::PageIndex, &key, &codec::nid_key(*span))?;
        }
        for record in &canonical.versions {
            crate::version::append(&txn, record)?;
        }
        txn.put(
            SubStore::Meta,
            b"next_nid",
            &canonical.next_nid.to_be_bytes(),
        )
    })();

    match result {
        Ok(()) => txn.commit(),
        Err(e) => {
            txn.abort()?;
            Err(e)
        }
    }
}

/// BLAKE3 digest of a canonical stream, for cryptographic verification.
#[cfg(feature = "crypto-hash")]
#[must_use]
pub fn export_digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::repo::{NewSource, NewSpan};
    use crate::types::{
        CandidateNode, Confidence, EdgeType, EdgeWeight, NodePayload, SourceType,
    };
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn populated_repo(path: &std::path::Path) -> Repository {
        let repo = Repository::open(path).expect("open repo");
        let source = repo
            .create_source(
                NewSource {
                    source_type: SourceType::WebPage,
                    uri: "https://example.org/article".into(),
                    title: "article".into(),
                    ingested_at: Timestamp(1_000),
                },
                "ingestor",
            )
            .expect("source");
        let span = repo
            .create_span(
                NewSpan {
                    source_nid: source,
                    start_offset: 0,
                    end_offset: 50,
                    text: "the claim text".into(),
                    page: Some(crate::types::PageAnchor {
                        page: 2,
                        y_position: 120,
                    }),
                },
                "ingestor",
                Timestamp(1_001),
            )
            .expect("span");
        let claim = repo
            .create_node(
                CandidateNode {
                    payload: NodePayload::Claim {
                        subject: "weather".into(),
                        statement: "it rained".into(),
                        valid_from: Some(Timestamp(0)),
                        valid_until: Some(Timestamp(500)),
                    },
                    evidence_spans: BTreeSet::from([span]),
                    confidence: Confidence::from_thousandths(800),
                    created_at: Timestamp(2_000),
                },
                "pipeline",
            )
            .expect("claim");
        let entity = repo
            .create_node(
                CandidateNode {
                    payload: NodePayload::Entity {
                        name: "rain".into(),
                        entity_type: "phenomenon".into(),
                    },
                    evidence_spans: BTreeSet::from([span]),
                    confidence: Confidence::from_thousandths(900),
                    created_at: Timestamp(2_001),
                },
                "pipeline",
            )
            .expect("entity");
        repo.create_edge(
            EdgeType::Mentions,
            claim,
            entity,
            EdgeWeight::new(1),
            "pipeline",
            Timestamp(2_002),
        )
        .expect("edge");
        repo
    }

    #[test]
    fn export_import_reexport_is_bit_exact() {
        let temp = tempdir().expect("temp dir");
        let repo = populated_repo(&temp.path().join("a.kairos"));

        let bytes1 = export_canonical(&repo).expect("export");
        verify_canonical(&bytes1).expect("verify");

        let canonical = import_canonical(&bytes1).expect("import parse");
        let restored = Repository::open(temp.path().join("b.kairos")).expect("open");
        import_into(&restored, &canonical).expect("import");

        let bytes2 = export_canonical(&restored).expect("re-export");
        assert_eq!(
            bytes1, bytes2,
            "export -> import -> export must produce identical bytes"
        );
    }

    #[test]
    fn import_preserves_nid_allocation() {
        let temp = tempdir().expect("temp dir");
        let repo = populated_repo(&temp.path().join("a.kairos"));
        let canonical = import_canonical(&export_canonical(&repo).expect("export")).expect("parse");

        let restored = Repository::open(temp.path().join("b.kairos")).expect("open");
        import_into(&restored, &canonical).expect("import");

        // A fresh source in the restored store continues the NID sequence.
        let fresh = restored
            .create_source(
                NewSource {
                    source_type: SourceType::Document,
                    uri: "file:///new.pdf".into(),
                    title: "new".into(),
                    ingested_at: Timestamp(9_000),
                },
                "ingestor",
            )
            .expect("source");
        assert_eq!(fresh.0, canonical.next_nid);
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = vec![0u8; 32];
        bytes[0..4].copy_from_slice(b"XXXX");
        assert!(verify_canonical(&bytes).is_err());
    }

    #[test]
    fn corrupted_payload_rejected_by_checksum() {
        let temp = tempdir().expect("temp dir");
        let repo = populated_repo(&temp.path().join("a.kairos"));

        let mut bytes = export_canonical(&repo).expect("export");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(verify_canonical(&bytes).is_err());
    }

    #[test]
    fn import_into_nonempty_store_rejected() {
        let temp = tempdir().expect("temp dir");
        let repo = populated_repo(&temp.path().join("a.kairos"));
        let canonical = import_canonical(&export_canonical(&repo).expect("export")).expect("parse");

        // The same (non-empty) repository must refuse the import.
        assert!(import_into(&repo, &canonical).is_err());
    }

    #[cfg(feature = "crypto-hash")]
    #[test]
    fn digest_is_stable_for_identical_exports() {
        let temp = tempdir().expect("temp dir");
        let repo = populated_repo(&temp.path().join("a.kairos"));
        let bytes = export_canonical(&repo).expect("export");
        assert_eq!(export_digest(&bytes), export_digest(&bytes));
        assert_eq!(export_digest(&bytes).len(), 64);
    }
}
