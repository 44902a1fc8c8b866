//! # Key/Record Codec
//!
//! Deterministic, order-preserving binary encoding for keys and records.
//!
//! Keys are fixed-width big-endian so that lexicographic byte order equals
//! numeric order; range scans over a sub-store therefore yield a meaningful
//! logical order (all spans of a source, all versions of a record, all
//! postings of a source after an instant).
//!
//! Records are wrapped in a two-byte envelope (record tag + schema version)
//! followed by a postcard payload. Old records stay readable after payload
//! evolution because evolution is additive-only.

use crate::primitives::SCHEMA_VERSION;
use crate::types::{
    CodecError, EdgeRecord, KairosError, Nid, NodeRecord, SourceRecord, SpanRecord, Timestamp,
    VersionRecord, WindowChain,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

// =============================================================================
// KEY ENCODING
// =============================================================================

/// Encode a NID as a fixed-width big-endian key (8 bytes).
#[must_use]
pub fn nid_key(nid: Nid) -> [u8; 8] {
    nid.0.to_be_bytes()
}

/// Decode an 8-byte NID key.
pub fn decode_nid_key(bytes: &[u8]) -> Result<Nid, CodecError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| CodecError::Truncated(format!("nid key must be 8 bytes, got {}", bytes.len())))?;
    Ok(Nid(u64::from_be_bytes(raw)))
}

/// Encode an `(owner, timestamp)` key (16 bytes, big-endian pair).
///
/// Enables range scans of the form "everything under owner X after time T".
/// Negative timestamps cannot be represented in an order-preserving way and
/// are rejected.
pub fn temporal_key(owner: Nid, at: Timestamp) -> Result<[u8; 16], CodecError> {
    if at.0 < 0 {
        return Err(CodecError::OutOfRange(format!(
            "temporal key requires a non-negative timestamp, got {}",
            at.0
        )));
    }
    let mut key = [0u8; 16];
    key[0..8].copy_from_slice(&owner.0.to_be_bytes());
    key[8..16].copy_from_slice(&(at.0 as u64).to_be_bytes());
    Ok(key)
}

/// Decode a 16-byte temporal key.
pub fn decode_temporal_key(bytes: &[u8]) -> Result<(Nid, Timestamp), CodecError> {
    if bytes.len() != 16 {
        return Err(CodecError::Truncated(format!(
            "temporal key must be 16 bytes, got {}",
            bytes.len()
        )));
    }
    let owner = decode_nid_key(&bytes[0..8])?;
    let raw: [u8; 8] = bytes[8..16]
        .try_into()
        .map_err(|_| CodecError::Truncated("temporal key timestamp".to_string()))?;
    Ok((owner, Timestamp(u64::from_be_bytes(raw) as i64)))
}

/// Encode an `(owner, timestamp, member)` posting key (24 bytes).
///
/// The member NID suffix keeps equal-millisecond facts from one owner from
/// colliding; the first 16 bytes are a plain temporal key, so a temporal
/// range bound also bounds the postings.
pub fn posting_key(owner: Nid, at: Timestamp, member: Nid) -> Result<[u8; 24], CodecError> {
    let prefix = temporal_key(owner, at)?;
    let mut key = [0u8; 24];
    key[0..16].copy_from_slice(&prefix);
    key[16..24].copy_from_slice(&member.0.to_be_bytes());
    Ok(key)
}

/// Decode a 24-byte posting key.
pub fn decode_posting_key(bytes: &[u8]) -> Result<(Nid, Timestamp, Nid), CodecError> {
    if bytes.len() != 24 {
        return Err(CodecError::Truncated(format!(
            "posting key must be 24 bytes, got {}",
            bytes.len()
        )));
    }
    let (owner, at) = decode_temporal_key(&bytes[0..16])?;
    let member = decode_nid_key(&bytes[16..24])?;
    Ok((owner, at, member))
}

/// Encode a `(source, page, y_position)` key (16 bytes, big-endian 8+4+4).
///
/// Orders document-anchored spans by page, then vertical position, so a
/// range scan walks a document in reading order.
#[must_use]
pub fn page_key(source: Nid, page: u32, y_position: u32) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[0..8].copy_from_slice(&source.0.to_be_bytes());
    key[8..12].copy_from_slice(&page.to_be_bytes());
    key[12..16].copy_from_slice(&y_position.to_be_bytes());
    key
}

/// Decode a 16-byte page key.
pub fn decode_page_key(bytes: &[u8]) -> Result<(Nid, u32, u32), CodecError> {
    if bytes.len() != 16 {
        return Err(CodecError::Truncated(format!(
            "page key must be 16 bytes, got {}",
            bytes.len()
        )));
    }
    let source = decode_nid_key(&bytes[0..8])?;
    let page: [u8; 4] = bytes[8..12]
        .try_into()
        .map_err(|_| CodecError::Truncated("page key page".to_string()))?;
    let y: [u8; 4] = bytes[12..16]
        .try_into()
        .map_err(|_| CodecError::Truncated("page key y_position".to_string()))?;
    Ok((source, u32::from_be_bytes(page), u32::from_be_bytes(y)))
}

/// Encode a `(nid, version)` key for the version log (12 bytes, 8+4).
#[must_use]
pub fn version_key(nid: Nid, version: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[0..8].copy_from_slice(&nid.0.to_be_bytes());
    key[8..12].copy_from_slice(&version.to_be_bytes());
    key
}

/// Decode a 12-byte version key.
pub fn decode_version_key(bytes: &[u8]) -> Result<(Nid, u32), CodecError> {
    if bytes.len() != 12 {
        return Err(CodecError::Truncated(format!(
            "version key must be 12 bytes, got {}",
            bytes.len()
        )));
    }
    let nid = decode_nid_key(&bytes[0..8])?;
    let version: [u8; 4] = bytes[8..12]
        .try_into()
        .map_err(|_| CodecError::Truncated("version key version".to_string()))?;
    Ok((nid, u32::from_be_bytes(version)))
}

// =============================================================================
// RECORD ENVELOPE
// =============================================================================

/// Record tags identifying the payload type of an envelope.
///
/// Tags are part of the persisted format; values are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordTag {
    Source = 1,
    Span = 2,
    Node = 3,
    Edge = 4,
    WindowChain = 5,
    Version = 6,
}

/// Encode a record behind its `[tag, schema_version]` envelope.
pub fn encode_record<T: Serialize>(tag: RecordTag, record: &T) -> Result<Vec<u8>, KairosError> {
    let payload =
        postcard::to_allocvec(record).map_err(|e| KairosError::Serialization(e.to_string()))?;
    let mut bytes = Vec::with_capacity(2 + payload.len());
    bytes.push(tag as u8);
    bytes.push(SCHEMA_VERSION);
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode a record, validating tag and schema version first.
///
/// Failures are codec errors, non-fatal to the caller: the damaged record
/// is skipped and counted rather than aborting the read transaction.
pub fn decode_record<T: DeserializeOwned>(tag: RecordTag, bytes: &[u8]) -> Result<T, CodecError> {
    if bytes.len() < 2 {
        return Err(CodecError::Truncated(format!(
            "record envelope must be at least 2 bytes, got {}",
            bytes.len()
        )));
    }
    if bytes[0] != tag as u8 || bytes[1] > SCHEMA_VERSION {
        return Err(CodecError::SchemaMismatch {
            expected: tag as u8,
            actual: bytes[0],
            schema: bytes[1],
        });
    }
    postcard::from_bytes(&bytes[2..]).map_err(|e| CodecError::Truncated(e.to_string()))
}

// Typed wrappers so every component spells records the same way.

pub fn encode_source(record: &SourceRecord) -> Result<Vec<u8>, KairosError> {
    encode_record(RecordTag::Source, record)
}

pub fn decode_source(bytes: &[u8]) -> Result<SourceRecord, CodecError> {
    decode_record(RecordTag::Source, bytes)
}

pub fn encode_span(record: &SpanRecord) -> Result<Vec<u8>, KairosError> {
    encode_record(RecordTag::Span, record)
}

pub fn decode_span(bytes: &[u8]) -> Result<SpanRecord, CodecError> {
    decode_record(RecordTag::Span, bytes)
}

pub fn encode_node(record: &NodeRecord) -> Result<Vec<u8>, KairosError> {
    encode_record(RecordTag::Node, record)
}

pub fn decode_node(bytes: &[u8]) -> Result<NodeRecord, CodecError> {
    decode_record(RecordTag::Node, bytes)
}

pub fn encode_edge(record: &EdgeRecord) -> Result<Vec<u8>, KairosError> {
    encode_record(RecordTag::Edge, record)
}

pub fn decode_edge(bytes: &[u8]) -> Result<EdgeRecord, CodecError> {
    decode_record(RecordTag::Edge, bytes)
}

pub fn encode_chain(record: &WindowChain) -> Result<Vec<u8>, KairosError> {
    encode_record(RecordTag::WindowChain, record)
}

pub fn decode_chain(bytes: &[u8]) -> Result<WindowChain, CodecError> {
    decode_record(RecordTag::WindowChain, bytes)
}

pub fn encode_version(record: &VersionRecord) -> Result<Vec<u8>, KairosError> {
    encode_record(RecordTag::Version, record)
}

pub fn decode_version(bytes: &[u8]) -> Result<VersionRecord, CodecError> {
    decode_record(RecordTag::Version, bytes)
}

// =============================================================================
// TESTS
// =============================================================================
