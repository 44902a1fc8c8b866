//! # Core Type Definitions
//!
//! This module contains all record and identifier types for the KAIROS
//! temporal knowledge store:
//! - Identifiers and scalars (`Nid`, `Timestamp`, `Confidence`, `EdgeWeight`)
//! - Persistent records (`SourceRecord`, `SpanRecord`, `NodeRecord`,
//!   `EdgeRecord`, `ValidityWindow`, `VersionEntry`)
//! - Candidate input types submitted by the extraction pipeline
//! - Error types (`KairosError`, `CodecError`, `ValidationError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Use saturating arithmetic for counters to prevent overflow

use crate::primitives::CONFIDENCE_SCALE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS & SCALARS
// =============================================================================

/// Numeric identifier: a stable 64-bit handle for any stored record.
///
/// Allocated monotonically from the meta counter, inside the same write
/// transaction as the record it names. Never reused; deletion is modeled
/// as a tombstone version, not reclamation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nid(pub u64);

impl Nid {
    /// Get the raw identifier value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Milliseconds since the Unix epoch.
///
/// The core never reads a clock; all timestamps are supplied by callers so
/// that every operation is replayable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Create a timestamp from epoch milliseconds.
    #[must_use]
    pub const fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    /// Get the raw millisecond value.
    #[must_use]
    pub const fn millis(self) -> i64 {
        self.0
    }
}

/// Confidence in fixed-point thousandths: 0 = 0.0, 1000 = 1.0.
///
/// Integer representation keeps the core free of float arithmetic while
/// still expressing the `[0, 1]` range the extraction pipeline reports.
/// Values above the scale are clamped at construction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(from = "u16", into = "u16")]
pub struct Confidence(u16);

impl From<u16> for Confidence {
    fn from(value: u16) -> Self {
        Self::from_thousandths(value)
    }
}

impl From<Confidence> for u16 {
    fn from(value: Confidence) -> u16 {
        value.0
    }
}

impl Confidence {
    /// Create a confidence from thousandths, clamping to the valid range.
    #[must_use]
    pub const fn from_thousandths(value: u16) -> Self {
        if value > CONFIDENCE_SCALE {
            Self(CONFIDENCE_SCALE)
        } else {
            Self(value)
        }
    }

    /// Full confidence (1.0).
    #[must_use]
    pub const fn max() -> Self {
        Self(CONFIDENCE_SCALE)
    }

    /// Get the raw thousandths value.
    #[must_use]
    pub const fn thousandths(self) -> u16 {
        self.0
    }
}

/// Weight of a directed edge.
///
/// Uses i64 with saturating arithmetic to prevent overflow. Higher weight
/// indicates stronger association.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EdgeWeight(pub i64);

impl EdgeWeight {
    /// Create a new edge weight with the given value.
    #[must_use]
    pub const fn new(weight: i64) -> Self {
        Self(weight)
    }

    /// Get the raw weight value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

// =============================================================================
// SOURCES & SPANS
// =============================================================================

/// Kind of ingested source material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceType {
    Document,
    Video,
    Audio,
    WebPage,
}

/// Processing status of a source.
///
/// The only mutable field of a `SourceRecord`; transitions are audited
/// through the version log like every other mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceStatus {
    Pending,
    Processed,
    Failed,
}

/// One ingested document, video, or page.
///
/// Created once at ingestion; immutable apart from `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub nid: Nid,
    pub source_type: SourceType,
    pub uri: String,
    pub title: String,
    pub status: SourceStatus,
    pub ingested_at: Timestamp,
    /// Audit version; bumped only by status transitions.
    pub version: u32,
}

/// Optional page anchor for spans into paginated documents.
///
/// Feeds the page index so spans can be scanned in reading order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageAnchor {
    pub page: u32,
    pub y_position: u32,
}

/// An immutable anchor into a source's raw content.
///
/// Offsets are a time range for media and a byte/char range for text.
/// Owned exclusively by its source; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub nid: Nid,
    pub source_nid: Nid,
    pub start_offset: u64,
    pub end_offset: u64,
    pub text: String,
    pub page: Option<PageAnchor>,
}

// =============================================================================
// NODES
// =============================================================================

/// The four node kinds of the knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Entity,
    Claim,
    Procedure,
    Gap,
}

/// Kind-specific node payload.
///
/// A tagged union so that payload evolution stays additive: new fields get
/// `Option` or `Default` semantics, variants are never repurposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodePayload {
    Entity {
        name: String,
        entity_type: String,
    },
    Claim {
        subject: String,
        statement: String,
        /// Start of the validity window; `None` means unbounded past.
        valid_from: Option<Timestamp>,
        /// End of the validity window; `None` means still valid.
        valid_until: Option<Timestamp>,
    },
    Procedure {
        name: String,
        steps: Vec<String>,
    },
    Gap {
        question: String,
        resolved: bool,
        resolution: Option<String>,
    },
}

impl NodePayload {
    /// The node kind this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::Entity { .. } => NodeKind::Entity,
            Self::Claim { .. } => NodeKind::Claim,
            Self::Procedure { .. } => NodeKind::Procedure,
            Self::Gap { .. } => NodeKind::Gap,
        }
    }

    /// The human-readable label of this payload (name, subject, or question).
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Entity { name, .. } | Self::Procedure { name, .. } => name,
            Self::Claim { subject, .. } => subject,
            Self::Gap { question, .. } => question,
        }
    }
}

/// Terminal marker for a logically deleted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub reason: String,
    pub at: Timestamp,
}

/// A versioned node of the knowledge graph.
///
/// The record at a given version is immutable; payload, confidence, and
/// evidence change only by writing `version + 1` through the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub nid: Nid,
    pub kind: NodeKind,
    pub payload: NodePayload,
    /// Must be non-empty and resolve to existing spans.
    pub evidence_spans: BTreeSet<Nid>,
    pub confidence: Confidence,
    pub version: u32,
    pub created_at: Timestamp,
    pub tombstone: Option<Tombstone>,
}

impl NodeRecord {
    /// Whether this record is logically deleted.
    #[must_use]
    pub const fn is_tombstoned(&self) -> bool {
        self.tombstone.is_some()
    }
}

// =============================================================================
// EDGES
// =============================================================================

/// Directed edge kinds.
///
/// `Supports` chains feed evidence-chain traversal and must stay acyclic;
/// the repository rejects closures at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeType {
    Mentions,
    Supports,
    Contradicts,
    RelatedTo,
}

/// A versioned directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub nid: Nid,
    pub edge_type: EdgeType,
    pub from_nid: Nid,
    pub to_nid: Nid,
    pub weight: EdgeWeight,
    pub version: u32,
    pub tombstone: Option<Tombstone>,
}

impl EdgeRecord {
    /// Whether this record is logically deleted.
    #[must_use]
    pub const fn is_tombstoned(&self) -> bool {
        self.tombstone.is_some()
    }
}

// =============================================================================
// VALIDITY WINDOWS
// =============================================================================

/// The time interval during which a claim is considered true.
///
/// `None` bounds are open ends: unbounded past for `valid_from`, "still
/// valid" for `valid_until`. Open ends are evaluated lazily at query time;
/// no sentinel timestamp is ever materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    /// The window's own identifier, so supersession links stay stable.
    pub nid: Nid,
    pub claim_nid: Nid,
    pub valid_from: Option<Timestamp>,
    pub valid_until: Option<Timestamp>,
    /// NID of the window that closed this one, if any.
    pub superseded_by: Option<Nid>,
}

impl ValidityWindow {
    /// Whether the window is still open (no `valid_until`).
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.valid_until.is_none()
    }

    /// Whether the window covers the given instant (`from <= at < until`).
    #[must_use]
    pub fn covers(&self, at: Timestamp) -> bool {
        let after_start = self.valid_from.is_none_or(|from| from <= at);
        let before_end = self.valid_until.is_none_or(|until| at < until);
        after_start && before_end
    }
}

/// The full window chain of one claim, newest last.
///
/// Stored as a single record per claim and rewritten read-modify-write
/// inside the claim's own transaction, so insertion and closure of the
/// prior window are atomic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WindowChain {
    pub windows: Vec<ValidityWindow>,
}

impl WindowChain {
    /// The currently open window, if any.
    ///
    /// Invariant: at most one window per claim is open at any time.
    #[must_use]
    pub fn open_window(&self) -> Option<&ValidityWindow> {
        self.windows.iter().find(|w| w.is_open())
    }

    /// The most recent window (open or closed).
    #[must_use]
    pub fn current(&self) -> Option<&ValidityWindow> {
        self.windows.last()
    }

    /// Whether any window covers the given instant.
    #[must_use]
    pub fn covers(&self, at: Timestamp) -> bool {
        self.windows.iter().any(|w| w.covers(at))
    }
}

// =============================================================================
// VERSION LOG
// =============================================================================

/// What a version log entry records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    Created,
    Revised,
    StatusChanged,
    Resolved,
    Tombstoned { reason: String },
}

/// One append-only audit entry.
///
/// The sequence of entries for a NID is its full history: strictly
/// increasing versions, no gaps, never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub nid: Nid,
    pub version: u32,
    pub prior_version: Option<u32>,
    pub mutation: MutationKind,
    pub actor: String,
    pub timestamp: Timestamp,
    /// FNV-1a 64 over the encoded body, for tamper evidence.
    pub payload_hash: u64,
}

/// Snapshot of the record body at one version.
///
/// Storing the full body (not just a hash) is what makes point-in-time
/// reconstruction possible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionBody {
    Source(SourceRecord),
    Span(SpanRecord),
    Node(NodeRecord),
    Edge(EdgeRecord),
}

/// Entry plus body, as stored in the version log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub entry: VersionEntry,
    pub body: VersionBody,
}

// =============================================================================
// CANDIDATES (extraction pipeline input)
// =============================================================================

/// A node candidate submitted by the extraction pipeline.
///
/// The repository is the sole admission point; candidates are validated
/// against the data-model invariants before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateNode {
    pub payload: NodePayload,
    pub evidence_spans: BTreeSet<Nid>,
    pub confidence: Confidence,
    pub created_at: Timestamp,
}

/// Endpoint of a candidate edge: an existing node or an index into the
/// batch's own candidate nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeEndpoint {
    Existing(Nid),
    Batch(usize),
}

/// An edge candidate submitted by the extraction pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEdge {
    pub edge_type: EdgeType,
    pub from: EdgeEndpoint,
    pub to: EdgeEndpoint,
    pub weight: EdgeWeight,
}

/// A batch of candidates admitted in one transaction, all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CandidateBatch {
    pub nodes: Vec<CandidateNode>,
    pub edges: Vec<CandidateEdge>,
}

/// NIDs assigned to an admitted batch, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionReceipt {
    pub node_nids: Vec<Nid>,
    pub edge_nids: Vec<Nid>,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors from key encoding and record decoding.
///
/// Codec errors are recoverable locally: a damaged record is skipped and
/// counted, never aborts the surrounding read.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A value cannot be represented in the key format.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// Key or record bytes are shorter or more garbled than the format allows.
    #[error("truncated record: {0}")]
    Truncated(String),

    /// Record tag or schema version does not match what the caller expected.
    #[error("schema mismatch: expected tag {expected}, got tag {actual} (schema {schema})")]
    SchemaMismatch {
        expected: u8,
        actual: u8,
        schema: u8,
    },
}

/// Errors from invariant enforcement at write time.
///
/// A validation failure aborts the write transaction; no partial mutation
/// is ever visible.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A node was submitted without evidence.
    #[error("evidence set is empty")]
    EmptyEvidence,

    /// An evidence reference does not resolve to an existing span.
    #[error("span {0:?} does not exist")]
    DanglingSpan(Nid),

    /// An edge endpoint does not resolve to an existing node.
    #[error("node {0:?} does not exist")]
    DanglingNode(Nid),

    /// The addressed record does not exist.
    #[error("record {0:?} not found")]
    NotFound(Nid),

    /// The addressed record is logically deleted.
    #[error("record {0:?} is tombstoned")]
    Tombstoned(Nid),

    /// A revision tried to change the payload to a different node kind.
    #[error("kind mismatch on {nid:?}: record is {actual:?}, revision is {submitted:?}")]
    KindMismatch {
        nid: Nid,
        actual: NodeKind,
        submitted: NodeKind,
    },

    /// A Supports edge would close a directed cycle.
    #[error("supports edge {from:?} -> {to:?} would close a cycle")]
    CycleDetected { from: Nid, to: Nid },

    /// Optimistic concurrency check failed.
    #[error("version conflict on {nid:?}: expected {expected}, found {found}")]
    VersionConflict { nid: Nid, expected: u32, found: u32 },

    /// A new validity window starts before the currently open one.
    #[error("window for claim {claim:?} would start before the open window")]
    WindowOrder { claim: Nid },

    /// A submitted validity window ends before it starts.
    #[error("window for claim {claim:?} ends before it starts")]
    WindowBounds { claim: Nid },

    /// An input exceeds a hardcoded limit.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
}

/// Errors that can occur in the KAIROS store.
///
/// - No silent failures
/// - Use `Result<T, KairosError>` for fallible operations
/// - The core never panics; all errors are recoverable by the caller
#[derive(Debug, Error)]
pub enum KairosError {
    /// Key encoding or record decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A data-model invariant would be violated; the write was aborted.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The storage engine failed (I/O, disk full, lock poisoning).
    #[error("resource error: {0}")]
    Resource(String),

    /// Record serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<redb::DatabaseError> for KairosError {
    fn from(e: redb::DatabaseError) -> Self {
        Self::Resource(e.to_string())
    }
}

impl From<redb::TransactionError> for KairosError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Resource(e.to_string())
    }
}

impl From<redb::TableError> for KairosError {
    fn from(e: redb::TableError) -> Self {
        Self::Resource(e.to_string())
    }
}

impl From<redb::StorageError> for KairosError {
    fn from(e: redb::StorageError) -> Self {
        Self::Resource(e.to_string())
    }
}

impl From<redb::CommitError> for KairosError {
    fn from(e: redb::CommitError) -> Self {
        Self::Resource(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
