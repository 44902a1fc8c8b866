//! # kairos-core
//!
//! The embedded temporal knowledge hypergraph store - THE STORE.
//!
//! KAIROS records entities, claims, procedures, and knowledge gaps as
//! versioned graph nodes and edges, each anchored to source evidence and to
//! a validity window in time. The store guarantees:
//! - stable binary key ordering for efficient range scans
//! - append-only auditability (records are superseded, never mutated)
//! - temporal consistency via Allen interval algebra
//! - snapshot-isolated reads while a single serialized writer ingests
//!
//! ## Architectural Constraints
//!
//! The core:
//! - Is synchronous and deterministic: no async, no network, no floats,
//!   no clock reads (timestamps always come from callers)
//! - Is the sole admission point: extractors submit candidates, the
//!   repository validates every invariant before anything lands
//! - Never panics; every failure is a typed `KairosError`

// =============================================================================
// MODULES
// =============================================================================

pub mod codec;
pub mod export;
pub mod primitives;
pub mod query;
pub mod repo;
pub mod store;
pub mod temporal;
pub mod types;
pub mod version;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AdmissionReceipt, CandidateBatch, CandidateEdge, CandidateNode, CodecError, Confidence,
    EdgeEndpoint, EdgeRecord, EdgeType, EdgeWeight, KairosError, MutationKind, Nid, NodeKind,
    NodePayload, NodeRecord, PageAnchor, SourceRecord, SourceStatus, SourceType, SpanRecord,
    Timestamp, Tombstone, ValidationError, ValidityWindow, VersionBody, VersionEntry,
    VersionRecord, WindowChain,
};

// =============================================================================
// RE-EXPORTS: Store & Repository
// =============================================================================

pub use repo::{ConfidencePolicy, NewSource, NewSpan, NodeRevision, Repository};
pub use store::{KvRead, RangeIter, Snapshot, Store, SubStore, WriteTxn};

// =============================================================================
// RE-EXPORTS: Temporal Engine
// =============================================================================

pub use temporal::{
    AllenRelation, Interval, ParadoxConflict, ParadoxReport, PostingScan, RelationSet, compose,
    compose_sets, relation_of,
};

// =============================================================================
// RE-EXPORTS: Versioning & Queries
// =============================================================================

pub use query::{
    ClaimScan, EntityFilter, EvidenceChain, EvidenceLink, KnowledgeView, Path, QueryEngine,
    SearchPage,
};
pub use version::History;

// =============================================================================
// RE-EXPORTS: Canonical Export
// =============================================================================

#[cfg(feature = "crypto-hash")]
pub use export::export_digest;
pub use export::{
    CanonicalHeader, CanonicalStore, export_canonical, import_canonical, import_into,
    verify_canonical,
};
