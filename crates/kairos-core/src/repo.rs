//! # Graph Repository
//!
//! The only component permitted to construct record mutations. Validates
//! every data-model invariant before delegating to the store adapter, the
//! temporal index, and the version log, all inside one write transaction,
//! so there is never an observable state where a record exists without its
//! temporal and audit bookkeeping.
//!
//! NID allocation is a counter record in the meta sub-store, mutated only
//! within the same transaction as the record it names; concurrent writers
//! cannot allocate duplicates because the store serializes writers.

use crate::codec;
use crate::primitives::{
    MAX_BATCH_EDGES, MAX_BATCH_NODES, MAX_EVIDENCE_SPANS, MAX_NAME_LENGTH, MAX_PROCEDURE_STEPS,
    MAX_REACHABILITY_NODES, MAX_SPAN_TEXT_LENGTH, MAX_STATEMENT_LENGTH, MAX_TITLE_LENGTH,
    MAX_URI_LENGTH,
};
use crate::store::{KvRead, Snapshot, Store, SubStore, WriteTxn};
use crate::temporal::{self, ParadoxReport};
use crate::types::{
    AdmissionReceipt, CandidateBatch, CandidateNode, Confidence, EdgeEndpoint, EdgeRecord,
    EdgeType, EdgeWeight, KairosError, MutationKind, Nid, NodeKind, NodePayload, NodeRecord,
    PageAnchor, SourceRecord, SourceStatus, SourceType, SpanRecord, Timestamp, Tombstone,
    ValidationError, VersionBody, VersionEntry, VersionRecord,
};
use crate::version::{self, History};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const NEXT_NID_KEY: &[u8] = b"next_nid";

// =============================================================================
// INPUT TYPES
// =============================================================================

/// A new source submitted at ingestion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSource {
    pub source_type: SourceType,
    pub uri: String,
    pub title: String,
    pub ingested_at: Timestamp,
}

/// A new evidence span anchored into an existing source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSpan {
    pub source_nid: Nid,
    pub start_offset: u64,
    pub end_offset: u64,
    pub text: String,
    pub page: Option<PageAnchor>,
}

/// Fields a node revision may replace. Unset fields carry over.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeRevision {
    pub payload: Option<NodePayload>,
    pub confidence: Option<Confidence>,
    pub evidence_spans: Option<BTreeSet<Nid>>,
}

/// How a submitted confidence merges with the recorded one.
///
/// The aggregation rule for equal-authority evidence is deliberately
/// pluggable; `TakeLatest` trusts the collaborator's value as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfidencePolicy {
    #[default]
    TakeLatest,
    TakeMax,
}

impl ConfidencePolicy {
    fn merge(self, prior: Confidence, submitted: Confidence) -> Confidence {
        match self {
            Self::TakeLatest => submitted,
            Self::TakeMax => prior.max(submitted),
        }
    }
}

// =============================================================================
// REPOSITORY
// =============================================================================

/// The store's admission and mutation gateway.
///
/// All methods take `&self`: reads open their own snapshot, writes open the
/// single serialized write transaction, so a `Repository` can be shared
/// across threads behind an `Arc`.
#[derive(Debug)]
pub struct Repository {
    store: Store,
    policy: ConfidencePolicy,
}

impl Repository {
    /// Open or create a repository at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KairosError> {
        Self::open_with_policy(path, ConfidencePolicy::default())
    }

    /// Open with an explicit confidence-merge policy.
    pub fn open_with_policy(
        path: impl AsRef<Path>,
        policy: ConfidencePolicy,
    ) -> Result<Self, KairosError> {
        Ok(Self {
            store: Store::open(path)?,
            policy,
        })
    }

    /// The underlying store adapter.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Open a read snapshot over the current state.
    pub fn snapshot(&self) -> Result<Snapshot, KairosError> {
        self.store.begin_read()
    }

    // =========================================================================
    // SOURCES & SPANS
    // =========================================================================

    /// Register an ingested source. Status starts `Pending`.
    pub fn create_source(&self, new: NewSource, actor: &str) -> Result<Nid, KairosError> {
        if new.uri.is_empty() || new.uri.len() > MAX_URI_LENGTH {
            return Err(ValidationError::LimitExceeded(format!(
                "source uri must be 1..={} bytes",
                MAX_URI_LENGTH
            ))
            .into());
        }
        if new.title.len() > MAX_TITLE_LENGTH {
            return Err(ValidationError::LimitExceeded(format!(
                "source title must be at most {} bytes",
                MAX_TITLE_LENGTH
            ))
            .into());
        }

        let txn = self.store.begin_write()?;
        let nid = alloc_nid(&txn)?;
        let record = SourceRecord {
            nid,
            source_type: new.source_type,
            uri: new.uri,
            title: new.title,
            status: SourceStatus::Pending,
            ingested_at: new.ingested_at,
            version: 1,
        };
        txn.put(
            SubStore::Sources,
            &codec::nid_key(nid),
            &codec::encode_source(&record)?,
        )?;
        append_version(
            &txn,
            nid,
            1,
            None,
            MutationKind::Created,
            actor,
            new.ingested_at,
            VersionBody::Source(record),
        )?;
        txn.commit()?;
        Ok(nid)
    }

    /// Transition a source's processing status. The only mutable source field.
    pub fn set_source_status(
        &self,
        nid: Nid,
        status: SourceStatus,
        actor: &str,
        at: Timestamp,
    ) -> Result<u32, KairosError> {
        let txn = self.store.begin_write()?;
        let mut record = read_source(&txn, nid)?.ok_or(ValidationError::NotFound(nid))?;
        record.status = status;
        record.version += 1;
        txn.put(
            SubStore::Sources,
            &codec::nid_key(nid),
            &codec::encode_source(&record)?,
        )?;
        let new_version = record.version;
        append_version(
            &txn,
            nid,
            new_version,
            Some(new_version - 1),
            MutationKind::StatusChanged,
            actor,
            at,
            VersionBody::Source(record),
        )?;
        txn.commit()?;
        Ok(new_version)
    }

    /// Anchor an immutable span into an existing source.
    pub fn create_span(&self, new: NewSpan, actor: &str, at: Timestamp) -> Result<Nid, KairosError> {
        if new.text.len() > MAX_SPAN_TEXT_LENGTH {
            return Err(ValidationError::LimitExceeded(format!(
                "span text must be at most {} bytes",
                MAX_SPAN_TEXT_LENGTH
            ))
            .into());
        }
        if new.end_offset < new.start_offset {
            return Err(ValidationError::LimitExceeded(
                "span end_offset precedes start_offset".to_string(),
            )
            .into());
        }

        let txn = self.store.begin_write()?;
        if read_source(&txn, new.source_nid)?.is_none() {
            let err: KairosError = ValidationError::NotFound(new.source_nid).into();
            txn.abort()?;
            return Err(err);
        }

        let nid = alloc_nid(&txn)?;
        let record = SpanRecord {
            nid,
            source_nid: new.source_nid,
            start_offset: new.start_offset,
            end_offset: new.end_offset,
            text: new.text,
            page: new.page,
        };
        txn.put(
            SubStore::Spans,
            &codec::nid_key(nid),
            &codec::encode_span(&record)?,
        )?;
        if let Some(anchor) = new.page {
            let key = codec::page_key(new.source_nid, anchor.page, anchor.y_position);
            txn.put(SubStore::PageIndex, &key, &codec::nid_key(nid))?;
        }
        append_version(
            &txn,
            nid,
            1,
            None,
            MutationKind::Created,
            actor,
            at,
            VersionBody::Span(record),
        )?;
        txn.commit()?;
        Ok(nid)
    }

    // =========================================================================
    // NODES
    // =========================================================================

    /// Admit a single candidate node, writing version 1.
    pub fn create_node(&self, candidate: CandidateNode, actor: &str) -> Result<Nid, KairosError> {
        validate_candidate(&candidate)?;
        let txn = self.store.begin_write()?;
        match self.create_node_in_txn(&txn, &candidate, actor) {
            Ok(nid) => {
                txn.commit()?;
                Ok(nid)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    fn create_node_in_txn(
        &self,
        txn: &WriteTxn,
        candidate: &CandidateNode,
        actor: &str,
    ) -> Result<Nid, KairosError> {
        // Every evidence reference must resolve before anything lands.
        let mut sources = BTreeSet::new();
        for span_nid in &candidate.evidence_spans {
            let span = read_span(txn, *span_nid)?.ok_or(ValidationError::DanglingSpan(*span_nid))?;
            sources.insert(span.source_nid);
        }

        let nid = alloc_nid(txn)?;
        let record = NodeRecord {
            nid,
            kind: candidate.payload.kind(),
            payload: candidate.payload.clone(),
            evidence_spans: candidate.evidence_spans.clone(),
            confidence: candidate.confidence,
            version: 1,
            created_at: candidate.created_at,
            tombstone: None,
        };
        txn.put(
            SubStore::Nodes,
            &codec::nid_key(nid),
            &codec::encode_node(&record)?,
        )?;

        // Claims open their first validity window in the same transaction.
        if let NodePayload::Claim {
            valid_from,
            valid_until,
            ..
        } = candidate.payload
        {
            let window_nid = alloc_nid(txn)?;
            temporal::insert_window(txn, nid, window_nid, valid_from, valid_until)?;
        }

        for source in sources {
            temporal::insert_posting(txn, source, candidate.created_at, nid)?;
        }

        append_version(
            txn,
            nid,
            1,
            None,
            MutationKind::Created,
            actor,
            candidate.created_at,
            VersionBody::Node(record),
        )?;
        Ok(nid)
    }

    /// Supersede a node with a new version under an optimistic version check.
    pub fn revise_node(
        &self,
        nid: Nid,
        revision: NodeRevision,
        expected_version: u32,
        actor: &str,
        at: Timestamp,
    ) -> Result<u32, KairosError> {
        let txn = self.store.begin_write()?;
        match self.revise_node_in_txn(&txn, nid, revision, expected_version, actor, at) {
            Ok(new_version) => {
                txn.commit()?;
                Ok(new_version)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    fn revise_node_in_txn(
        &self,
        txn: &WriteTxn,
        nid: Nid,
        revision: NodeRevision,
        expected_version: u32,
        actor: &str,
        at: Timestamp,
    ) -> Result<u32, KairosError> {
        let current = read_node(txn, nid)?.ok_or(ValidationError::NotFound(nid))?;
        if current.is_tombstoned() {
            return Err(ValidationError::Tombstoned(nid).into());
        }
        if current.version != expected_version {
            return Err(ValidationError::VersionConflict {
                nid,
                expected: expected_version,
                found: current.version,
            }
            .into());
        }

        let payload = match revision.payload {
            Some(payload) => {
                if payload.kind() != current.kind {
                    return Err(ValidationError::KindMismatch {
                        nid,
                        actual: current.kind,
                        submitted: payload.kind(),
                    }
                    .into());
                }
                validate_payload(&payload)?;
                payload
            }
            None => current.payload.clone(),
        };

        let evidence_spans = match revision.evidence_spans {
            Some(spans) => {
                validate_evidence_shape(&spans)?;
                // Postings only for sources introduced by this revision.
                let added: Vec<Nid> = spans.difference(&current.evidence_spans).copied().collect();
                let mut new_sources = BTreeSet::new();
                for span_nid in &spans {
                    let span =
                        read_span(txn, *span_nid)?.ok_or(ValidationError::DanglingSpan(*span_nid))?;
                    if added.contains(span_nid) {
                        new_sources.insert(span.source_nid);
                    }
                }
                for source in new_sources {
                    temporal::insert_posting(txn, source, at, nid)?;
                }
                spans
            }
            None => current.evidence_spans.clone(),
        };

        let confidence = match revision.confidence {
            Some(submitted) => self.policy.merge(current.confidence, submitted),
            None => current.confidence,
        };

        // A claim whose validity changed gets a new window, closing the old
        // one atomically.
        if current.kind == NodeKind::Claim {
            let (new_from, new_until) = match &payload {
                NodePayload::Claim {
                    valid_from,
                    valid_until,
                    ..
                } => (*valid_from, *valid_until),
                _ => (None, None),
            };
            let (old_from, old_until) = match &current.payload {
                NodePayload::Claim {
                    valid_from,
                    valid_until,
                    ..
                } => (*valid_from, *valid_until),
                _ => (None, None),
            };
            if (new_from, new_until) != (old_from, old_until) {
                let window_nid = alloc_nid(txn)?;
                temporal::insert_window(txn, nid, window_nid, new_from, new_until)?;
            }
        }

        let record = NodeRecord {
            nid,
            kind: current.kind,
            payload,
            evidence_spans,
            confidence,
            version: current.version + 1,
            created_at: current.created_at,
            tombstone: None,
        };
        txn.put(
            SubStore::Nodes,
            &codec::nid_key(nid),
            &codec::encode_node(&record)?,
        )?;
        let new_version = record.version;
        append_version(
            txn,
            nid,
            new_version,
            Some(expected_version),
            MutationKind::Revised,
            actor,
            at,
            VersionBody::Node(record),
        )?;
        Ok(new_version)
    }

    /// Mark a Gap node resolved, attaching the externally fetched evidence.
    pub fn resolve_gap(
        &self,
        nid: Nid,
        resolution: &str,
        new_evidence: BTreeSet<Nid>,
        expected_version: u32,
        actor: &str,
        at: Timestamp,
    ) -> Result<u32, KairosError> {
        let txn = self.store.begin_write()?;
        let result = (|| -> Result<u32, KairosError> {
            let current = read_node(&txn, nid)?.ok_or(ValidationError::NotFound(nid))?;
            if current.kind != NodeKind::Gap {
                return Err(ValidationError::KindMismatch {
                    nid,
                    actual: current.kind,
                    submitted: NodeKind::Gap,
                }
                .into());
            }
            let NodePayload::Gap { question, .. } = &current.payload else {
                return Err(ValidationError::NotFound(nid).into());
            };

            let mut evidence = current.evidence_spans.clone();
            evidence.extend(new_evidence.iter().copied());
            let revision = NodeRevision {
                payload: Some(NodePayload::Gap {
                    question: question.clone(),
                    resolved: true,
                    resolution: Some(resolution.to_string()),
                }),
                confidence: None,
                evidence_spans: Some(evidence),
            };
            self.revise_node_in_txn(&txn, nid, revision, expected_version, actor, at)
        })();

        match result {
            Ok(new_version) => {
                // The audit entry for a gap resolution is `Resolved`, not
                // `Revised`; rewrite the entry appended by the inner call.
                rewrite_mutation_kind(&txn, nid, new_version, MutationKind::Resolved)?;
                txn.commit()?;
                Ok(new_version)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    // =========================================================================
    // EDGES
    // =========================================================================

    /// Create a directed edge between two existing, live nodes.
    ///
    /// `Supports` edges run a bounded reachability check from `to` back to
    /// `from` and reject cycle closures before anything is written.
    pub fn create_edge(
        &self,
        edge_type: EdgeType,
        from: Nid,
        to: Nid,
        weight: EdgeWeight,
        actor: &str,
        at: Timestamp,
    ) -> Result<Nid, KairosError> {
        let txn = self.store.begin_write()?;
        match self.create_edge_in_txn(&txn, edge_type, from, to, weight, actor, at) {
            Ok(nid) => {
                txn.commit()?;
                Ok(nid)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    fn create_edge_in_txn(
        &self,
        txn: &WriteTxn,
        edge_type: EdgeType,
        from: Nid,
        to: Nid,
        weight: EdgeWeight,
        actor: &str,
        at: Timestamp,
    ) -> Result<Nid, KairosError> {
        for endpoint in [from, to] {
            let node = read_node(txn, endpoint)?.ok_or(ValidationError::DanglingNode(endpoint))?;
            if node.is_tombstoned() {
                return Err(ValidationError::Tombstoned(endpoint).into());
            }
        }

        if edge_type == EdgeType::Supports && supports_reaches(txn, to, from)? {
            return Err(ValidationError::CycleDetected { from, to }.into());
        }

        let nid = alloc_nid(txn)?;
        let record = EdgeRecord {
            nid,
            edge_type,
            from_nid: from,
            to_nid: to,
            weight,
            version: 1,
            tombstone: None,
        };
        txn.put(
            SubStore::Edges,
            &codec::nid_key(nid),
            &codec::encode_edge(&record)?,
        )?;
        append_version(
            txn,
            nid,
            1,
            None,
            MutationKind::Created,
            actor,
            at,
            VersionBody::Edge(record),
        )?;
        Ok(nid)
    }

    // =========================================================================
    // TOMBSTONES & PARADOXES
    // =========================================================================

    /// Write a terminal version marking a node or edge inactive.
    ///
    /// Queries exclude tombstoned records by default; the version log
    /// preserves the full history.
    pub fn tombstone(
        &self,
        nid: Nid,
        actor: &str,
        reason: &str,
        at: Timestamp,
    ) -> Result<u32, KairosError> {
        let txn = self.store.begin_write()?;
        let result = (|| -> Result<u32, KairosError> {
            let marker = Tombstone {
                reason: reason.to_string(),
                at,
            };

            if let Some(mut node) = read_node(&txn, nid)? {
                if node.is_tombstoned() {
                    return Err(ValidationError::Tombstoned(nid).into());
                }
                let prior = node.version;
                node.version += 1;
                node.tombstone = Some(marker);
                txn.put(
                    SubStore::Nodes,
                    &codec::nid_key(nid),
                    &codec::encode_node(&node)?,
                )?;
                let new_version = node.version;
                append_version(
                    &txn,
                    nid,
                    new_version,
                    Some(prior),
                    MutationKind::Tombstoned {
                        reason: reason.to_string(),
                    },
                    actor,
                    at,
                    VersionBody::Node(node),
                )?;
                return Ok(new_version);
            }

            if let Some(mut edge) = read_edge(&txn, nid)? {
                if edge.is_tombstoned() {
                    return Err(ValidationError::Tombstoned(nid).into());
                }
                let prior = edge.version;
                edge.version += 1;
                edge.tombstone = Some(marker);
                txn.put(
                    SubStore::Edges,
                    &codec::nid_key(nid),
                    &codec::encode_edge(&edge)?,
                )?;
                let new_version = edge.version;
                append_version(
                    &txn,
                    nid,
                    new_version,
                    Some(prior),
                    MutationKind::Tombstoned {
                        reason: reason.to_string(),
                    },
                    actor,
                    at,
                    VersionBody::Edge(edge),
                )?;
                return Ok(new_version);
            }

            Err(ValidationError::NotFound(nid).into())
        })();

        match result {
            Ok(version) => {
                txn.commit()?;
                Ok(version)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    /// Persist a paradox report as a flagged Gap node.
    ///
    /// Temporal paradoxes are data about the world, not defects; they become
    /// visible to downstream synthesis instead of being silently dropped.
    /// The Gap inherits the involved claim's evidence spans.
    pub fn record_paradox(
        &self,
        report: &ParadoxReport,
        actor: &str,
        at: Timestamp,
    ) -> Result<Nid, KairosError> {
        let txn = self.store.begin_write()?;
        let result = (|| -> Result<Nid, KairosError> {
            let claim = read_node(&txn, report.claim_nid)?
                .ok_or(ValidationError::NotFound(report.claim_nid))?;
            let candidate = CandidateNode {
                payload: NodePayload::Gap {
                    question: report.summary(),
                    resolved: false,
                    resolution: None,
                },
                evidence_spans: claim.evidence_spans,
                confidence: Confidence::max(),
                created_at: at,
            };
            self.create_node_in_txn(&txn, &candidate, actor)
        })();

        match result {
            Ok(nid) => {
                txn.commit()?;
                Ok(nid)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    // =========================================================================
    // BATCH ADMISSION
    // =========================================================================

    /// Admit a candidate batch in one transaction, all-or-nothing.
    ///
    /// Every candidate is validated before the transaction opens; edge
    /// endpoints may name existing nodes or index into the batch's own
    /// candidate list. One fsync per batch instead of one per record.
    pub fn admit_batch(
        &self,
        batch: &CandidateBatch,
        actor: &str,
        at: Timestamp,
    ) -> Result<AdmissionReceipt, KairosError> {
        if batch.nodes.len() > MAX_BATCH_NODES {
            return Err(ValidationError::LimitExceeded(format!(
                "batch of {} nodes exceeds maximum {}",
                batch.nodes.len(),
                MAX_BATCH_NODES
            ))
            .into());
        }
        if batch.edges.len() > MAX_BATCH_EDGES {
            return Err(ValidationError::LimitExceeded(format!(
                "batch of {} edges exceeds maximum {}",
                batch.edges.len(),
                MAX_BATCH_EDGES
            ))
            .into());
        }
        for candidate in &batch.nodes {
            validate_candidate(candidate)?;
        }
        for edge in &batch.edges {
            for endpoint in [edge.from, edge.to] {
                if let EdgeEndpoint::Batch(index) = endpoint
                    && index >= batch.nodes.len()
                {
                    return Err(ValidationError::LimitExceeded(format!(
                        "edge endpoint references batch node {index} of {}",
                        batch.nodes.len()
                    ))
                    .into());
                }
            }
        }

        let txn = self.store.begin_write()?;
        let result = (|| -> Result<AdmissionReceipt, KairosError> {
            let mut node_nids = Vec::with_capacity(batch.nodes.len());
            for candidate in &batch.nodes {
                node_nids.push(self.create_node_in_txn(&txn, candidate, actor)?);
            }

            let resolve = |endpoint: EdgeEndpoint| match endpoint {
                EdgeEndpoint::Existing(nid) => nid,
                // Bounds were checked before the transaction opened.
                EdgeEndpoint::Batch(index) => node_nids[index],
            };

            let mut edge_nids = Vec::with_capacity(batch.edges.len());
            for edge in &batch.edges {
                edge_nids.push(self.create_edge_in_txn(
                    &txn,
                    edge.edge_type,
                    resolve(edge.from),
                    resolve(edge.to),
                    edge.weight,
                    actor,
                    at,
                )?);
            }

            Ok(AdmissionReceipt {
                node_nids,
                edge_nids,
            })
        })();

        match result {
            Ok(receipt) => {
                txn.commit()?;
                Ok(receipt)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Fetch a source by NID.
    pub fn get_source(&self, nid: Nid) -> Result<Option<SourceRecord>, KairosError> {
        read_source(&self.snapshot()?, nid)
    }

    /// Fetch a span by NID.
    pub fn get_span(&self, nid: Nid) -> Result<Option<SpanRecord>, KairosError> {
        read_span(&self.snapshot()?, nid)
    }

    /// Fetch the latest version of a node by NID.
    pub fn get_node(&self, nid: Nid) -> Result<Option<NodeRecord>, KairosError> {
        read_node(&self.snapshot()?, nid)
    }

    /// Fetch the latest version of an edge by NID.
    pub fn get_edge(&self, nid: Nid) -> Result<Option<EdgeRecord>, KairosError> {
        read_edge(&self.snapshot()?, nid)
    }

    /// Full audit history of a NID.
    pub fn history(&self, nid: Nid) -> Result<History, KairosError> {
        version::history(&self.snapshot()?, nid)
    }

    /// Check a claim's temporal neighborhood for logical contradictions.
    pub fn detect_paradox(&self, claim: Nid) -> Result<Option<ParadoxReport>, KairosError> {
        temporal::detect_paradox(&self.snapshot()?, claim)
    }

    /// Number of live entries per record sub-store: (sources, spans, nodes, edges).
    pub fn counts(&self) -> Result<(u64, u64, u64, u64), KairosError> {
        let snap = self.snapshot()?;
        Ok((
            snap.len(SubStore::Sources)?,
            snap.len(SubStore::Spans)?,
            snap.len(SubStore::Nodes)?,
            snap.len(SubStore::Edges)?,
        ))
    }
}

// =============================================================================
// INTERNAL HELPERS
// =============================================================================

/// Allocate the next NID from the meta counter, inside the caller's
/// transaction. Allocation and use commit together or not at all.
fn alloc_nid(txn: &WriteTxn) -> Result<Nid, KairosError> {
    let current = match txn.get(SubStore::Meta, NEXT_NID_KEY)? {
        Some(bytes) => u64::from_be_bytes(bytes.as_slice().try_into().map_err(|_| {
            KairosError::Serialization("meta counter has invalid width".to_string())
        })?),
        None => 1,
    };
    txn.put(
        SubStore::Meta,
        NEXT_NID_KEY,
        &current.saturating_add(1).to_be_bytes(),
    )?;
    Ok(Nid(current))
}

pub(crate) fn read_source(
    view: &impl KvRead,
    nid: Nid,
) -> Result<Option<SourceRecord>, KairosError> {
    match view.get_raw(SubStore::Sources, &codec::nid_key(nid))? {
        Some(bytes) => Ok(Some(codec::decode_source(&bytes)?)),
        None => Ok(None),
    }
}

pub(crate) fn read_span(view: &impl KvRead, nid: Nid) -> Result<Option<SpanRecord>, KairosError> {
    match view.get_raw(SubStore::Spans, &codec::nid_key(nid))? {
        Some(bytes) => Ok(Some(codec::decode_span(&bytes)?)),
        None => Ok(None),
    }
}

pub(crate) fn read_node(view: &impl KvRead, nid: Nid) -> Result<Option<NodeRecord>, KairosError> {
    match view.get_raw(SubStore::Nodes, &codec::nid_key(nid))? {
        Some(bytes) => Ok(Some(codec::decode_node(&bytes)?)),
        None => Ok(None),
    }
}

pub(crate) fn read_edge(view: &impl KvRead, nid: Nid) -> Result<Option<EdgeRecord>, KairosError> {
    match view.get_raw(SubStore::Edges, &codec::nid_key(nid))? {
        Some(bytes) => Ok(Some(codec::decode_edge(&bytes)?)),
        None => Ok(None),
    }
}

#[allow(clippy::too_many_arguments)]
fn append_version(
    txn: &WriteTxn,
    nid: Nid,
    new_version: u32,
    prior_version: Option<u32>,
    mutation: MutationKind,
    actor: &str,
    at: Timestamp,
    body: VersionBody,
) -> Result<(), KairosError> {
    let record = VersionRecord {
        entry: VersionEntry {
            nid,
            version: new_version,
            prior_version,
            mutation,
            actor: actor.to_string(),
            timestamp: at,
            payload_hash: version::hash_body(&body)?,
        },
        body,
    };
    version::append(txn, &record)
}

/// Replace the mutation kind of an already-appended entry, within the same
/// uncommitted transaction.
fn rewrite_mutation_kind(
    txn: &WriteTxn,
    nid: Nid,
    new_version: u32,
    mutation: MutationKind,
) -> Result<(), KairosError> {
    if let Some(mut record) = version::record_at(txn, nid, new_version)? {
        record.entry.mutation = mutation;
        version::append(txn, &record)?;
    }
    Ok(())
}

/// Bounded DFS over live Supports edges: is `target` reachable from `start`?
fn supports_reaches(txn: &WriteTxn, start: Nid, target: Nid) -> Result<bool, KairosError> {
    if start == target {
        return Ok(true);
    }

    let mut adjacency: BTreeMap<Nid, Vec<Nid>> = BTreeMap::new();
    for (_, value) in txn.scan(SubStore::Edges)? {
        let Ok(edge) = codec::decode_edge(&value) else {
            continue;
        };
        if edge.edge_type == EdgeType::Supports && !edge.is_tombstoned() {
            adjacency.entry(edge.from_nid).or_default().push(edge.to_nid);
        }
    }

    let mut visited = BTreeSet::new();
    let mut stack = vec![start];
    while let Some(current) = stack.pop() {
        if current == target {
            return Ok(true);
        }
        if !visited.insert(current) || visited.len() > MAX_REACHABILITY_NODES {
            continue;
        }
        if let Some(neighbors) = adjacency.get(&current) {
            stack.extend(neighbors.iter().copied());
        }
    }
    Ok(false)
}

fn validate_evidence_shape(evidence: &BTreeSet<Nid>) -> Result<(), ValidationError> {
    if evidence.is_empty() {
        return Err(ValidationError::EmptyEvidence);
    }
    if evidence.len() > MAX_EVIDENCE_SPANS {
        return Err(ValidationError::LimitExceeded(format!(
            "{} evidence spans exceed maximum {}",
            evidence.len(),
            MAX_EVIDENCE_SPANS
        )));
    }
    Ok(())
}

fn check_len(what: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::LimitExceeded(format!(
            "{what} must be non-empty"
        )));
    }
    if value.len() > max {
        return Err(ValidationError::LimitExceeded(format!(
            "{what} must be at most {max} bytes"
        )));
    }
    Ok(())
}

fn validate_payload(payload: &NodePayload) -> Result<(), ValidationError> {
    match payload {
        NodePayload::Entity { name, entity_type } => {
            check_len("entity name", name, MAX_NAME_LENGTH)?;
            check_len("entity type", entity_type, MAX_NAME_LENGTH)
        }
        NodePayload::Claim {
            subject, statement, ..
        } => {
            check_len("claim subject", subject, MAX_NAME_LENGTH)?;
            check_len("claim statement", statement, MAX_STATEMENT_LENGTH)
        }
        NodePayload::Procedure { name, steps } => {
            check_len("procedure name", name, MAX_NAME_LENGTH)?;
            if steps.len() > MAX_PROCEDURE_STEPS {
                return Err(ValidationError::LimitExceeded(format!(
                    "{} procedure steps exceed maximum {}",
                    steps.len(),
                    MAX_PROCEDURE_STEPS
                )));
            }
            Ok(())
        }
        NodePayload::Gap { question, .. } => {
            check_len("gap question", question, MAX_STATEMENT_LENGTH)
        }
    }
}

fn validate_candidate(candidate: &CandidateNode) -> Result<(), ValidationError> {
    validate_payload(&candidate.payload)?;
    validate_evidence_shape(&candidate.evidence_spans)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_repo() -> (tempfile::TempDir, Repository) {
        let temp = tempdir().expect("temp dir");
        let repo = Repository::open(temp.path().join("test.kairos")).expect("open repo");
        (temp, repo)
    }

    fn seed_span(repo: &Repository) -> Nid {
        let source = repo
            .create_source(
                NewSource {
                    source_type: SourceType::Video,
                    uri: "https://example.org/lecture".into(),
                    title: "lecture".into(),
                    ingested_at: Timestamp(1_000),
                },
                "ingestor",
            )
            .expect("create source");
        repo.create_span(
            NewSpan {
                source_nid: source,
                start_offset: 0,
                end_offset: 120,
                text: "transcript excerpt".into(),
                page: None,
            },
            "ingestor",
            Timestamp(1_001),
        )
        .expect("create span")
    }

    fn entity(span: Nid, name: &str) -> CandidateNode {
        CandidateNode {
            payload: NodePayload::Entity {
                name: name.into(),
                entity_type: "concept".into(),
            },
            evidence_spans: BTreeSet::from([span]),
            confidence: Confidence::from_thousandths(700),
            created_at: Timestamp(2_000),
        }
    }

    #[test]
    fn nids_are_monotonic_and_never_reused() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);

        let a = repo.create_node(entity(span, "a"), "t").expect("node");
        let b = repo.create_node(entity(span, "b"), "t").expect("node");
        assert!(b.0 > a.0);

        repo.tombstone(a, "t", "dup", Timestamp(3_000)).expect("tombstone");
        let c = repo.create_node(entity(span, "c"), "t").expect("node");
        assert!(c.0 > b.0, "tombstoned NIDs must not be reassigned");
    }

    #[test]
    fn create_node_rejects_empty_or_dangling_evidence() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);

        let mut candidate = entity(span, "x");
        candidate.evidence_spans.clear();
        assert!(matches!(
            repo.create_node(candidate, "t"),
            Err(KairosError::Validation(ValidationError::EmptyEvidence))
        ));

        let mut candidate = entity(span, "x");
        candidate.evidence_spans = BTreeSet::from([Nid(9_999)]);
        assert!(matches!(
            repo.create_node(candidate, "t"),
            Err(KairosError::Validation(ValidationError::DanglingSpan(_)))
        ));
    }

    #[test]
    fn revise_requires_matching_version() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);
        let nid = repo.create_node(entity(span, "x"), "t").expect("node");

        let revision = NodeRevision {
            confidence: Some(Confidence::from_thousandths(900)),
            ..NodeRevision::default()
        };
        // Stale expected version: conflict, nothing applied.
        assert!(matches!(
            repo.revise_node(nid, revision.clone(), 5, "t", Timestamp(3_000)),
            Err(KairosError::Validation(
                ValidationError::VersionConflict { .. }
            ))
        ));
        assert_eq!(repo.get_node(nid).expect("get").expect("some").version, 1);

        let v2 = repo
            .revise_node(nid, revision, 1, "t", Timestamp(3_000))
            .expect("revise");
        assert_eq!(v2, 2);
        let node = repo.get_node(nid).expect("get").expect("some");
        assert_eq!(node.confidence, Confidence::from_thousandths(900));
    }

    #[test]
    fn revise_rejects_kind_change() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);
        let nid = repo.create_node(entity(span, "x"), "t").expect("node");

        let revision = NodeRevision {
            payload: Some(NodePayload::Gap {
                question: "?".into(),
                resolved: false,
                resolution: None,
            }),
            ..NodeRevision::default()
        };
        assert!(matches!(
            repo.revise_node(nid, revision, 1, "t", Timestamp(3_000)),
            Err(KairosError::Validation(ValidationError::KindMismatch { .. }))
        ));
    }

    #[test]
    fn supports_cycle_is_rejected_without_partial_write() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);
        let a = repo.create_node(entity(span, "a"), "t").expect("node");
        let b = repo.create_node(entity(span, "b"), "t").expect("node");
        let c = repo.create_node(entity(span, "c"), "t").expect("node");

        let w = EdgeWeight::new(1);
        repo.create_edge(EdgeType::Supports, a, b, w, "t", Timestamp(0)).expect("edge");
        repo.create_edge(EdgeType::Supports, b, c, w, "t", Timestamp(0)).expect("edge");

        let (_, _, _, edges_before) = repo.counts().expect("counts");
        assert!(matches!(
            repo.create_edge(EdgeType::Supports, c, a, w, "t", Timestamp(0)),
            Err(KairosError::Validation(ValidationError::CycleDetected { .. }))
        ));
        let (_, _, _, edges_after) = repo.counts().expect("counts");
        assert_eq!(edges_before, edges_after, "no partial edge may be written");

        // A RelatedTo edge on the same endpoints is fine; only Supports
        // chains must stay acyclic.
        repo.create_edge(EdgeType::RelatedTo, c, a, w, "t", Timestamp(0))
            .expect("related edge");
    }

    #[test]
    fn edges_require_live_endpoints() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);
        let a = repo.create_node(entity(span, "a"), "t").expect("node");

        assert!(matches!(
            repo.create_edge(EdgeType::Mentions, a, Nid(9_999), EdgeWeight::new(1), "t", Timestamp(0)),
            Err(KairosError::Validation(ValidationError::DanglingNode(_)))
        ));

        repo.tombstone(a, "t", "gone", Timestamp(0)).expect("tombstone");
        let b = repo.create_node(entity(span, "b"), "t").expect("node");
        assert!(matches!(
            repo.create_edge(EdgeType::Mentions, a, b, EdgeWeight::new(1), "t", Timestamp(0)),
            Err(KairosError::Validation(ValidationError::Tombstoned(_)))
        ));
    }

    #[test]
    fn claim_revision_supersedes_validity_window() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);

        let claim = CandidateNode {
            payload: NodePayload::Claim {
                subject: "office".into(),
                statement: "alice works at acme".into(),
                valid_from: Some(Timestamp(0)),
                valid_until: None,
            },
            evidence_spans: BTreeSet::from([span]),
            confidence: Confidence::from_thousandths(800),
            created_at: Timestamp(2_000),
        };
        let nid = repo.create_node(claim, "t").expect("claim");

        let revision = NodeRevision {
            payload: Some(NodePayload::Claim {
                subject: "office".into(),
                statement: "alice works at initech".into(),
                valid_from: Some(Timestamp(500)),
                valid_until: None,
            }),
            ..NodeRevision::default()
        };
        repo.revise_node(nid, revision, 1, "t", Timestamp(3_000)).expect("revise");

        let snap = repo.snapshot().expect("snapshot");
        let chain = temporal::window_chain(&snap, nid).expect("chain");
        assert_eq!(chain.windows.len(), 2);
        assert_eq!(chain.windows[0].valid_until, Some(Timestamp(500)));
        assert_eq!(chain.windows[0].superseded_by, Some(chain.windows[1].nid));
        assert_eq!(chain.windows.iter().filter(|w| w.is_open()).count(), 1);
    }

    #[test]
    fn batch_admission_is_atomic() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);

        // The second edge closes a Supports cycle inside the batch; the
        // whole batch must vanish.
        let batch = CandidateBatch {
            nodes: vec![entity(span, "a"), entity(span, "b")],
            edges: vec![
                crate::types::CandidateEdge {
                    edge_type: EdgeType::Supports,
                    from: EdgeEndpoint::Batch(0),
                    to: EdgeEndpoint::Batch(1),
                    weight: EdgeWeight::new(1),
                },
                crate::types::CandidateEdge {
                    edge_type: EdgeType::Supports,
                    from: EdgeEndpoint::Batch(1),
                    to: EdgeEndpoint::Batch(0),
                    weight: EdgeWeight::new(1),
                },
            ],
        };

        let (_, _, nodes_before, edges_before) = repo.counts().expect("counts");
        assert!(repo.admit_batch(&batch, "pipeline", Timestamp(2_000)).is_err());
        let (_, _, nodes_after, edges_after) = repo.counts().expect("counts");
        assert_eq!(nodes_before, nodes_after);
        assert_eq!(edges_before, edges_after);

        // Without the closing edge the batch admits whole.
        let batch = CandidateBatch {
            nodes: vec![entity(span, "a"), entity(span, "b")],
            edges: vec![crate::types::CandidateEdge {
                edge_type: EdgeType::Supports,
                from: EdgeEndpoint::Batch(0),
                to: EdgeEndpoint::Batch(1),
                weight: EdgeWeight::new(1),
            }],
        };
        let receipt = repo.admit_batch(&batch, "pipeline", Timestamp(2_000)).expect("admit");
        assert_eq!(receipt.node_nids.len(), 2);
        assert_eq!(receipt.edge_nids.len(), 1);
    }

    #[test]
    fn gap_resolution_marks_resolved_with_resolved_audit_kind() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);

        let gap = CandidateNode {
            payload: NodePayload::Gap {
                question: "when was the bridge built?".into(),
                resolved: false,
                resolution: None,
            },
            evidence_spans: BTreeSet::from([span]),
            confidence: Confidence::from_thousandths(400),
            created_at: Timestamp(2_000),
        };
        let nid = repo.create_node(gap, "t").expect("gap");

        let v2 = repo
            .resolve_gap(nid, "built in 1932", BTreeSet::new(), 1, "resolver", Timestamp(3_000))
            .expect("resolve");
        assert_eq!(v2, 2);

        let node = repo.get_node(nid).expect("get").expect("some");
        assert!(matches!(
            node.payload,
            NodePayload::Gap { resolved: true, .. }
        ));

        let history = repo.history(nid).expect("history");
        assert_eq!(history.records.len(), 2);
        assert_eq!(history.records[1].entry.mutation, MutationKind::Resolved);
    }

    #[test]
    fn take_max_policy_never_lowers_confidence() {
        let temp = tempdir().expect("temp dir");
        let repo = Repository::open_with_policy(
            temp.path().join("test.kairos"),
            ConfidencePolicy::TakeMax,
        )
        .expect("open repo");
        let span = seed_span(&repo);
        let nid = repo.create_node(entity(span, "x"), "t").expect("node");

        let revision = NodeRevision {
            confidence: Some(Confidence::from_thousandths(100)),
            ..NodeRevision::default()
        };
        repo.revise_node(nid, revision, 1, "t", Timestamp(0)).expect("revise");
        let node = repo.get_node(nid).expect("get").expect("some");
        assert_eq!(node.confidence, Confidence::from_thousandths(700));
    }

    #[test]
    fn version_sequence_is_gap_free() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);
        let nid = repo.create_node(entity(span, "x"), "t").expect("node");

        for expected in 1..5u32 {
            let revision = NodeRevision {
                confidence: Some(Confidence::from_thousandths(500 + expected as u16)),
                ..NodeRevision::default()
            };
            repo.revise_node(nid, revision, expected, "t", Timestamp(0)).expect("revise");
        }
        repo.tombstone(nid, "t", "done", Timestamp(0)).expect("tombstone");

        let versions: Vec<u32> = repo
            .history(nid)
            .expect("history")
            .records
            .iter()
            .map(|r| r.entry.version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5, 6]);
    }
}
