//! # Query Engine
//!
//! Read-only composition over the repository, temporal index, and version
//! log for downstream consumers: point-in-time views, path finding,
//! evidence resolution, and cursor-resumable entity search.
//!
//! Every operation runs against a single snapshot, so long scans never
//! observe a mix of pre- and post-commit state. Damaged records are skipped
//! and counted: a corrupted entry yields a partial result with a skip
//! count, never an unannounced loss.

use crate::codec;
use crate::primitives::{MAX_PATH_HOPS, MAX_SEARCH_LIMIT};
use crate::repo::{Repository, read_node, read_source, read_span};
use crate::store::{Snapshot, SubStore};
use crate::temporal::{self, ParadoxReport, PostingScan};
use crate::types::{
    Confidence, KairosError, Nid, NodeKind, NodeRecord, SourceRecord, SpanRecord, Timestamp,
    ValidationError, VersionBody,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A shortest path through the edge graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    /// Visited nodes, endpoints included.
    pub nodes: Vec<Nid>,
    /// Edges taken, one fewer than nodes.
    pub edges: Vec<Nid>,
}

/// One resolved evidence link of a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceLink {
    pub span: SpanRecord,
    pub source: SourceRecord,
}

/// Resolved evidence of a claim, in span-NID order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EvidenceChain {
    pub links: Vec<EvidenceLink>,
    /// Evidence references that no longer resolved or failed to decode.
    pub skipped: usize,
}

/// Filter for entity search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EntityFilter {
    pub kind: Option<NodeKind>,
    /// Case-insensitive substring match against the payload label.
    pub label_contains: Option<String>,
    pub min_confidence: Option<Confidence>,
    pub include_tombstoned: bool,
}

impl EntityFilter {
    fn matches(&self, record: &NodeRecord) -> bool {
        if !self.include_tombstoned && record.is_tombstoned() {
            return false;
        }
        if let Some(kind) = self.kind
            && record.kind != kind
        {
            return false;
        }
        if let Some(min) = self.min_confidence
            && record.confidence < min
        {
            return false;
        }
        if let Some(needle) = &self.label_contains {
            let haystack = record.payload.label().to_ascii_lowercase();
            if !haystack.contains(&needle.to_ascii_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// One page of an entity search.
///
/// The scan is restartable: pass `next_cursor` back in to resume exactly
/// where this page stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SearchPage {
    pub records: Vec<NodeRecord>,
    pub next_cursor: Option<Nid>,
    /// Damaged records skipped during the scan.
    pub skipped: usize,
}

/// Claims valid at a view's instant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClaimScan {
    pub claims: Vec<NodeRecord>,
    pub skipped: usize,
}

// =============================================================================
// KNOWLEDGE VIEW (point-in-time)
// =============================================================================

/// A consistent view of the graph as of a past instant.
///
/// Node state is reconstructed from the version log (the latest version
/// whose audit timestamp is not after the view instant); claims are
/// additionally filterable by validity-window coverage.
pub struct KnowledgeView {
    snap: Snapshot,
    at: Timestamp,
}

impl KnowledgeView {
    /// The instant this view observes.
    #[must_use]
    pub const fn at(&self) -> Timestamp {
        self.at
    }

    /// The node as it existed at the view instant.
    ///
    /// `None` if the node did not exist yet, was tombstoned by then, or the
    /// NID names a non-node record.
    pub fn node(&self, nid: Nid) -> Result<Option<NodeRecord>, KairosError> {
        let prefix = codec::nid_key(nid);
        let start = codec::version_key(nid, 0);
        let mut state: Option<NodeRecord> = None;

        for entry in self.snap.range_from(SubStore::VersionLog, &start)? {
            let (key, value) = entry?;
            if key.len() != 12 || key[0..8] != prefix {
                break;
            }
            let Ok(record) = codec::decode_version(&value) else {
                continue;
            };
            if record.entry.timestamp > self.at {
                continue;
            }
            if let VersionBody::Node(node) = record.body {
                state = Some(node);
            }
        }
        Ok(state.filter(|node| !node.is_tombstoned()))
    }

    /// Whether the claim's validity window chain covers the view instant.
    pub fn claim_valid(&self, claim: Nid) -> Result<bool, KairosError> {
        Ok(temporal::window_chain(&self.snap, claim)?.covers(self.at))
    }

    /// All claims that existed at the view instant and whose validity
    /// window covers it.
    pub fn valid_claims(&self) -> Result<ClaimScan, KairosError> {
        let mut scan = ClaimScan::default();
        for entry in self.snap.iter(SubStore::Nodes)? {
            let (_, value) = entry?;
            let Ok(latest) = codec::decode_node(&value) else {
                scan.skipped += 1;
                continue;
            };
            if latest.kind != NodeKind::Claim {
                continue;
            }
            if let Some(node) = self.node(latest.nid)?
                && self.claim_valid(latest.nid)?
            {
                scan.claims.push(node);
            }
        }
        Ok(scan)
    }
}

// =============================================================================
// QUERY ENGINE
// =============================================================================

/// Read-only queries over a repository.
pub struct QueryEngine<'a> {
    repo: &'a Repository,
}

impl Repository {
    /// The read-only query surface of this repository.
    #[must_use]
    pub fn query(&self) -> QueryEngine<'_> {
        QueryEngine { repo: self }
    }
}

impl QueryEngine<'_> {
    /// Open a point-in-time view of the graph.
    pub fn snapshot_at(&self, at: Timestamp) -> Result<KnowledgeView, KairosError> {
        Ok(KnowledgeView {
            snap: self.repo.snapshot()?,
            at,
        })
    }

    /// Breadth-first shortest path over live edges, bounded by `max_hops`.
    ///
    /// Neighbors expand in ascending edge-NID order, so among equal-length
    /// paths the one taking the lowest edge NIDs wins deterministically.
    pub fn find_path(
        &self,
        from: Nid,
        to: Nid,
        max_hops: usize,
    ) -> Result<Option<Path>, KairosError> {
        let max_hops = max_hops.min(MAX_PATH_HOPS);
        let snap = self.repo.snapshot()?;

        let live = |nid: Nid| -> Result<bool, KairosError> {
            Ok(read_node(&snap, nid)?.is_some_and(|n| !n.is_tombstoned()))
        };
        if !live(from)? || !live(to)? {
            return Ok(None);
        }
        if from == to {
            return Ok(Some(Path {
                nodes: vec![from],
                edges: vec![],
            }));
        }

        // Adjacency in edge-NID order; the edges sub-store is keyed by NID,
        // so scan order already is ascending.
        let mut adjacency: BTreeMap<Nid, Vec<(Nid, Nid)>> = BTreeMap::new();
        for entry in snap.iter(SubStore::Edges)? {
            let (_, value) = entry?;
            let Ok(edge) = codec::decode_edge(&value) else {
                continue;
            };
            if edge.is_tombstoned() {
                continue;
            }
            adjacency
                .entry(edge.from_nid)
                .or_default()
                .push((edge.nid, edge.to_nid));
        }

        let mut parent: BTreeMap<Nid, (Nid, Nid)> = BTreeMap::new();
        let mut visited = BTreeSet::from([from]);
        let mut queue = VecDeque::from([(from, 0usize)]);

        'search: while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_hops {
                continue;
            }
            let Some(neighbors) = adjacency.get(&current) else {
                continue;
            };
            for &(edge_nid, neighbor) in neighbors {
                if visited.contains(&neighbor) || !live(neighbor)? {
                    continue;
                }
                visited.insert(neighbor);
                parent.insert(neighbor, (current, edge_nid));
                if neighbor == to {
                    break 'search;
                }
                queue.push_back((neighbor, depth + 1));
            }
        }

        if !parent.contains_key(&to) {
            return Ok(None);
        }

        let mut nodes = vec![to];
        let mut edges = Vec::new();
        let mut current = to;
        while current != from {
            let (prev, edge) = parent[&current];
            edges.push(edge);
            nodes.push(prev);
            current = prev;
        }
        nodes.reverse();
        edges.reverse();
        Ok(Some(Path { nodes, edges }))
    }

    /// Resolve a node's evidence spans to their spans and sources.
    ///
    /// Missing or damaged references are skipped and counted.
    pub fn evidence_chain(&self, nid: Nid) -> Result<EvidenceChain, KairosError> {
        let snap = self.repo.snapshot()?;
        let node = read_node(&snap, nid)?.ok_or(ValidationError::NotFound(nid))?;

        let mut chain = EvidenceChain::default();
        for span_nid in &node.evidence_spans {
            let resolved = match read_span(&snap, *span_nid) {
                Ok(Some(span)) => match read_source(&snap, span.source_nid) {
                    Ok(Some(source)) => Some(EvidenceLink { span, source }),
                    _ => None,
                },
                _ => None,
            };
            match resolved {
                Some(link) => chain.links.push(link),
                None => chain.skipped += 1,
            }
        }
        Ok(chain)
    }

    /// One page of a nid-ordered entity scan, resumable via the cursor.
    pub fn search_entities(
        &self,
        filter: &EntityFilter,
        cursor: Option<Nid>,
        limit: usize,
    ) -> Result<SearchPage, KairosError> {
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        let snap = self.repo.snapshot()?;

        // Resume strictly after the cursor.
        let start = cursor.map(|nid| codec::nid_key(Nid(nid.0.saturating_add(1))));
        let iter = match &start {
            Some(key) => snap.range_from(SubStore::Nodes, key)?,
            None => snap.iter(SubStore::Nodes)?,
        };

        let mut page = SearchPage::default();
        for entry in iter {
            let (_, value) = entry?;
            match codec::decode_node(&value) {
                Ok(record) => {
                    if filter.matches(&record) {
                        let nid = record.nid;
                        page.records.push(record);
                        if page.records.len() == limit {
                            page.next_cursor = Some(nid);
                            break;
                        }
                    }
                }
                Err(_) => page.skipped += 1,
            }
        }
        Ok(page)
    }

    /// All facts derived from a source at or after `since`, in time order.
    pub fn facts_from_source(
        &self,
        source: Nid,
        since: Timestamp,
    ) -> Result<PostingScan, KairosError> {
        temporal::postings_since(&self.repo.snapshot()?, source, since)
    }

    /// Check a claim's temporal neighborhood for logical contradictions.
    pub fn detect_paradox(&self, claim: Nid) -> Result<Option<ParadoxReport>, KairosError> {
        self.repo.detect_paradox(claim)
    }
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
        CandidateNode, EdgeType, EdgeWeight, NodePayload, SourceType,
    };
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
                    source_type: SourceType::Document,
                    uri: "file:///paper.pdf".into(),
                    title: "paper".into(),
                    ingested_at: Timestamp(1_000),
                },
                "ingestor",
            )
            .expect("source");
        repo.create_span(
            NewSpan {
                source_nid: source,
                start_offset: 10,
                end_offset: 90,
                text: "relevant paragraph".into(),
                page: None,
            },
            "ingestor",
            Timestamp(1_001),
        )
        .expect("span")
    }

    fn entity(span: Nid, name: &str) -> CandidateNode {
        CandidateNode {
            payload: NodePayload::Entity {
                name: name.into(),
                entity_type: "concept".into(),
            },
            evidence_spans: std::collections::BTreeSet::from([span]),
            confidence: Confidence::from_thousandths(700),
            created_at: Timestamp(2_000),
        }
    }

    #[test]
    fn find_path_bounded_by_hops() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);
        let w = EdgeWeight::new(1);

        let a = repo.create_node(entity(span, "a"), "t").expect("node");
        let b = repo.create_node(entity(span, "b"), "t").expect("node");
        let c = repo.create_node(entity(span, "c"), "t").expect("node");
        repo.create_edge(EdgeType::RelatedTo, a, b, w, "t", Timestamp(0)).expect("edge");
        repo.create_edge(EdgeType::RelatedTo, b, c, w, "t", Timestamp(0)).expect("edge");

        let query = repo.query();
        let path = query.find_path(a, c, 4).expect("path").expect("found");
        assert_eq!(path.nodes, vec![a, b, c]);
        assert_eq!(path.edges.len(), 2);

        // One hop is not enough to reach c.
        assert!(query.find_path(a, c, 1).expect("path").is_none());
    }

    #[test]
    fn find_path_ties_break_on_lowest_edge_nid() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);
        let w = EdgeWeight::new(1);

        let a = repo.create_node(entity(span, "a"), "t").expect("node");
        let b1 = repo.create_node(entity(span, "b1"), "t").expect("node");
        let b2 = repo.create_node(entity(span, "b2"), "t").expect("node");
        let c = repo.create_node(entity(span, "c"), "t").expect("node");

        // Two equal-length routes a -> b1 -> c and a -> b2 -> c; the first
        // created edges have the lower NIDs and must win.
        let low = repo
            .create_edge(EdgeType::RelatedTo, a, b1, w, "t", Timestamp(0))
            .expect("edge");
        repo.create_edge(EdgeType::RelatedTo, a, b2, w, "t", Timestamp(0)).expect("edge");
        let low2 = repo
            .create_edge(EdgeType::RelatedTo, b1, c, w, "t", Timestamp(0))
            .expect("edge");
        repo.create_edge(EdgeType::RelatedTo, b2, c, w, "t", Timestamp(0)).expect("edge");

        let path = repo.query().find_path(a, c, 4).expect("path").expect("found");
        assert_eq!(path.nodes, vec![a, b1, c]);
        assert_eq!(path.edges, vec![low, low2]);
    }

    #[test]
    fn find_path_skips_tombstoned() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);
        let w = EdgeWeight::new(1);

        let a = repo.create_node(entity(span, "a"), "t").expect("node");
        let b = repo.create_node(entity(span, "b"), "t").expect("node");
        let edge = repo
            .create_edge(EdgeType::RelatedTo, a, b, w, "t", Timestamp(0))
            .expect("edge");

        repo.tombstone(edge, "t", "retracted", Timestamp(0)).expect("tombstone");
        assert!(repo.query().find_path(a, b, 4).expect("path").is_none());
    }

    #[test]
    fn search_pages_resume_from_cursor() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);
        for index in 0..7 {
            repo.create_node(entity(span, &format!("entity-{index}")), "t")
                .expect("node");
        }

        let query = repo.query();
        let filter = EntityFilter::default();

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = query.search_entities(&filter, cursor, 3).expect("page");
            seen.extend(page.records.iter().map(|r| r.nid));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen.len(), 7);
        // NID order, no duplicates.
        let mut sorted = seen.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(seen, sorted);
    }

    #[test]
    fn search_filters_kind_label_and_confidence() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);

        repo.create_node(entity(span, "sourdough bread"), "t").expect("node");
        let mut low = entity(span, "sourdough rolls");
        low.confidence = Confidence::from_thousandths(100);
        repo.create_node(low, "t").expect("node");

        let query = repo.query();
        let filter = EntityFilter {
            kind: Some(NodeKind::Entity),
            label_contains: Some("SOURDOUGH".into()),
            min_confidence: Some(Confidence::from_thousandths(500)),
            include_tombstoned: false,
        };
        let page = query.search_entities(&filter, None, 10).expect("page");
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].payload.label(), "sourdough bread");
    }

    #[test]
    fn view_reconstructs_state_before_revision() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);
        let nid = repo.create_node(entity(span, "x"), "t").expect("node");

        let revision = crate::repo::NodeRevision {
            confidence: Some(Confidence::from_thousandths(900)),
            ..crate::repo::NodeRevision::default()
        };
        repo.revise_node(nid, revision, 1, "t", Timestamp(5_000)).expect("revise");

        let query = repo.query();
        let before = query.snapshot_at(Timestamp(3_000)).expect("view");
        let node = before.node(nid).expect("node").expect("some");
        assert_eq!(node.confidence, Confidence::from_thousandths(700));
        assert_eq!(node.version, 1);

        let after = query.snapshot_at(Timestamp(6_000)).expect("view");
        let node = after.node(nid).expect("node").expect("some");
        assert_eq!(node.confidence, Confidence::from_thousandths(900));

        // Before creation the node does not exist.
        let early = query.snapshot_at(Timestamp(100)).expect("view");
        assert!(early.node(nid).expect("node").is_none());
    }

    #[test]
    fn evidence_chain_resolves_span_and_source() {
        let (_temp, repo) = open_repo();
        let span = seed_span(&repo);
        let nid = repo.create_node(entity(span, "x"), "t").expect("node");

        let chain = repo.query().evidence_chain(nid).expect("chain");
        assert_eq!(chain.links.len(), 1);
        assert_eq!(chain.skipped, 0);
        assert_eq!(chain.links[0].span.nid, span);
        assert_eq!(chain.links[0].source.title, "paper");
    }
}
