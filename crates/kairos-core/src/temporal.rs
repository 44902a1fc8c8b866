//! # Temporal Index & Allen Engine
//!
//! Maintains the validity-window chain of every claim and answers
//! interval-relation queries between any two intervals using Allen's
//! interval algebra.
//!
//! Open interval ends are `None`: unbounded past for starts, "extends to
//! now" for ends. Relations over open ends are evaluated lazily from the
//! endpoints at query time; no sentinel timestamp is ever materialized, so
//! closing a window later never requires rescanning dependents.
//!
//! Composition of relations is table-driven. The 13x13 transitivity table
//! is derived once per process by exhaustive enumeration of integer-endpoint
//! witnesses (three proper intervals cover every weak ordering of their six
//! endpoints within a small finite domain, which reproduces Allen's table
//! exactly) and cached behind a `OnceLock`.

use crate::codec;
use crate::store::{KvRead, Snapshot, SubStore, WriteTxn};
use crate::types::{
    EdgeType, KairosError, Nid, Timestamp, ValidityWindow, ValidationError, WindowChain,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::OnceLock;

// =============================================================================
// INTERVALS
// =============================================================================

/// A time interval with optionally open ends.
///
/// `None` start means unbounded past; `None` end means unbounded future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

impl Interval {
    /// A fully bounded interval.
    #[must_use]
    pub const fn bounded(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// An interval with open ends as given.
    #[must_use]
    pub const fn new(start: Option<Timestamp>, end: Option<Timestamp>) -> Self {
        Self { start, end }
    }

    /// Whether the endpoints are ordered (`start <= end` when both bounded).
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match (self.start, self.end) {
            (Some(start), Some(end)) => start <= end,
            _ => true,
        }
    }
}

impl From<&ValidityWindow> for Interval {
    fn from(window: &ValidityWindow) -> Self {
        Self {
            start: window.valid_from,
            end: window.valid_until,
        }
    }
}

// =============================================================================
// ALLEN RELATIONS
// =============================================================================

/// The 13 base relations of Allen's interval algebra.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AllenRelation {
    Before,
    Meets,
    Overlaps,
    Starts,
    During,
    Finishes,
    Equals,
    After,
    MetBy,
    OverlappedBy,
    StartedBy,
    Contains,
    FinishedBy,
}

impl AllenRelation {
    /// All 13 relations in bit order.
    pub const ALL: [Self; 13] = [
        Self::Before,
        Self::Meets,
        Self::Overlaps,
        Self::Starts,
        Self::During,
        Self::Finishes,
        Self::Equals,
        Self::After,
        Self::MetBy,
        Self::OverlappedBy,
        Self::StartedBy,
        Self::Contains,
        Self::FinishedBy,
    ];

    /// Stable bit index of this relation.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Before => 0,
            Self::Meets => 1,
            Self::Overlaps => 2,
            Self::Starts => 3,
            Self::During => 4,
            Self::Finishes => 5,
            Self::Equals => 6,
            Self::After => 7,
            Self::MetBy => 8,
            Self::OverlappedBy => 9,
            Self::StartedBy => 10,
            Self::Contains => 11,
            Self::FinishedBy => 12,
        }
    }

    /// The converse relation: `rel(a, b).inverse() == rel(b, a)`.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Before => Self::After,
            Self::Meets => Self::MetBy,
            Self::Overlaps => Self::OverlappedBy,
            Self::Starts => Self::StartedBy,
            Self::During => Self::Contains,
            Self::Finishes => Self::FinishedBy,
            Self::Equals => Self::Equals,
            Self::After => Self::Before,
            Self::MetBy => Self::Meets,
            Self::OverlappedBy => Self::Overlaps,
            Self::StartedBy => Self::Starts,
            Self::Contains => Self::During,
            Self::FinishedBy => Self::Finishes,
        }
    }
}

/// A set of Allen relations as a 13-bit mask.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RelationSet(u16);

impl RelationSet {
    /// The empty set: a logical contradiction when it appears as the
    /// intersection of observed and asserted relations.
    pub const EMPTY: Self = Self(0);

    /// All 13 relations.
    pub const ALL: Self = Self(0x1FFF);

    /// Relations under which two intervals share no instant.
    pub const DISJOINT: Self = Self(
        (1u16 << AllenRelation::Before.index())
            | (1u16 << AllenRelation::Meets.index())
            | (1u16 << AllenRelation::After.index())
            | (1u16 << AllenRelation::MetBy.index()),
    );

    /// Relations under which two intervals share at least one instant.
    pub const COVALID: Self = Self(Self::ALL.0 & !Self::DISJOINT.0);

    /// The singleton set of one relation.
    #[must_use]
    pub const fn only(relation: AllenRelation) -> Self {
        Self(1u16 << relation.index())
    }

    /// This set plus one relation.
    #[must_use]
    pub const fn with(self, relation: AllenRelation) -> Self {
        Self(self.0 | (1u16 << relation.index()))
    }

    /// Set union.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Set intersection.
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Membership test.
    #[must_use]
    pub const fn contains(self, relation: AllenRelation) -> bool {
        self.0 & (1u16 << relation.index()) != 0
    }

    /// Whether no relation is in the set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of relations in the set.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// The set of converse relations.
    #[must_use]
    pub fn inverse(self) -> Self {
        let mut result = Self::EMPTY;
        for relation in self.iter() {
            result = result.with(relation.inverse());
        }
        result
    }

    /// Iterate members in bit order.
    pub fn iter(self) -> impl Iterator<Item = AllenRelation> {
        AllenRelation::ALL
            .into_iter()
            .filter(move |r| self.contains(*r))
    }
}

// Endpoint comparisons with open-end semantics. A `None` start is unbounded
// past, a `None` end is unbounded future; two open ends on the same side
// compare equal.

fn cmp_starts(a: Option<Timestamp>, b: Option<Timestamp>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y),
    }
}

fn cmp_ends(a: Option<Timestamp>, b: Option<Timestamp>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(&y),
    }
}

fn cmp_end_to_start(end: Option<Timestamp>, start: Option<Timestamp>) -> Ordering {
    match (end, start) {
        // An open end is after any start; any end is after an open start.
        (None, _) | (Some(_), None) => Ordering::Greater,
        (Some(e), Some(s)) => e.cmp(&s),
    }
}

/// Compute the Allen relation between two well-formed intervals.
///
/// Classification uses endpoint comparisons only. Ties on endpoints resolve
/// to `Meets`/`Starts`/`Finishes` (and converses) per Allen's definitions,
/// never to `Overlaps`.
#[must_use]
pub fn relation_of(a: &Interval, b: &Interval) -> AllenRelation {
    match cmp_end_to_start(a.end, b.start) {
        Ordering::Less => return AllenRelation::Before,
        Ordering::Equal => return AllenRelation::Meets,
        Ordering::Greater => {}
    }
    match cmp_end_to_start(b.end, a.start) {
        Ordering::Less => return AllenRelation::After,
        Ordering::Equal => return AllenRelation::MetBy,
        Ordering::Greater => {}
    }

    // The interiors intersect; classify by start and end comparison.
    match (cmp_starts(a.start, b.start), cmp_ends(a.end, b.end)) {
        (Ordering::Equal, Ordering::Equal) => AllenRelation::Equals,
        (Ordering::Equal, Ordering::Less) => AllenRelation::Starts,
        (Ordering::Equal, Ordering::Greater) => AllenRelation::StartedBy,
        (Ordering::Greater, Ordering::Equal) => AllenRelation::Finishes,
        (Ordering::Less, Ordering::Equal) => AllenRelation::FinishedBy,
        (Ordering::Less, Ordering::Greater) => AllenRelation::Contains,
        (Ordering::Greater, Ordering::Less) => AllenRelation::During,
        (Ordering::Less, Ordering::Less) => AllenRelation::Overlaps,
        (Ordering::Greater, Ordering::Greater) => AllenRelation::OverlappedBy,
    }
}

// =============================================================================
// COMPOSITION
// =============================================================================

static COMPOSITION: OnceLock<[[RelationSet; 13]; 13]> = OnceLock::new();

fn composition_table() -> &'static [[RelationSet; 13]; 13] {
    COMPOSITION.get_or_init(|| {
        let mut table = [[RelationSet::EMPTY; 13]; 13];

        // Three proper intervals have six endpoints; every weak ordering of
        // six points is realizable with integer endpoints in 0..8, so this
        // enumeration witnesses every entry of the transitivity table.
        let mut intervals = Vec::new();
        for start in 0i64..8 {
            for end in (start + 1)..8 {
                intervals.push(Interval::bounded(Timestamp(start), Timestamp(end)));
            }
        }

        for a in &intervals {
            for b in &intervals {
                let r1 = relation_of(a, b).index();
                for c in &intervals {
                    let r2 = relation_of(b, c).index();
                    table[r1][r2] = table[r1][r2].with(relation_of(a, c));
                }
            }
        }
        table
    })
}

/// Compose two relations: the set of relations possible between `a` and `c`
/// given `rel(a, b) == r1` and `rel(b, c) == r2`.
///
/// Table-driven so that consistency checking never re-derives from raw
/// timestamps or re-scans interval triples.
#[must_use]
pub fn compose(r1: AllenRelation, r2: AllenRelation) -> RelationSet {
    composition_table()[r1.index()][r2.index()]
}

/// Compose two relation sets: the union of `compose` over all pairs.
#[must_use]
pub fn compose_sets(a: RelationSet, b: RelationSet) -> RelationSet {
    let mut result = RelationSet::EMPTY;
    for r1 in a.iter() {
        for r2 in b.iter() {
            result = result.union(compose(r1, r2));
        }
    }
    result
}

// =============================================================================
// VALIDITY WINDOW CHAINS
// =============================================================================

/// Read the full window chain of a claim (empty if none recorded).
pub fn window_chain(view: &impl KvRead, claim: Nid) -> Result<WindowChain, KairosError> {
    let key = codec::nid_key(claim);
    match view.get_raw(SubStore::TemporalIndex, &key)? {
        Some(bytes) => Ok(codec::decode_chain(&bytes)?),
        None => Ok(WindowChain::default()),
    }
}

/// The interval of a claim's most recent window, if it has one.
pub fn current_interval(view: &impl KvRead, claim: Nid) -> Result<Option<Interval>, KairosError> {
    Ok(window_chain(view, claim)?.current().map(Interval::from))
}

/// Insert a new validity window for a claim.
///
/// If an open window exists it is closed at the new window's start
/// (`valid_until = valid_from`, `superseded_by` linked), atomically with the
/// insertion; the chain record is rewritten in the caller's transaction.
pub fn insert_window(
    txn: &WriteTxn,
    claim: Nid,
    window_nid: Nid,
    valid_from: Option<Timestamp>,
    valid_until: Option<Timestamp>,
) -> Result<(), KairosError> {
    if let (Some(from), Some(until)) = (valid_from, valid_until)
        && until < from
    {
        return Err(ValidationError::WindowBounds { claim }.into());
    }

    let mut chain = window_chain(txn, claim)?;

    if let Some(open) = chain.windows.iter_mut().find(|w| w.is_open()) {
        // The successor must not start before the window it closes; a
        // successor with an unbounded start can never close anything.
        let starts_in_order = match (open.valid_from, valid_from) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(prior), Some(new)) => prior <= new,
        };
        if !starts_in_order {
            return Err(ValidationError::WindowOrder { claim }.into());
        }
        open.valid_until = valid_from;
        open.superseded_by = Some(window_nid);
    }

    chain.windows.push(ValidityWindow {
        nid: window_nid,
        claim_nid: claim,
        valid_from,
        valid_until,
        superseded_by: None,
    });

    let bytes = codec::encode_chain(&chain)?;
    txn.put(SubStore::TemporalIndex, &codec::nid_key(claim), &bytes)
}

// =============================================================================
// SOURCE/TIME POSTINGS
// =============================================================================

/// Record that `member` (a fact node) was derived from `source` at `at`.
pub fn insert_posting(
    txn: &WriteTxn,
    source: Nid,
    at: Timestamp,
    member: Nid,
) -> Result<(), KairosError> {
    let key = codec::posting_key(source, at, member)?;
    txn.put(SubStore::TemporalIndex, &key, &codec::nid_key(member))
}

/// Scan of source/time postings: "all facts from source X after time T".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PostingScan {
    pub entries: Vec<(Timestamp, Nid)>,
    /// Damaged postings skipped during the scan.
    pub skipped: usize,
}

/// All facts derived from a source at or after `since`, in time order.
pub fn postings_since(
    snap: &Snapshot,
    source: Nid,
    since: Timestamp,
) -> Result<PostingScan, KairosError> {
    let start = codec::temporal_key(source, since)?;
    let prefix = codec::nid_key(source);
    let mut scan = PostingScan::default();

    for entry in snap.range_from(SubStore::TemporalIndex, &start)? {
        let (key, _) = entry?;
        if key.len() != 24 || key[0..8] != prefix {
            break;
        }
        match codec::decode_posting_key(&key) {
            Ok((_, at, member)) => scan.entries.push((at, member)),
            Err(_) => scan.skipped += 1,
        }
    }
    Ok(scan)
}

// =============================================================================
// PARADOX DETECTION
// =============================================================================

/// One inconsistency found while walking a claim's temporal neighborhood.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParadoxConflict {
    /// The claim whose recorded window contradicts the asserted relation.
    pub other_claim: Nid,
    /// Intermediate claim for two-hop (composed) constraints.
    pub via: Option<Nid>,
    /// Relation actually computed from the recorded endpoints.
    pub observed: AllenRelation,
    /// Relations the edge assertions allow; the intersection with
    /// `{observed}` is empty, which is the paradox.
    pub allowed: RelationSet,
}

/// A logical contradiction in recorded validity windows.
///
/// Paradoxes are data about the world, not defects: the repository persists
/// them as flagged Gap nodes rather than aborting ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParadoxReport {
    pub claim_nid: Nid,
    /// Windows whose recorded end precedes their start.
    pub malformed_windows: Vec<Nid>,
    pub conflicts: Vec<ParadoxConflict>,
}

impl ParadoxReport {
    /// One-line description suitable for a Gap node question.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.malformed_windows.is_empty() {
            parts.push(format!(
                "{} malformed window(s)",
                self.malformed_windows.len()
            ));
        }
        for conflict in &self.conflicts {
            match conflict.via {
                Some(via) => parts.push(format!(
                    "claim {} relates {:?} to claim {} but edges via claim {} allow no such relation",
                    self.claim_nid.0, conflict.observed, conflict.other_claim.0, via.0
                )),
                None => parts.push(format!(
                    "claim {} relates {:?} to claim {} against the asserted edge",
                    self.claim_nid.0, conflict.observed, conflict.other_claim.0
                )),
            }
        }
        format!(
            "temporal paradox involving claim {}: {}",
            self.claim_nid.0,
            parts.join("; ")
        )
    }
}

/// Relation set asserted by a constraint edge, if the type asserts one.
///
/// `Contradicts` asserts the claims are never simultaneously valid;
/// `Supports` asserts their validity shares at least one instant. Both sets
/// are closed under the converse, so edge direction does not matter here.
const fn edge_constraint(edge_type: EdgeType) -> Option<RelationSet> {
    match edge_type {
        EdgeType::Contradicts => Some(RelationSet::DISJOINT),
        EdgeType::Supports => Some(RelationSet::COVALID),
        EdgeType::Mentions | EdgeType::RelatedTo => None,
    }
}

/// Walk the validity windows of claims connected to `claim` by
/// Supports/Contradicts edges and report any logical contradiction.
///
/// A paradox is an empty relation set: the relation computed from recorded
/// endpoints does not intersect the set the edges assert (directly, or
/// composed across a two-hop chain). Claims without recorded windows impose
/// no constraints and are skipped.
pub fn detect_paradox(
    view: &impl KvRead,
    claim: Nid,
) -> Result<Option<ParadoxReport>, KairosError> {
    let chain = window_chain(view, claim)?;

    let malformed_windows: Vec<Nid> = chain
        .windows
        .iter()
        .filter(|w| !Interval::from(*w).is_well_formed())
        .map(|w| w.nid)
        .collect();

    let claim_interval = chain.current().map(Interval::from);

    let mut conflicts = Vec::new();
    if let Some(claim_iv) = claim_interval {
        // Live constraint edges, grouped per endpoint, in edge-nid order.
        let mut constraints: Vec<(Nid, Nid, RelationSet)> = Vec::new();
        for (_, value) in view.scan(SubStore::Edges)? {
            let Ok(edge) = codec::decode_edge(&value) else {
                continue;
            };
            if edge.is_tombstoned() {
                continue;
            }
            if let Some(allowed) = edge_constraint(edge.edge_type) {
                constraints.push((edge.from_nid, edge.to_nid, allowed));
            }
        }

        let incident = |nid: Nid| {
            constraints.iter().filter_map(move |&(from, to, allowed)| {
                if from == nid {
                    Some((to, allowed))
                } else if to == nid {
                    Some((from, allowed))
                } else {
                    None
                }
            })
        };

        let mut seen: BTreeSet<(Nid, Option<Nid>)> = BTreeSet::new();

        for (neighbor, allowed) in incident(claim) {
            let Some(neighbor_iv) = current_interval(view, neighbor)? else {
                continue;
            };
            let observed = relation_of(&claim_iv, &neighbor_iv);
            if !allowed.contains(observed) && seen.insert((neighbor, None)) {
                conflicts.push(ParadoxConflict {
                    other_claim: neighbor,
                    via: None,
                    observed,
                    allowed,
                });
            }

            // Two-hop: compose the constraint with each of the neighbor's
            // own constraint edges instead of rescanning raw timestamps.
            for (second, second_allowed) in incident(neighbor) {
                if second == claim {
                    continue;
                }
                let Some(second_iv) = current_interval(view, second)? else {
                    continue;
                };
                let composed = compose_sets(allowed, second_allowed);
                let observed = relation_of(&claim_iv, &second_iv);
                if !composed.contains(observed) && seen.insert((second, Some(neighbor))) {
                    conflicts.push(ParadoxConflict {
                        other_claim: second,
                        via: Some(neighbor),
                        observed,
                        allowed: composed,
                    });
                }
            }
        }
    }

    if malformed_windows.is_empty() && conflicts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(ParadoxReport {
            claim_nid: claim,
            malformed_windows,
            conflicts,
        }))
    }
}

// =============================================================================
// TESTS
// =============================================================================
