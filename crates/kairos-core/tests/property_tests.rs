//! # Property-Based Tests
//!
//! Determinism and ordering invariants verified with proptest.

use kairos_core::{
    AllenRelation, CandidateNode, Confidence, Interval, NodePayload, NodeRevision, Repository,
    Timestamp, codec, relation_of,
    repo::{NewSource, NewSpan},
    types::{Nid, SourceType},
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeSet;
use tempfile::tempdir;

fn interval_strategy() -> impl Strategy<Value = Interval> {
    let endpoint = prop_oneof![Just(None), (-10_000i64..10_000).prop_map(|ms| Some(Timestamp(ms)))];
    (endpoint.clone(), endpoint).prop_filter_map("well-formed interval", |(start, end)| {
        let interval = Interval::new(start, end);
        interval.is_well_formed().then_some(interval)
    })
}

proptest! {
    /// Byte order of NID keys equals numeric order.
    #[test]
    fn nid_keys_preserve_order(a in any::<u64>(), b in any::<u64>()) {
        prop_assert_eq!(a.cmp(&b), codec::nid_key(Nid(a)).cmp(&codec::nid_key(Nid(b))));
    }

    /// Temporal keys round-trip and order by (owner, timestamp).
    #[test]
    fn temporal_keys_roundtrip_and_order(
        owner_a in 0u64..1000,
        owner_b in 0u64..1000,
        ms_a in 0i64..=i64::MAX,
        ms_b in 0i64..=i64::MAX,
    ) {
        let ka = codec::temporal_key(Nid(owner_a), Timestamp(ms_a)).expect("encode");
        let kb = codec::temporal_key(Nid(owner_b), Timestamp(ms_b)).expect("encode");
        prop_assert_eq!(
            codec::decode_temporal_key(&ka).expect("decode"),
            (Nid(owner_a), Timestamp(ms_a))
        );
        prop_assert_eq!((owner_a, ms_a).cmp(&(owner_b, ms_b)), ka.cmp(&kb));
    }

    /// The converse of the computed relation is the relation of the swapped
    /// arguments, for every well-formed interval pair including open ends.
    #[test]
    fn relation_converse_agrees(a in interval_strategy(), b in interval_strategy()) {
        prop_assert_eq!(relation_of(&a, &b).inverse(), relation_of(&b, &a));
    }

    /// Equal endpoints never classify as Overlaps; ties resolve to
    /// Meets/Starts/Finishes per Allen's definitions.
    #[test]
    fn equal_endpoints_never_overlap(start in -1000i64..1000, len_a in 1i64..100, len_b in 1i64..100) {
        let a = Interval::bounded(Timestamp(start), Timestamp(start + len_a));
        let b = Interval::bounded(Timestamp(start), Timestamp(start + len_b));
        let relation = relation_of(&a, &b);
        prop_assert!(
            matches!(
                relation,
                AllenRelation::Starts | AllenRelation::StartedBy | AllenRelation::Equals
            ),
            "shared start classified as {relation:?}"
        );
    }

    /// Version numbers stay 1, 2, 3, ... with no gaps across any sequence
    /// of revisions.
    #[test]
    fn version_sequence_gap_free(confidences in vec(0u16..=1000, 1..8)) {
        let temp = tempdir().expect("temp dir");
        let repo = Repository::open(temp.path().join("prop.kairos")).expect("open");

        let source = repo.create_source(NewSource {
            source_type: SourceType::Document,
            uri: "file:///doc".into(),
            title: "doc".into(),
            ingested_at: Timestamp(0),
        }, "t").expect("source");
        let span = repo.create_span(NewSpan {
            source_nid: source,
            start_offset: 0,
            end_offset: 1,
            text: "x".into(),
            page: None,
        }, "t", Timestamp(0)).expect("span");
        let nid = repo.create_node(CandidateNode {
            payload: NodePayload::Entity { name: "e".into(), entity_type: "t".into() },
            evidence_spans: BTreeSet::from([span]),
            confidence: Confidence::from_thousandths(500),
            created_at: Timestamp(1),
        }, "t").expect("node");

        for (index, conf) in confidences.iter().enumerate() {
            let revision = NodeRevision {
                confidence: Some(Confidence::from_thousandths(*conf)),
                ..NodeRevision::default()
            };
            repo.revise_node(nid, revision, index as u32 + 1, "t", Timestamp(2)).expect("revise");
        }

        let versions: Vec<u32> = repo
            .history(nid)
            .expect("history")
            .records
            .iter()
            .map(|r| r.entry.version)
            .collect();
        let expected: Vec<u32> = (1..=confidences.len() as u32 + 1).collect();
        prop_assert_eq!(versions, expected);
    }

    /// Identical admission sequences assign identical NIDs.
    #[test]
    fn nid_assignment_is_deterministic(names in vec("[a-z]{1,12}", 1..20)) {
        let temp = tempdir().expect("temp dir");
        let mut assigned = Vec::new();

        for run in 0..2 {
            let repo = Repository::open(temp.path().join(format!("run-{run}.kairos")))
                .expect("open");
            let source = repo.create_source(NewSource {
                source_type: SourceType::Document,
                uri: "file:///doc".into(),
                title: "doc".into(),
                ingested_at: Timestamp(0),
            }, "t").expect("source");
            let span = repo.create_span(NewSpan {
                source_nid: source,
                start_offset: 0,
                end_offset: 1,
                text: "x".into(),
                page: None,
            }, "t", Timestamp(0)).expect("span");

            let nids: Vec<u64> = names.iter().map(|name| {
                repo.create_node(CandidateNode {
                    payload: NodePayload::Entity {
                        name: name.clone(),
                        entity_type: "t".into(),
                    },
                    evidence_spans: BTreeSet::from([span]),
                    confidence: Confidence::from_thousandths(500),
                    created_at: Timestamp(1),
                }, "t").expect("node").0
            }).collect();
            assigned.push(nids);
        }

        prop_assert_eq!(&assigned[0], &assigned[1]);
    }
}
