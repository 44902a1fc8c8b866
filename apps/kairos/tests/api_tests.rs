//! Integration tests for the KAIROS HTTP API.
//!
//! Uses axum-test to drive the router without starting a real server.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use axum_test::TestServer;
use kairos::api::{
    AppState, BatchResponse, EvidenceResponse, HealthResponse, HistoryResponse, NidResponse,
    NodeResponse, ParadoxResponse, PathResponse, SearchResponse, StatusResponse, create_router,
};
use kairos::config::ServerConfig;
use kairos_core::{Repository, Timestamp};
use serde_json::json;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Create a test server over a fresh store in a temp directory.
fn create_test_server() -> (TestServer, tempfile::TempDir) {
    let temp = tempfile::tempdir().unwrap();
    let repo = Repository::open(temp.path().join("api.kairos")).unwrap();
    let state = AppState::new(repo);
    let router = create_router(state, &ServerConfig::default());
    (TestServer::new(router).unwrap(), temp)
}

/// Register a source and anchor a span, returning (source_nid, span_nid).
async fn seed_evidence(server: &TestServer) -> (u64, u64) {
    let response = server
        .post("/sources")
        .json(&json!({
            "source_type": "video",
            "uri": "https://example.org/talk",
            "title": "talk",
        }))
        .await;
    response.assert_status_ok();
    let source: NidResponse = response.json();
    let source_nid = source.nid.unwrap();

    let response = server
        .post("/spans")
        .json(&json!({
            "source_nid": source_nid,
            "start_offset": 0,
            "end_offset": 120,
            "text": "transcript excerpt",
        }))
        .await;
    response.assert_status_ok();
    let span: NidResponse = response.json();
    (source_nid, span.nid.unwrap())
}

fn claim_payload(subject: &str, from: Option<i64>, until: Option<i64>) -> serde_json::Value {
    json!({
        "Claim": {
            "subject": subject,
            "statement": format!("a statement about {subject}"),
            "valid_from": from.map(Timestamp),
            "valid_until": until.map(Timestamp),
        }
    })
}

fn candidate(payload: serde_json::Value, span: u64) -> serde_json::Value {
    json!({
        "payload": payload,
        "evidence_spans": [span],
        "confidence": 600,
        "created_at": 2000,
    })
}

// =============================================================================
// HEALTH & STATUS
// =============================================================================

#[tokio::test]
async fn health_endpoint_reports_version() {
    let (server, _temp) = create_test_server();

    let response = server.get("/health").await;
    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn status_reflects_ingested_records() {
    let (server, _temp) = create_test_server();

    let response = server.get("/status").await;
    response.assert_status_ok();
    let status: StatusResponse = response.json();
    assert_eq!(status.sources, 0);
    assert_eq!(status.nodes, 0);

    seed_evidence(&server).await;

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.sources, 1);
    assert_eq!(status.spans, 1);
}

// =============================================================================
// INGESTION
// =============================================================================

#[tokio::test]
async fn batch_admission_returns_receipt() {
    let (server, _temp) = create_test_server();
    let (_, span) = seed_evidence(&server).await;

    let response = server
        .post("/batch")
        .json(&json!({
            "nodes": [
                candidate(json!({"Entity": {"name": "rain", "entity_type": "phenomenon"}}), span),
                candidate(claim_payload("weather", Some(0), None), span),
            ],
            "edges": [
                {
                    "edge_type": "Mentions",
                    "from": {"Batch": 1},
                    "to": {"Batch": 0},
                    "weight": 1,
                }
            ],
        }))
        .await;
    response.assert_status_ok();
    let batch: BatchResponse = response.json();
    assert!(batch.success);
    assert_eq!(batch.node_nids.len(), 2);
    assert_eq!(batch.edge_nids.len(), 1);
}

#[tokio::test]
async fn batch_with_dangling_evidence_is_rejected() {
    let (server, _temp) = create_test_server();

    let response = server
        .post("/batch")
        .json(&json!({
            "nodes": [
                candidate(json!({"Entity": {"name": "x", "entity_type": "t"}}), 9999),
            ],
            "edges": [],
        }))
        .await;
    response.assert_status_not_found();

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.nodes, 0, "rejected batch must not write nodes");
}

// =============================================================================
// NODES & AUDIT
// =============================================================================

#[tokio::test]
async fn revise_and_history_roundtrip() {
    let (server, _temp) = create_test_server();
    let (_, span) = seed_evidence(&server).await;

    let batch: BatchResponse = server
        .post("/batch")
        .json(&json!({
            "nodes": [candidate(claim_payload("c1", None, None), span)],
            "edges": [],
        }))
        .await
        .json();
    let nid = batch.node_nids[0];

    // Stale expected version conflicts.
    let response = server
        .post(&format!("/nodes/{nid}/revise"))
        .json(&json!({
            "expected_version": 7,
            "actor": "learner",
            "confidence_thousandths": 900,
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);

    let response = server
        .post(&format!("/nodes/{nid}/revise"))
        .json(&json!({
            "expected_version": 1,
            "actor": "learner",
            "confidence_thousandths": 900,
        }))
        .await;
    response.assert_status_ok();
    let revised: NidResponse = response.json();
    assert_eq!(revised.version, Some(2));

    let node: NodeResponse = server.get(&format!("/nodes/{nid}")).await.json();
    assert_eq!(node.node.unwrap().confidence.thousandths(), 900);

    let history: HistoryResponse = server.get(&format!("/nodes/{nid}/history")).await.json();
    assert_eq!(history.records.len(), 2);
    assert_eq!(history.records[0].entry.version, 1);
    assert_eq!(history.records[1].entry.version, 2);
}

#[tokio::test]
async fn tombstoned_node_disappears_from_default_search() {
    let (server, _temp) = create_test_server();
    let (_, span) = seed_evidence(&server).await;

    let batch: BatchResponse = server
        .post("/batch")
        .json(&json!({
            "nodes": [candidate(json!({"Entity": {"name": "x", "entity_type": "t"}}), span)],
            "edges": [],
        }))
        .await
        .json();
    let nid = batch.node_nids[0];

    let response = server
        .post(&format!("/nodes/{nid}/tombstone"))
        .json(&json!({"actor": "curator", "reason": "duplicate"}))
        .await;
    response.assert_status_ok();

    let search: SearchResponse = server.get("/entities").await.json();
    assert!(search.records.iter().all(|r| r.nid.0 != nid));

    let search: SearchResponse = server.get("/entities?include_tombstoned=true").await.json();
    assert!(search.records.iter().any(|r| r.nid.0 == nid));
}

// =============================================================================
// QUERIES
// =============================================================================

#[tokio::test]
async fn path_and_evidence_queries() {
    let (server, _temp) = create_test_server();
    let (source, span) = seed_evidence(&server).await;

    let batch: BatchResponse = server
        .post("/batch")
        .json(&json!({
            "nodes": [
                candidate(json!({"Entity": {"name": "a", "entity_type": "t"}}), span),
                candidate(json!({"Entity": {"name": "b", "entity_type": "t"}}), span),
            ],
            "edges": [
                {"edge_type": "RelatedTo", "from": {"Batch": 0}, "to": {"Batch": 1}, "weight": 1}
            ],
        }))
        .await
        .json();
    let (a, b) = (batch.node_nids[0], batch.node_nids[1]);

    let path: PathResponse = server
        .get(&format!("/path?from={a}&to={b}&max_hops=4"))
        .await
        .json();
    assert!(path.found);
    assert_eq!(path.nodes, vec![a, b]);

    let evidence: EvidenceResponse = server.get(&format!("/nodes/{a}/evidence")).await.json();
    assert_eq!(evidence.links.len(), 1);
    assert_eq!(evidence.links[0].source.nid.0, source);
}

#[tokio::test]
async fn paradox_endpoint_flags_overlapping_contradiction() {
    let (server, _temp) = create_test_server();
    let (_, span) = seed_evidence(&server).await;

    let batch: BatchResponse = server
        .post("/batch")
        .json(&json!({
            "nodes": [
                candidate(claim_payload("a", Some(0), None), span),
                candidate(claim_payload("b", Some(500), None), span),
            ],
            "edges": [
                {"edge_type": "Contradicts", "from": {"Batch": 0}, "to": {"Batch": 1}, "weight": 1}
            ],
        }))
        .await
        .json();
    let claim = batch.node_nids[0];

    let paradox: ParadoxResponse = server.get(&format!("/nodes/{claim}/paradox")).await.json();
    assert!(paradox.success);
    let report = paradox.report.expect("overlapping contradiction is a paradox");
    assert_eq!(report.conflicts.len(), 1);
}

#[tokio::test]
async fn metrics_endpoint_reports_gauges() {
    let (server, _temp) = create_test_server();
    seed_evidence(&server).await;

    let response = server.get("/metrics").await;
    response.assert_status_ok();
    let body = response.text();
    assert!(body.contains("kairos_records{store=\"sources\"} 1"));
    assert!(body.contains("kairos_records{store=\"spans\"} 1"));
}

#[tokio::test]
async fn export_endpoint_returns_verifiable_stream() {
    let (server, _temp) = create_test_server();
    seed_evidence(&server).await;

    let response = server.get("/export").await;
    response.assert_status_ok();
    let export: kairos::api::ExportResponse = response.json();
    assert!(export.success);

    let data = export.data.unwrap();
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data).unwrap();
    kairos_core::verify_canonical(&bytes).unwrap();
    assert_eq!(
        export.digest.unwrap(),
        kairos_core::export_digest(&bytes)
    );
}
