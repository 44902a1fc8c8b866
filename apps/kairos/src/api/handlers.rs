//! # API Endpoint Handlers
//!
//! The HTTP endpoint implementations. Each handler opens its own snapshot
//! or write transaction through the repository; there is no shared lock
//! because readers never block the single serialized writer.

use super::{
    AppState,
    types::{
        BatchRequest, BatchResponse, EntitiesQuery, EvidenceResponse, ExportResponse,
        HealthResponse, HistoryResponse, NidResponse, NodeResponse, ParadoxResponse, PathQuery,
        PathResponse, ReviseRequest, SearchResponse, SourceRequest, SpanRequest, StatusResponse,
        TombstoneRequest,
    },
};
use crate::now_millis;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use kairos_core::{
    CandidateBatch, Confidence, EntityFilter, KairosError, NewSource, NewSpan, Nid, NodeRevision,
    PageAnchor, ValidationError, export_canonical, export_digest,
    primitives::MAX_PATH_HOPS,
};
use std::collections::BTreeSet;

/// Map a store error to an HTTP status.
fn failure_status(error: &KairosError) -> StatusCode {
    match error {
        KairosError::Validation(
            ValidationError::NotFound(_)
            | ValidationError::DanglingNode(_)
            | ValidationError::DanglingSpan(_),
        ) => StatusCode::NOT_FOUND,
        KairosError::Validation(ValidationError::VersionConflict { .. }) => StatusCode::CONFLICT,
        KairosError::Validation(_) | KairosError::Codec(_) => StatusCode::BAD_REQUEST,
        KairosError::Resource(_) | KairosError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn actor_or_default(actor: &Option<String>) -> &str {
    actor.as_deref().unwrap_or("api")
}

// =============================================================================
// HEALTH & STATUS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Store status.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.repo.counts() {
        Ok((sources, spans, nodes, edges)) => (
            StatusCode::OK,
            Json(StatusResponse {
                sources,
                spans,
                nodes,
                edges,
            }),
        )
            .into_response(),
        Err(e) => (
            failure_status(&e),
            Json(NidResponse::error(format!("status failed: {e}"))),
        )
            .into_response(),
    }
}

/// Prometheus-style metrics: record counts per sub-store.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.repo.counts() {
        Ok((sources, spans, nodes, edges)) => {
            let body = format!(
                "# HELP kairos_records Number of records per sub-store\n\
                 # TYPE kairos_records gauge\n\
                 kairos_records{{store=\"sources\"}} {sources}\n\
                 kairos_records{{store=\"spans\"}} {spans}\n\
                 kairos_records{{store=\"nodes\"}} {nodes}\n\
                 kairos_records{{store=\"edges\"}} {edges}\n"
            );
            (StatusCode::OK, body).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics failed: {e}"),
        )
            .into_response(),
    }
}

// =============================================================================
// INGESTION
// =============================================================================

/// Register an ingested source.
pub async fn source_handler(
    State(state): State<AppState>,
    Json(request): Json<SourceRequest>,
) -> impl IntoResponse {
    let source_type = match request.parse_type() {
        Ok(source_type) => source_type,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(NidResponse::error(format!("invalid source: {e}"))),
            );
        }
    };

    let new = NewSource {
        source_type,
        uri: request.uri,
        title: request.title,
        ingested_at: now_millis(),
    };
    match state.repo.create_source(new, actor_or_default(&request.actor)) {
        Ok(nid) => (StatusCode::OK, Json(NidResponse::with_nid(nid))),
        Err(e) => (
            failure_status(&e),
            Json(NidResponse::error(format!("create source failed: {e}"))),
        ),
    }
}

/// Anchor a span into a source.
pub async fn span_handler(
    State(state): State<AppState>,
    Json(request): Json<SpanRequest>,
) -> impl IntoResponse {
    let page = match (request.page, request.y_position) {
        (Some(page), y) => Some(PageAnchor {
            page,
            y_position: y.unwrap_or(0),
        }),
        (None, _) => None,
    };
    let new = NewSpan {
        source_nid: Nid(request.source_nid),
        start_offset: request.start_offset,
        end_offset: request.end_offset,
        text: request.text,
        page,
    };
    match state
        .repo
        .create_span(new, actor_or_default(&request.actor), now_millis())
    {
        Ok(nid) => (StatusCode::OK, Json(NidResponse::with_nid(nid))),
        Err(e) => (
            failure_status(&e),
            Json(NidResponse::error(format!("create span failed: {e}"))),
        ),
    }
}

/// Admit a candidate batch, all-or-nothing.
pub async fn batch_handler(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> impl IntoResponse {
    let batch = CandidateBatch {
        nodes: request.nodes,
        edges: request.edges,
    };
    match state
        .repo
        .admit_batch(&batch, actor_or_default(&request.actor), now_millis())
    {
        Ok(receipt) => (StatusCode::OK, Json(BatchResponse::with_receipt(&receipt))),
        Err(e) => (
            failure_status(&e),
            Json(BatchResponse::error(format!("batch rejected: {e}"))),
        ),
    }
}

// =============================================================================
// NODES
// =============================================================================

/// Fetch the latest version of a node.
pub async fn node_handler(
    State(state): State<AppState>,
    Path(nid): Path<u64>,
) -> impl IntoResponse {
    match state.repo.get_node(Nid(nid)) {
        Ok(Some(node)) => (StatusCode::OK, Json(NodeResponse::found(node))),
        Ok(None) => (StatusCode::NOT_FOUND, Json(NodeResponse::not_found())),
        Err(e) => (
            failure_status(&e),
            Json(NodeResponse::error(format!("lookup failed: {e}"))),
        ),
    }
}

/// Supersede a node with a new version.
pub async fn revise_handler(
    State(state): State<AppState>,
    Path(nid): Path<u64>,
    Json(request): Json<ReviseRequest>,
) -> impl IntoResponse {
    let revision = NodeRevision {
        payload: request.payload,
        confidence: request.confidence_thousandths.map(Confidence::from_thousandths),
        evidence_spans: request
            .evidence_spans
            .map(|spans| spans.into_iter().map(Nid).collect::<BTreeSet<_>>()),
    };
    match state.repo.revise_node(
        Nid(nid),
        revision,
        request.expected_version,
        &request.actor,
        now_millis(),
    ) {
        Ok(version) => (StatusCode::OK, Json(NidResponse::with_version(version))),
        Err(e) => (
            failure_status(&e),
            Json(NidResponse::error(format!("revise failed: {e}"))),
        ),
    }
}

/// Write a terminal tombstone version.
pub async fn tombstone_handler(
    State(state): State<AppState>,
    Path(nid): Path<u64>,
    Json(request): Json<TombstoneRequest>,
) -> impl IntoResponse {
    match state
        .repo
        .tombstone(Nid(nid), &request.actor, &request.reason, now_millis())
    {
        Ok(version) => (StatusCode::OK, Json(NidResponse::with_version(version))),
        Err(e) => (
            failure_status(&e),
            Json(NidResponse::error(format!("tombstone failed: {e}"))),
        ),
    }
}

// =============================================================================
// QUERIES
// =============================================================================

/// Full audit history of a NID.
pub async fn history_handler(
    State(state): State<AppState>,
    Path(nid): Path<u64>,
) -> impl IntoResponse {
    match state.repo.history(Nid(nid)) {
        Ok(history) => (StatusCode::OK, Json(HistoryResponse::with_history(history))),
        Err(e) => (
            failure_status(&e),
            Json(HistoryResponse::error(format!("history failed: {e}"))),
        ),
    }
}

/// Resolve a node's evidence spans to spans and sources.
pub async fn evidence_handler(
    State(state): State<AppState>,
    Path(nid): Path<u64>,
) -> impl IntoResponse {
    match state.repo.query().evidence_chain(Nid(nid)) {
        Ok(chain) => (StatusCode::OK, Json(EvidenceResponse::with_chain(chain))),
        Err(e) => (
            failure_status(&e),
            Json(EvidenceResponse::error(format!("evidence failed: {e}"))),
        ),
    }
}

/// Check a claim's temporal neighborhood for paradoxes.
pub async fn paradox_handler(
    State(state): State<AppState>,
    Path(nid): Path<u64>,
) -> impl IntoResponse {
    match state.repo.detect_paradox(Nid(nid)) {
        Ok(report) => (StatusCode::OK, Json(ParadoxResponse::with_report(report))),
        Err(e) => (
            failure_status(&e),
            Json(ParadoxResponse::error(format!("paradox check failed: {e}"))),
        ),
    }
}

/// Shortest path between two nodes.
pub async fn path_handler(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> impl IntoResponse {
    let max_hops = query.max_hops.unwrap_or(MAX_PATH_HOPS);
    match state
        .repo
        .query()
        .find_path(Nid(query.from), Nid(query.to), max_hops)
    {
        Ok(path) => (StatusCode::OK, Json(PathResponse::with_path(path))),
        Err(e) => (
            failure_status(&e),
            Json(PathResponse::error(format!("path failed: {e}"))),
        ),
    }
}

/// Cursor-resumable entity search.
pub async fn entities_handler(
    State(state): State<AppState>,
    Query(query): Query<EntitiesQuery>,
) -> impl IntoResponse {
    let kind = match query.parse_kind() {
        Ok(kind) => kind,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(SearchResponse::error(format!("invalid filter: {e}"))),
            );
        }
    };
    let filter = EntityFilter {
        kind,
        label_contains: query.label.clone(),
        min_confidence: query.min_confidence.map(Confidence::from_thousandths),
        include_tombstoned: query.include_tombstoned.unwrap_or(false),
    };
    match state.repo.query().search_entities(
        &filter,
        query.cursor.map(Nid),
        query.limit.unwrap_or(100),
    ) {
        Ok(page) => (StatusCode::OK, Json(SearchResponse::with_page(page))),
        Err(e) => (
            failure_status(&e),
            Json(SearchResponse::error(format!("search failed: {e}"))),
        ),
    }
}

// =============================================================================
// EXPORT
// =============================================================================

/// Canonical export of the whole store, base64 over JSON.
pub async fn export_handler(State(state): State<AppState>) -> impl IntoResponse {
    match export_canonical(&state.repo) {
        Ok(bytes) => {
            let digest = export_digest(&bytes);
            (StatusCode::OK, Json(ExportResponse::with_bytes(&bytes, digest)))
        }
        Err(e) => (
            failure_status(&e),
            Json(ExportResponse::error(format!("export failed: {e}"))),
        ),
    }
}
