//! # KAIROS HTTP API Module
//!
//! The read/ingest surface collaborators use: the extraction pipeline
//! submits candidate batches, the learning engine reads views and submits
//! confidence feedback, exporters pull the canonical stream.
//!
//! ## Endpoints
//!
//! - `GET  /health` - Health check
//! - `GET  /status` - Record counts
//! - `POST /sources` - Register an ingested source
//! - `POST /spans` - Anchor an evidence span
//! - `POST /batch` - Admit a candidate batch (all-or-nothing)
//! - `GET  /nodes/{nid}` - Latest node version
//! - `POST /nodes/{nid}/revise` - Supersede a node
//! - `POST /nodes/{nid}/tombstone` - Terminal version
//! - `GET  /nodes/{nid}/history` - Full audit history
//! - `GET  /nodes/{nid}/evidence` - Resolved evidence chain
//! - `GET  /nodes/{nid}/paradox` - Temporal consistency check
//! - `GET  /path?from=&to=&max_hops=` - Shortest path
//! - `GET  /entities?kind=&label=&cursor=&limit=` - Entity search
//! - `GET  /export` - Canonical export stream
//! - `GET  /metrics` - Prometheus metrics
//!
//! ## Security Configuration
//!
//! - `cors_origins` config / `KAIROS_CORS_ORIGINS`: comma-separated allowed
//!   origins, or "*" for all (default: localhost only)
//! - `rate_limit` config / `KAIROS_RATE_LIMIT`: requests per second
//!   (default: 100, 0 disables)

mod handlers;
mod middleware;
mod types;

pub use middleware::{GlobalRateLimiter, create_rate_limiter};
// Re-export handlers and types for integration tests (via `kairos::api::*`)
#[allow(unused_imports)]
pub use handlers::{
    batch_handler, entities_handler, evidence_handler, export_handler, health_handler,
    history_handler, metrics_handler, node_handler, paradox_handler, path_handler, revise_handler,
    source_handler, span_handler, status_handler, tombstone_handler,
};
#[allow(unused_imports)]
pub use types::{
    BatchRequest, BatchResponse, EntitiesQuery, EvidenceResponse, ExportResponse, HealthResponse,
    HistoryResponse, NidResponse, NodeResponse, ParadoxResponse, PathQuery, PathResponse,
    ReviseRequest, SearchResponse, SourceRequest, SpanRequest, StatusResponse, TombstoneRequest,
};

use crate::config::ServerConfig;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use kairos_core::{KairosError, Repository};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
///
/// The repository needs no lock: reads open snapshots, writes serialize in
/// the storage engine.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
}

impl AppState {
    /// Create new app state around a repository.
    #[must_use]
    pub fn new(repo: Repository) -> Self {
        Self {
            repo: Arc::new(repo),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer from configuration.
///
/// - `Some("*")`: allows all origins (development mode)
/// - `Some(list)`: comma-separated allowed origins
/// - `None`: localhost only (restrictive default)
fn build_cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (cors_origins=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(value) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(value)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!("CORS: No valid origins configured, defaulting to localhost only");
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE])
            }
        }
        None => {
            tracing::info!("CORS: No origins configured, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

/// Restrictive CORS layer allowing only localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let localhost_origins = [
        "http://localhost:3000".parse::<HeaderValue>().ok(),
        "http://localhost:8080".parse::<HeaderValue>().ok(),
        "http://127.0.0.1:3000".parse::<HeaderValue>().ok(),
        "http://127.0.0.1:8080".parse::<HeaderValue>().ok(),
    ];
    let origins: Vec<HeaderValue> = localhost_origins.into_iter().flatten().collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Body limit - caps request payloads
/// 4. Rate limiting - protects against DoS (if enabled)
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let cors = build_cors_layer(config.cors_origins.as_deref());

    let rate_limiter = if config.rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", config.rate_limit);
        Some(create_rate_limiter(config.rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/sources", post(handlers::source_handler))
        .route("/spans", post(handlers::span_handler))
        .route("/batch", post(handlers::batch_handler))
        .route("/nodes/{nid}", get(handlers::node_handler))
        .route("/nodes/{nid}/revise", post(handlers::revise_handler))
        .route("/nodes/{nid}/tombstone", post(handlers::tombstone_handler))
        .route("/nodes/{nid}/history", get(handlers::history_handler))
        .route("/nodes/{nid}/evidence", get(handlers::evidence_handler))
        .route("/nodes/{nid}/paradox", get(handlers::paradox_handler))
        .route("/path", get(handlers::path_handler))
        .route("/entities", get(handlers::entities_handler))
        .route("/export", get(handlers::export_handler))
        .route("/metrics", get(handlers::metrics_handler));

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(8 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server.
pub async fn run_server(config: &ServerConfig, repo: Repository) -> Result<(), KairosError> {
    let state = AppState::new(repo);
    let router = create_router(state, config);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| KairosError::Resource(format!("bind {addr}: {e}")))?;

    tracing::info!("KAIROS HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| KairosError::Resource(format!("server error: {e}")))
}
