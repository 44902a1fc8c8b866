//! # API Request/Response Types
//!
//! JSON structures for the HTTP API. Record bodies reuse the core's serde
//! representations; request envelopes validate shape at the boundary before
//! anything reaches the repository.

use kairos_core::{
    EvidenceLink, KairosError, Nid, NodeKind, NodePayload, NodeRecord, ParadoxReport, SourceType,
    ValidationError, VersionRecord,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH & STATUS
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Store status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub sources: u64,
    pub spans: u64,
    pub nodes: u64,
    pub edges: u64,
}

// =============================================================================
// INGESTION
// =============================================================================

/// Register-source request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRequest {
    /// One of "document", "video", "audio", "webpage".
    pub source_type: String,
    pub uri: String,
    pub title: String,
    pub actor: Option<String>,
}

impl SourceRequest {
    pub fn parse_type(&self) -> Result<SourceType, KairosError> {
        match self.source_type.as_str() {
            "document" => Ok(SourceType::Document),
            "video" => Ok(SourceType::Video),
            "audio" => Ok(SourceType::Audio),
            "webpage" => Ok(SourceType::WebPage),
            other => Err(ValidationError::LimitExceeded(format!(
                "unknown source type '{other}'; use document, video, audio, or webpage"
            ))
            .into()),
        }
    }
}

/// Anchor-span request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRequest {
    pub source_nid: u64,
    pub start_offset: u64,
    pub end_offset: u64,
    pub text: String,
    pub page: Option<u32>,
    pub y_position: Option<u32>,
    pub actor: Option<String>,
}

/// Batch admission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub actor: Option<String>,
    pub nodes: Vec<kairos_core::CandidateNode>,
    #[serde(default)]
    pub edges: Vec<kairos_core::CandidateEdge>,
}

/// Response carrying a freshly allocated NID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NidResponse {
    pub success: bool,
    pub nid: Option<u64>,
    pub version: Option<u32>,
    pub error: Option<String>,
}

impl NidResponse {
    pub fn with_nid(nid: Nid) -> Self {
        Self {
            success: true,
            nid: Some(nid.0),
            version: None,
            error: None,
        }
    }

    pub fn with_version(version: u32) -> Self {
        Self {
            success: true,
            nid: None,
            version: Some(version),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            nid: None,
            version: None,
            error: Some(msg.into()),
        }
    }
}

/// Batch admission response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub success: bool,
    pub node_nids: Vec<u64>,
    pub edge_nids: Vec<u64>,
    pub error: Option<String>,
}

impl BatchResponse {
    pub fn with_receipt(receipt: &kairos_core::AdmissionReceipt) -> Self {
        Self {
            success: true,
            node_nids: receipt.node_nids.iter().map(|n| n.0).collect(),
            edge_nids: receipt.edge_nids.iter().map(|n| n.0).collect(),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            node_nids: vec![],
            edge_nids: vec![],
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// NODES
// =============================================================================

/// Single-node response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResponse {
    pub success: bool,
    pub node: Option<NodeRecord>,
    pub error: Option<String>,
}

impl NodeResponse {
    pub fn found(node: NodeRecord) -> Self {
        Self {
            success: true,
            node: Some(node),
            error: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            success: true,
            node: None,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            node: None,
            error: Some(msg.into()),
        }
    }
}

/// Node revision request; unset fields carry over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviseRequest {
    pub expected_version: u32,
    pub actor: String,
    pub payload: Option<NodePayload>,
    pub confidence_thousandths: Option<u16>,
    pub evidence_spans: Option<Vec<u64>>,
}

/// Tombstone request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TombstoneRequest {
    pub actor: String,
    pub reason: String,
}

// =============================================================================
// QUERIES
// =============================================================================

/// Audit history response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub records: Vec<VersionRecord>,
    pub skipped: usize,
    pub error: Option<String>,
}

impl HistoryResponse {
    pub fn with_history(history: kairos_core::History) -> Self {
        Self {
            success: true,
            records: history.records,
            skipped: history.skipped,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            records: vec![],
            skipped: 0,
            error: Some(msg.into()),
        }
    }
}

/// Evidence chain response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceResponse {
    pub success: bool,
    pub links: Vec<EvidenceLink>,
    pub skipped: usize,
    pub error: Option<String>,
}

impl EvidenceResponse {
    pub fn with_chain(chain: kairos_core::EvidenceChain) -> Self {
        Self {
            success: true,
            links: chain.links,
            skipped: chain.skipped,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            links: vec![],
            skipped: 0,
            error: Some(msg.into()),
        }
    }
}

/// Paradox detection response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParadoxResponse {
    pub success: bool,
    pub report: Option<ParadoxReport>,
    pub error: Option<String>,
}

impl ParadoxResponse {
    pub fn with_report(report: Option<ParadoxReport>) -> Self {
        Self {
            success: true,
            report,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            report: None,
            error: Some(msg.into()),
        }
    }
}

/// Path query parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct PathQuery {
    pub from: u64,
    pub to: u64,
    pub max_hops: Option<usize>,
}

/// Path query response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathResponse {
    pub success: bool,
    pub found: bool,
    pub nodes: Vec<u64>,
    pub edges: Vec<u64>,
    pub error: Option<String>,
}

impl PathResponse {
    pub fn with_path(path: Option<kairos_core::Path>) -> Self {
        match path {
            Some(path) => Self {
                success: true,
                found: true,
                nodes: path.nodes.iter().map(|n| n.0).collect(),
                edges: path.edges.iter().map(|n| n.0).collect(),
                error: None,
            },
            None => Self {
                success: true,
                found: false,
                nodes: vec![],
                edges: vec![],
                error: None,
            },
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            found: false,
            nodes: vec![],
            edges: vec![],
            error: Some(msg.into()),
        }
    }
}

/// Entity search query parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct EntitiesQuery {
    /// One of "entity", "claim", "procedure", "gap".
    pub kind: Option<String>,
    pub label: Option<String>,
    pub min_confidence: Option<u16>,
    pub include_tombstoned: Option<bool>,
    pub cursor: Option<u64>,
    pub limit: Option<usize>,
}

impl EntitiesQuery {
    pub fn parse_kind(&self) -> Result<Option<NodeKind>, KairosError> {
        match self.kind.as_deref() {
            None => Ok(None),
            Some("entity") => Ok(Some(NodeKind::Entity)),
            Some("claim") => Ok(Some(NodeKind::Claim)),
            Some("procedure") => Ok(Some(NodeKind::Procedure)),
            Some("gap") => Ok(Some(NodeKind::Gap)),
            Some(other) => Err(ValidationError::LimitExceeded(format!(
                "unknown node kind '{other}'; use entity, claim, procedure, or gap"
            ))
            .into()),
        }
    }
}

/// Entity search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    pub records: Vec<NodeRecord>,
    pub next_cursor: Option<u64>,
    pub skipped: usize,
    pub error: Option<String>,
}

impl SearchResponse {
    pub fn with_page(page: kairos_core::SearchPage) -> Self {
        Self {
            success: true,
            records: page.records,
            next_cursor: page.next_cursor.map(|n| n.0),
            skipped: page.skipped,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            records: vec![],
            next_cursor: None,
            skipped: 0,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// EXPORT
// =============================================================================

/// Canonical export response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub success: bool,
    pub data: Option<String>, // Base64 encoded
    pub digest: Option<String>,
    pub error: Option<String>,
}

impl ExportResponse {
    pub fn with_bytes(data: &[u8], digest: String) -> Self {
        Self {
            success: true,
            data: Some(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                data,
            )),
            digest: Some(digest),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            digest: None,
            error: Some(msg.into()),
        }
    }
}
