//! # Runtime Constants
//!
//! Hardcoded limits and format constants for the KAIROS store.
//!
//! The store starts with zero data but fixed limits. These are compiled into
//! the binary and immutable at runtime; every query and mutation is
//! computationally bounded by them.

/// Current record schema version.
///
/// Every persisted record carries this tag after its record tag byte.
/// Payload evolution is additive-only; increment this when adding fields.
pub const SCHEMA_VERSION: u8 = 1;

/// Maximum number of hops for path queries.
///
/// All traversals must be computationally bounded. Callers may ask for
/// fewer hops, never more.
pub const MAX_PATH_HOPS: usize = 64;

/// Maximum number of nodes visited by the Supports reachability check.
///
/// The cycle check at edge-creation time is a bounded depth-first walk;
/// graphs larger than this bound reject the edge rather than scanning
/// without limit.
pub const MAX_REACHABILITY_NODES: usize = 10_000;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum number of evidence spans per node.
pub const MAX_EVIDENCE_SPANS: usize = 256;

/// Maximum length for span text (64 KB).
///
/// Spans anchor into source content; anything larger should be split by the
/// extraction pipeline before submission.
pub const MAX_SPAN_TEXT_LENGTH: usize = 65_536;

/// Maximum length for source URIs.
pub const MAX_URI_LENGTH: usize = 2_048;

/// Maximum length for source titles.
pub const MAX_TITLE_LENGTH: usize = 512;

/// Maximum length for entity/procedure names and claim subjects.
pub const MAX_NAME_LENGTH: usize = 256;

/// Maximum length for claim statements and gap questions (64 KB).
pub const MAX_STATEMENT_LENGTH: usize = 65_536;

/// Maximum number of steps in a procedure payload.
pub const MAX_PROCEDURE_STEPS: usize = 1_000;

/// Maximum number of candidate nodes in a single admission batch.
pub const MAX_BATCH_NODES: usize = 10_000;

/// Maximum number of candidate edges in a single admission batch.
pub const MAX_BATCH_EDGES: usize = 20_000;

/// Maximum page size for entity search.
///
/// Larger requests are clamped, not rejected; the cursor makes the scan
/// restartable so callers page through the rest.
pub const MAX_SEARCH_LIMIT: usize = 1_000;

/// Confidence is fixed-point thousandths: 0 = 0.0, 1000 = 1.0.
pub const CONFIDENCE_SCALE: u16 = 1_000;
