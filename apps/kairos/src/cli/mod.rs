//! # KAIROS CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show store status
//! - `init` - Initialize a new store
//! - `source` - Register an ingested source
//! - `span` - Anchor an evidence span
//! - `ingest` - Admit a candidate batch from a JSON file
//! - `query` - Execute a query (get, path, evidence, entities, at, facts)
//! - `history` - Show the audit history of a NID
//! - `paradox` - Check a claim for temporal paradoxes
//! - `revise` - Submit a confidence revision
//! - `resolve` - Mark a Gap node resolved
//! - `tombstone` - Logically delete a record
//! - `export` - Export the store in canonical format
//! - `import` - Import a canonical export into an empty store

mod commands;

use clap::{Parser, Subcommand};
use kairos_core::KairosError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// KAIROS - Temporal Knowledge Store
///
/// An embedded, ordered, append-only store for evidence-anchored knowledge:
/// entities, claims, procedures, and gaps, versioned and windowed in time.
#[derive(Parser, Debug)]
#[command(name = "kairos")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the store database
    #[arg(short = 'D', long, global = true, default_value = "kairos.db")]
    pub database: PathBuf,

    /// Actor recorded in the audit log for mutations
    #[arg(short = 'A', long, global = true, default_value = "cli")]
    pub actor: String,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to (overrides config file)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show store status
    Status,

    /// Initialize a new empty store
    Init {
        /// Force initialization even if the database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Register an ingested source
    Source {
        /// Source type (document, video, audio, webpage)
        #[arg(short = 't', long, default_value = "document")]
        source_type: String,

        /// Source URI
        #[arg(short, long)]
        uri: String,

        /// Source title
        #[arg(short = 'T', long, default_value = "")]
        title: String,
    },

    /// Anchor an evidence span into a source
    Span {
        /// Source NID
        #[arg(short, long)]
        source: u64,

        /// Start offset (ms for media, bytes for text)
        #[arg(long)]
        start: u64,

        /// End offset
        #[arg(long)]
        end: u64,

        /// Span text
        #[arg(short = 'x', long)]
        text: String,

        /// Page number for document-anchored spans
        #[arg(long)]
        page: Option<u32>,

        /// Vertical position on the page
        #[arg(long)]
        y: Option<u32>,
    },

    /// Admit a candidate batch from a JSON file
    Ingest {
        /// Path to the batch file (JSON)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Execute a query on the store
    Query {
        /// Query type (get, path, evidence, entities, at, facts)
        #[arg(short = 't', long)]
        query_type: String,

        /// Subject NID (for get/evidence queries)
        #[arg(short, long)]
        nid: Option<u64>,

        /// Start node NID (for path queries)
        #[arg(long)]
        from: Option<u64>,

        /// End node NID (for path queries)
        #[arg(long)]
        to: Option<u64>,

        /// Maximum hops for path queries
        #[arg(long, default_value = "8")]
        max_hops: usize,

        /// Instant in epoch milliseconds (for at queries)
        #[arg(long)]
        at: Option<i64>,

        /// Source NID (for facts queries)
        #[arg(long)]
        source: Option<u64>,

        /// Lower time bound in epoch milliseconds (for facts queries)
        #[arg(long, default_value = "0")]
        since: i64,

        /// Node kind filter (entity, claim, procedure, gap)
        #[arg(long)]
        kind: Option<String>,

        /// Label substring filter
        #[arg(long)]
        label: Option<String>,

        /// Resume cursor from a previous page
        #[arg(long)]
        cursor: Option<u64>,

        /// Page size
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Show the audit history of a NID
    History {
        /// The NID to inspect
        #[arg(short, long)]
        nid: u64,
    },

    /// Check a claim's temporal neighborhood for paradoxes
    Paradox {
        /// The claim NID to check
        #[arg(short, long)]
        nid: u64,
    },

    /// Submit a confidence revision for a node
    Revise {
        /// The node NID
        #[arg(short, long)]
        nid: u64,

        /// Expected current version (optimistic check)
        #[arg(short, long)]
        expected: u32,

        /// New confidence in thousandths (0-1000)
        #[arg(short, long)]
        confidence: u16,
    },

    /// Mark a Gap node resolved
    Resolve {
        /// The Gap NID
        #[arg(short, long)]
        nid: u64,

        /// Expected current version (optimistic check)
        #[arg(short, long)]
        expected: u32,

        /// Resolution text
        #[arg(short, long)]
        resolution: String,

        /// Comma-separated span NIDs backing the resolution
        #[arg(long)]
        evidence: Option<String>,
    },

    /// Write a terminal tombstone version for a record
    Tombstone {
        /// The NID to tombstone
        #[arg(short, long)]
        nid: u64,

        /// Reason recorded in the audit log
        #[arg(short, long)]
        reason: String,
    },

    /// Export the store in canonical format
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Export format (canonical, json)
        #[arg(short = 't', long, default_value = "canonical")]
        format: String,
    },

    /// Import a canonical export into an empty store
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), KairosError> {
    let db = &cli.database;
    let actor = cli.actor.as_str();
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port, config }) => {
            cmd_server(db, host, port, config.as_deref()).await
        }
        Some(Commands::Status) => cmd_status(db, json_mode),
        Some(Commands::Init { force }) => cmd_init(db, force),
        Some(Commands::Source {
            source_type,
            uri,
            title,
        }) => cmd_source(db, actor, &source_type, uri, title),
        Some(Commands::Span {
            source,
            start,
            end,
            text,
            page,
            y,
        }) => cmd_span(db, actor, source, start, end, text, page, y),
        Some(Commands::Ingest { file }) => cmd_ingest(db, actor, &file),
        Some(Commands::Query {
            query_type,
            nid,
            from,
            to,
            max_hops,
            at,
            source,
            since,
            kind,
            label,
            cursor,
            limit,
        }) => cmd_query(
            db,
            json_mode,
            QueryArgs {
                query_type,
                nid,
                from,
                to,
                max_hops,
                at,
                source,
                since,
                kind,
                label,
                cursor,
                limit,
            },
        ),
        Some(Commands::History { nid }) => cmd_history(db, json_mode, nid),
        Some(Commands::Paradox { nid }) => cmd_paradox(db, json_mode, actor, nid),
        Some(Commands::Revise {
            nid,
            expected,
            confidence,
        }) => cmd_revise(db, actor, nid, expected, confidence),
        Some(Commands::Resolve {
            nid,
            expected,
            resolution,
            evidence,
        }) => cmd_resolve(db, actor, nid, expected, &resolution, evidence.as_deref()),
        Some(Commands::Tombstone { nid, reason }) => cmd_tombstone(db, actor, nid, &reason),
        Some(Commands::Export { output, format }) => cmd_export(db, &output, &format),
        Some(Commands::Import { input }) => cmd_import(db, &input),
        None => cmd_status(db, json_mode),
    }
}
