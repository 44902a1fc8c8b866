//! # CLI Command Implementations

use crate::api;
use crate::config::ServerConfig;
use crate::now_millis;
use kairos_core::{
    CandidateBatch, Confidence, EntityFilter, KairosError, NewSource, NewSpan, Nid, NodeKind,
    NodeRevision, PageAnchor, Repository, SourceType, Timestamp, ValidationError, export_canonical,
    export_digest, import_canonical, import_into,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for batch ingestion (100 MB).
const MAX_INGEST_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum file size for canonical import (500 MB).
const MAX_IMPORT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), KairosError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| KairosError::Resource(format!("cannot read file metadata: {}", e)))?;
    if metadata.len() > max_size {
        return Err(KairosError::Resource(format!(
            "file size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and require a regular file.
///
/// Resolves "..", symlinks, and existence in one step so a path like
/// "../../../etc/passwd" cannot slip through relative handling.
fn validate_file_path(path: &Path) -> Result<PathBuf, KairosError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| KairosError::Resource(format!("invalid file path '{}': {}", path.display(), e)))?;
    if !canonical.is_file() {
        return Err(KairosError::Resource(format!(
            "path '{}' is not a regular file",
            path.display()
        )));
    }
    Ok(canonical)
}

/// Canonicalize an output path's parent directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, KairosError> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let canonical_parent = parent.canonicalize().map_err(|e| {
        KairosError::Resource(format!(
            "invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;
    if !canonical_parent.is_dir() {
        return Err(KairosError::Resource(format!(
            "output directory '{}' is not a valid directory",
            parent.display()
        )));
    }
    let filename = path
        .file_name()
        .ok_or_else(|| KairosError::Resource("output path has no filename".to_string()))?;
    Ok(canonical_parent.join(filename))
}

fn open_repo(db_path: &Path) -> Result<Repository, KairosError> {
    Repository::open(db_path)
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(
    db_path: &Path,
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<(), KairosError> {
    let mut config = match config_path {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    }
    .with_env_overrides();
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let repo = open_repo(db_path)?;

    println!("KAIROS Temporal Knowledge Store");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", config.host);
    println!("  Port:     {}", config.port);
    println!("  Database: {:?}", db_path);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    api::run_server(&config, repo).await
}

// =============================================================================
// STATUS & INIT
// =============================================================================

/// Show store status.
pub fn cmd_status(db_path: &Path, json_mode: bool) -> Result<(), KairosError> {
    let repo = open_repo(db_path)?;
    let (sources, spans, nodes, edges) = repo.counts()?;

    if json_mode {
        let output = serde_json::json!({
            "database": db_path.to_string_lossy(),
            "sources": sources,
            "spans": spans,
            "nodes": nodes,
            "edges": edges,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("KAIROS Store Status");
    println!("===================");
    println!("Database: {:?}", db_path);
    println!();
    println!("Sources: {}", sources);
    println!("Spans:   {}", spans);
    println!("Nodes:   {}", nodes);
    println!("Edges:   {}", edges);

    Ok(())
}

/// Initialize a new empty store.
pub fn cmd_init(db_path: &Path, force: bool) -> Result<(), KairosError> {
    if db_path.exists() && !force {
        return Err(KairosError::Resource(
            "database already exists. Use --force to overwrite.".to_string(),
        ));
    }
    if db_path.exists() {
        std::fs::remove_file(db_path)
            .map_err(|e| KairosError::Resource(format!("remove existing database: {}", e)))?;
    }
    let _repo = open_repo(db_path)?;
    println!("Initialized new store at {:?}", db_path);
    Ok(())
}

// =============================================================================
// INGESTION COMMANDS
// =============================================================================

/// Register an ingested source.
pub fn cmd_source(
    db_path: &Path,
    actor: &str,
    source_type: &str,
    uri: String,
    title: String,
) -> Result<(), KairosError> {
    let source_type = match source_type {
        "document" => SourceType::Document,
        "video" => SourceType::Video,
        "audio" => SourceType::Audio,
        "webpage" => SourceType::WebPage,
        other => {
            return Err(ValidationError::LimitExceeded(format!(
                "unknown source type '{other}'; use document, video, audio, or webpage"
            ))
            .into());
        }
    };

    let repo = open_repo(db_path)?;
    let nid = repo.create_source(
        NewSource {
            source_type,
            uri,
            title,
            ingested_at: now_millis(),
        },
        actor,
    )?;
    println!("Source registered with NID {}", nid.0);
    Ok(())
}

/// Anchor an evidence span.
#[allow(clippy::too_many_arguments)]
pub fn cmd_span(
    db_path: &Path,
    actor: &str,
    source: u64,
    start: u64,
    end: u64,
    text: String,
    page: Option<u32>,
    y: Option<u32>,
) -> Result<(), KairosError> {
    let repo = open_repo(db_path)?;
    let nid = repo.create_span(
        NewSpan {
            source_nid: Nid(source),
            start_offset: start,
            end_offset: end,
            text,
            page: page.map(|page| PageAnchor {
                page,
                y_position: y.unwrap_or(0),
            }),
        },
        actor,
        now_millis(),
    )?;
    println!("Span anchored with NID {}", nid.0);
    Ok(())
}

/// Admit a candidate batch from a JSON file.
pub fn cmd_ingest(db_path: &Path, actor: &str, file: &Path) -> Result<(), KairosError> {
    tracing::info!("Ingesting batch from {:?}", file);

    let validated_path = validate_file_path(file)?;
    validate_file_size(&validated_path, MAX_INGEST_FILE_SIZE)?;

    let contents = std::fs::read(&validated_path)
        .map_err(|e| KairosError::Resource(format!("read file: {}", e)))?;
    let batch: CandidateBatch = serde_json::from_slice(&contents)
        .map_err(|e| KairosError::Serialization(format!("parse batch: {}", e)))?;

    let repo = open_repo(db_path)?;
    let receipt = repo.admit_batch(&batch, actor, now_millis())?;

    println!(
        "Admitted {} nodes, {} edges",
        receipt.node_nids.len(),
        receipt.edge_nids.len()
    );
    for nid in &receipt.node_nids {
        println!("  node {}", nid.0);
    }
    Ok(())
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

/// Parsed arguments of the `query` subcommand.
#[derive(Debug)]
pub struct QueryArgs {
    pub query_type: String,
    pub nid: Option<u64>,
    pub from: Option<u64>,
    pub to: Option<u64>,
    pub max_hops: usize,
    pub at: Option<i64>,
    pub source: Option<u64>,
    pub since: i64,
    pub kind: Option<String>,
    pub label: Option<String>,
    pub cursor: Option<u64>,
    pub limit: usize,
}

fn missing(flag: &str) -> KairosError {
    ValidationError::LimitExceeded(format!("query requires --{flag}")).into()
}

/// Execute a query.
pub fn cmd_query(db_path: &Path, json_mode: bool, args: QueryArgs) -> Result<(), KairosError> {
    let repo = open_repo(db_path)?;
    let query = repo.query();

    match args.query_type.as_str() {
        "get" => {
            let nid = args.nid.ok_or_else(|| missing("nid"))?;
            match repo.get_node(Nid(nid))? {
                Some(node) => {
                    if json_mode {
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&node).unwrap_or_default()
                        );
                    } else {
                        println!(
                            "Node {} ({:?}, v{}, confidence {}/1000{})",
                            node.nid.0,
                            node.kind,
                            node.version,
                            node.confidence.thousandths(),
                            if node.is_tombstoned() { ", tombstoned" } else { "" }
                        );
                        println!("  label: {}", node.payload.label());
                        println!(
                            "  evidence: {:?}",
                            node.evidence_spans.iter().map(|n| n.0).collect::<Vec<_>>()
                        );
                    }
                }
                None => println!("Node {} not found", nid),
            }
        }

        "path" => {
            let from = args.from.ok_or_else(|| missing("from"))?;
            let to = args.to.ok_or_else(|| missing("to"))?;
            match query.find_path(Nid(from), Nid(to), args.max_hops)? {
                Some(path) => {
                    println!("Path {} -> {} ({} hops):", from, to, path.edges.len());
                    println!(
                        "  nodes: {:?}",
                        path.nodes.iter().map(|n| n.0).collect::<Vec<_>>()
                    );
                    println!(
                        "  edges: {:?}",
                        path.edges.iter().map(|n| n.0).collect::<Vec<_>>()
                    );
                }
                None => println!(
                    "No path from {} to {} within {} hops",
                    from, to, args.max_hops
                ),
            }
        }

        "evidence" => {
            let nid = args.nid.ok_or_else(|| missing("nid"))?;
            let chain = query.evidence_chain(Nid(nid))?;
            println!("Evidence for node {}:", nid);
            for link in &chain.links {
                println!(
                    "  span {} [{}..{}] from {} ({})",
                    link.span.nid.0,
                    link.span.start_offset,
                    link.span.end_offset,
                    link.source.title,
                    link.source.uri
                );
            }
            if chain.skipped > 0 {
                println!("  ({} damaged references skipped)", chain.skipped);
            }
        }

        "entities" => {
            let kind = match args.kind.as_deref() {
                None => None,
                Some("entity") => Some(NodeKind::Entity),
                Some("claim") => Some(NodeKind::Claim),
                Some("procedure") => Some(NodeKind::Procedure),
                Some("gap") => Some(NodeKind::Gap),
                Some(other) => {
                    return Err(ValidationError::LimitExceeded(format!(
                        "unknown node kind '{other}'"
                    ))
                    .into());
                }
            };
            let filter = EntityFilter {
                kind,
                label_contains: args.label,
                min_confidence: None,
                include_tombstoned: false,
            };
            let page = query.search_entities(&filter, args.cursor.map(Nid), args.limit)?;
            for record in &page.records {
                println!(
                    "  {} ({:?}) {}",
                    record.nid.0,
                    record.kind,
                    record.payload.label()
                );
            }
            if page.skipped > 0 {
                println!("  ({} damaged records skipped)", page.skipped);
            }
            match page.next_cursor {
                Some(cursor) => println!("More results: resume with --cursor {}", cursor.0),
                None => println!("{} result(s), end of scan", page.records.len()),
            }
        }

        "at" => {
            let at = args.at.ok_or_else(|| missing("at"))?;
            let view = query.snapshot_at(Timestamp(at))?;
            let scan = view.valid_claims()?;
            println!("Claims valid at {}:", at);
            for claim in &scan.claims {
                println!(
                    "  {} (v{}, confidence {}/1000) {}",
                    claim.nid.0,
                    claim.version,
                    claim.confidence.thousandths(),
                    claim.payload.label()
                );
            }
            if scan.skipped > 0 {
                println!("  ({} damaged records skipped)", scan.skipped);
            }
        }

        "facts" => {
            let source = args.source.ok_or_else(|| missing("source"))?;
            let scan = query.facts_from_source(Nid(source), Timestamp(args.since))?;
            println!("Facts from source {} since {}:", source, args.since);
            for (at, member) in &scan.entries {
                println!("  {} at {}", member.0, at.0);
            }
            if scan.skipped > 0 {
                println!("  ({} damaged postings skipped)", scan.skipped);
            }
        }

        other => {
            return Err(ValidationError::LimitExceeded(format!(
                "unknown query type: {other}. Use: get, path, evidence, entities, at, facts"
            ))
            .into());
        }
    }

    Ok(())
}

// =============================================================================
// AUDIT COMMANDS
// =============================================================================

/// Show the audit history of a NID.
pub fn cmd_history(db_path: &Path, json_mode: bool, nid: u64) -> Result<(), KairosError> {
    let repo = open_repo(db_path)?;
    let history = repo.history(Nid(nid))?;

    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&history.records).unwrap_or_default()
        );
        return Ok(());
    }

    if history.records.is_empty() {
        println!("No history for NID {}", nid);
        return Ok(());
    }

    println!("History of NID {}:", nid);
    for record in &history.records {
        println!(
            "  v{} {:?} by {} at {} (hash {:016x})",
            record.entry.version,
            record.entry.mutation,
            record.entry.actor,
            record.entry.timestamp.0,
            record.entry.payload_hash
        );
    }
    if history.skipped > 0 {
        println!("  ({} damaged entries skipped)", history.skipped);
    }
    Ok(())
}

/// Check a claim for temporal paradoxes, recording any finding as a Gap.
pub fn cmd_paradox(
    db_path: &Path,
    json_mode: bool,
    actor: &str,
    nid: u64,
) -> Result<(), KairosError> {
    let repo = open_repo(db_path)?;
    match repo.detect_paradox(Nid(nid))? {
        Some(report) => {
            if json_mode {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).unwrap_or_default()
                );
            } else {
                println!("{}", report.summary());
            }
            let gap = repo.record_paradox(&report, actor, now_millis())?;
            println!("Recorded as Gap node {}", gap.0);
        }
        None => println!("No paradox detected for claim {}", nid),
    }
    Ok(())
}

/// Submit a confidence revision.
pub fn cmd_revise(
    db_path: &Path,
    actor: &str,
    nid: u64,
    expected: u32,
    confidence: u16,
) -> Result<(), KairosError> {
    let repo = open_repo(db_path)?;
    let revision = NodeRevision {
        confidence: Some(Confidence::from_thousandths(confidence)),
        ..NodeRevision::default()
    };
    let version = repo.revise_node(Nid(nid), revision, expected, actor, now_millis())?;
    println!("Node {} revised to version {}", nid, version);
    Ok(())
}

/// Mark a Gap node resolved.
pub fn cmd_resolve(
    db_path: &Path,
    actor: &str,
    nid: u64,
    expected: u32,
    resolution: &str,
    evidence: Option<&str>,
) -> Result<(), KairosError> {
    let spans: BTreeSet<Nid> = evidence
        .unwrap_or("")
        .split(',')
        .filter_map(|s| s.trim().parse::<u64>().ok().map(Nid))
        .collect();

    let repo = open_repo(db_path)?;
    let version = repo.resolve_gap(Nid(nid), resolution, spans, expected, actor, now_millis())?;
    println!("Gap {} resolved at version {}", nid, version);
    Ok(())
}

/// Logically delete a record.
pub fn cmd_tombstone(db_path: &Path, actor: &str, nid: u64, reason: &str) -> Result<(), KairosError> {
    let repo = open_repo(db_path)?;
    let version = repo.tombstone(Nid(nid), actor, reason, now_millis())?;
    println!("NID {} tombstoned at version {}", nid, version);
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

/// Export the store.
pub fn cmd_export(db_path: &Path, output: &Path, format: &str) -> Result<(), KairosError> {
    let validated_output = validate_output_path(output)?;
    let repo = open_repo(db_path)?;

    let data = match format {
        "canonical" => {
            let data = export_canonical(&repo)?;
            println!("Digest: {}", export_digest(&data));
            data
        }
        "json" => {
            let bytes = export_canonical(&repo)?;
            let canonical = import_canonical(&bytes)?;
            serde_json::to_vec_pretty(&canonical)
                .map_err(|e| KairosError::Serialization(e.to_string()))?
        }
        other => {
            return Err(KairosError::Serialization(format!(
                "unknown format: {other}. Use: canonical, json"
            )));
        }
    };

    std::fs::write(&validated_output, &data)
        .map_err(|e| KairosError::Resource(format!("write file: {}", e)))?;
    println!("Exported {} bytes to {:?}", data.len(), validated_output);
    Ok(())
}

/// Import a canonical export into an empty store.
pub fn cmd_import(db_path: &Path, input: &Path) -> Result<(), KairosError> {
    let validated_path = validate_file_path(input)?;
    validate_file_size(&validated_path, MAX_IMPORT_FILE_SIZE)?;

    let data = std::fs::read(&validated_path)
        .map_err(|e| KairosError::Resource(format!("read file: {}", e)))?;
    let canonical = import_canonical(&data)?;

    let repo = open_repo(db_path)?;
    import_into(&repo, &canonical)?;

    println!(
        "Imported {} sources, {} spans, {} nodes, {} edges",
        canonical.sources.len(),
        canonical.spans.len(),
        canonical.nodes.len(),
        canonical.edges.len()
    );
    Ok(())
}
