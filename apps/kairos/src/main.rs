//! # KAIROS - Temporal Knowledge Store
//!
//! The main binary for the KAIROS store.
//!
//! This application provides:
//! - HTTP API (axum-based, read/ingest surface for collaborators)
//! - CLI interface for store operations
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                 apps/kairos (THE BINARY)               │
//! │                                                        │
//! │     ┌─────────────┐          ┌─────────────┐           │
//! │     │   CLI       │          │   HTTP API  │           │
//! │     │  (clap)     │          │   (axum)    │           │
//! │     └──────┬──────┘          └──────┬──────┘           │
//! │            │                        │                  │
//! │            └───────────┬────────────┘                  │
//! │                        ▼                               │
//! │                ┌───────────────┐                       │
//! │                │  kairos-core  │                       │
//! │                │  (THE STORE)  │                       │
//! │                └───────────────┘                       │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! kairos server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! kairos status
//! kairos ingest -f batch.json
//! kairos query -t path --from 12 --to 47
//! kairos history -n 12
//! ```

use clap::Parser;
use kairos::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Initialize tracing — KAIROS_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("KAIROS_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kairos=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the KAIROS startup banner.
fn print_banner() {
    println!(
        r#"
  ██╗  ██╗ █████╗ ██╗██████╗  ██████╗ ███████╗
  ██║ ██╔╝██╔══██╗██║██╔══██╗██╔═══██╗██╔════╝
  █████╔╝ ███████║██║██████╔╝██║   ██║███████╗
  ██╔═██╗ ██╔══██║██║██╔══██╗██║   ██║╚════██║
  ██║  ██╗██║  ██║██║██║  ██║╚██████╔╝███████║
  ╚═╝  ╚═╝╚═╝  ╚═╝╚═╝╚═╝  ╚═╝ ╚═════╝ ╚══════╝

  Temporal Knowledge Store v{}

  Ordered • Append-only • Snapshot-isolated
"#,
        env!("CARGO_PKG_VERSION")
    );
}
