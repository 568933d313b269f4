//! # Footprint - Project Stage & Carbon Accounting Server
//!
//! The main binary for the Footprint engine.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for chain, membership and accrual operations
//! - Periodic completion sweep
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                apps/footprint (THE BINARY)                │
//! │                                                           │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────┐   │
//! │  │   CLI       │    │   HTTP API  │    │ Sweep task   │   │
//! │  │  (clap)     │    │   (axum)    │    │ (tokio)      │   │
//! │  └──────┬──────┘    └──────┬──────┘    └──────┬───────┘   │
//! │         │                  │                  │           │
//! │         └──────────────────┼──────────────────┘           │
//! │                            ▼                              │
//! │                   ┌────────────────┐                      │
//! │                   │ footprint-core │                      │
//! │                   │  (THE LOGIC)   │                      │
//! │                   └────────────────┘                      │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! footprint server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! footprint create-chain --user 1 --organization Acme --name Website -m 2:member
//! footprint complete --instance 1 --user 2
//! footprint accrue --instance 1 --user 2 --seconds 3600
//! ```

use clap::Parser;
use footprint::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // FOOTPRINT_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("FOOTPRINT_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "footprint=info,footprint_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!(
        r#"
  Footprint v{}

  Stage progression and carbon accounting
"#,
        env!("CARGO_PKG_VERSION")
    );
}
