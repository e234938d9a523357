//! HealthDocs: verification-gated medical transcription workflow
//!
//! Main entry point for the HealthDocs server. Initializes configuration and starts
//! the HTTP server with case management and stage execution capabilities.

use healthdocs::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Case management and workflow actions at /api/cases/*
/// - Stage catalog at /api/stages
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:3005 and data/healthdocs.db)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
