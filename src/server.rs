//! Server setup and initialization
//!
//! Wires together all components: case storage, workspace, stage registry,
//! transcription executor, workflow engine and HTTP routes.

use crate::{
    api::{create_case_routes, create_stage_routes, AppState},
    case::{storage::SqliteCaseStore, workspace::Workspace},
    config::Config,
    runtime::{engine::WorkflowEngine, gemini::GeminiExecutor},
    stage::{catalog::load_catalog_file, registry::StageRegistry},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Build the workflow engine from configuration
///
/// Opens the case database, loads the workspace, resolves the stage catalog and
/// creates the Gemini executor.
pub async fn create_engine(config: &Config) -> Result<WorkflowEngine> {
    let db_path = config.database.database_path();
    tracing::info!("📁 Opening case database: {}", db_path.display());
    let store = SqliteCaseStore::connect(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open case database: {}", e))?;

    tracing::info!("📥 Loading cases from storage");
    let workspace = Workspace::load(Arc::new(store))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load cases from storage: {}", e))?;

    let registry = match &config.stages_file {
        Some(path) => {
            tracing::info!("📋 Loading stage catalog from {}", path);
            StageRegistry::new(load_catalog_file(path)?)?
        }
        None => {
            tracing::info!("📋 Using built-in stage catalog");
            StageRegistry::with_default_catalog()?
        }
    };

    if config.executor.api_key.is_empty() {
        tracing::warn!("⚠️ No Gemini API key configured (GEMINI_API_KEY); stage runs will fail");
    }
    tracing::info!("⚙️ Initializing Gemini executor at {}", config.executor.base_url);
    let executor = Arc::new(GeminiExecutor::new(config.executor.clone()));

    let engine = WorkflowEngine::new(Arc::new(registry), workspace, executor);
    let unknown = engine.audit_cases().await;
    if unknown > 0 {
        tracing::warn!("⚠️ {} cases reference stages missing from the catalog", unknown);
    }

    Ok(engine)
}

/// Create the main Axum router for an engine
pub fn create_router(engine: WorkflowEngine, max_upload_bytes: usize) -> Router {
    let app_state = AppState { engine };

    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Stage catalog
        .merge(create_stage_routes().with_state(app_state.clone()))
        // Case management and workflow actions
        .merge(create_case_routes(max_upload_bytes).with_state(app_state))
}

/// Create the full application from configuration
pub async fn create_app(config: &Config) -> Result<(Router, WorkflowEngine)> {
    let engine = create_engine(config).await?;
    tracing::info!("📡 Creating HTTP router with all endpoints");
    tracing::info!("📦 Run uploads limited to {} MiB", config.server.max_upload_mb);
    let app = create_router(engine.clone(), config.server.max_upload_bytes());
    tracing::info!("✅ Application initialized successfully");
    Ok((app, engine))
}

/// Start the HTTP server with the given configuration
///
/// Serves until Ctrl-C, then cancels in-flight runs and writes the workspace
/// to disk one last time.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting HealthDocs server...");

    let (app, engine) = create_app(&config).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("💾 Flushing workspace before exit");
    engine.shutdown().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown signal received");
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
