//! HealthDocs: verification-gated medical transcription workflow
//!
//! This library provides the staged editing pipeline that turns raw dictation
//! into clinical documents through a hosted language model, with a mandatory
//! human verification step before any text moves on or leaves the system.

// Core configuration and setup
pub mod config;

// Workflow error taxonomy shared by the engine and the HTTP layer
pub mod error;

// Stage catalog and ordered stage registry
pub mod stage;

// Case records, the in-memory workspace and its persistence
pub mod case;

// Runtime execution engine - streaming runs and the verification gate
pub mod runtime;

// HTTP API layer - REST endpoints for cases and workflow actions
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use case::{Case, Workspace};
pub use error::WorkflowError;
pub use runtime::{RunOptions, RunOutcome, RunStatus, WorkflowEngine};
pub use server::start_server;
pub use stage::{StageDefinition, StageId, StageRegistry};
