//! Case management module
//!
//! Handles the unit of transcription work and its lifetime:
//! - Case type with invariant-preserving mutators
//! - CaseStore interface with SQLite and in-memory backends
//! - Workspace session context with fire-and-forget persistence

pub mod storage;
pub mod types;
pub mod workspace;

pub use storage::{CaseStore, MemoryCaseStore, SqliteCaseStore};
pub use types::{AudioInfo, Case};
pub use workspace::Workspace;
