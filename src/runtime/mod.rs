//! Runtime Execution Engine
//!
//! This module runs workflow stages against the hosted language model.
//! It handles:
//! - The executor seam and the streaming Gemini client behind it
//! - Per-case run ownership, cancellation and failure markers
//! - The verification gate on advance and export

// Verification-gated workflow engine
pub mod engine;

// Executor trait and request types
pub mod executor;

// Gemini streaming client (server-sent events)
pub mod gemini;

// Re-export main types
pub use engine::{PreparedRun, RunOptions, RunOutcome, RunStatus, WorkflowEngine, CANCELLED_MARKER, ERROR_MARKER};
pub use executor::{Attachment, ExecutorError, FragmentStream, TranscriptionExecutor, TranscriptionRequest};
pub use gemini::GeminiExecutor;
