//! Stage Management Layer
//!
//! This module owns the fixed editing pipeline:
//! - Type definitions (StageId, StageDefinition)
//! - The built-in seven-stage catalog
//! - An ordered, immutable registry with next-stage lookup

// Core stage type definitions
pub mod types;

// Built-in catalog and JSON catalog loading
pub mod catalog;

// Ordered registry used by the workflow engine
pub mod registry;

pub use registry::StageRegistry;
pub use types::{StageDefinition, StageId};
