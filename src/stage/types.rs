//! Core stage type definitions
//!
//! A stage is one step of the editing pipeline. Definitions are created once at
//! startup and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a pipeline stage (e.g., "cleanup", "discharge_summary")
///
/// Kept as an opaque string so the catalog can come from configuration.
/// Whether an id is valid is decided by the StageRegistry, never by parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A single stage of the editing pipeline
///
/// The prompt template is combined with the case input to form the request sent
/// to the transcription executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique stage identifier within the catalog
    pub id: StageId,
    /// Display label (e.g., "1. Core Cleanup")
    pub label: String,
    /// Short display description
    pub description: String,
    /// System prompt given to the model for this stage
    pub system_instruction: String,
    /// Instruction text placed ahead of the user's text
    pub prompt_template: String,
    /// Remote model variant (e.g., "gemini-3-flash-preview")
    pub model_selector: String,
    /// Whether a run of this stage may carry a binary audio attachment
    #[serde(default)]
    pub accepts_attachment: bool,
}
