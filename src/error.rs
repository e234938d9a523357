//! Workflow error taxonomy
//!
//! Every rejection the workflow engine can produce is a distinct variant so the
//! HTTP layer (or any other caller) can surface it as an explicit notice.

use crate::runtime::executor::ExecutorError;

/// Errors raised by the stage registry and the workflow engine
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// A run was requested with blank input and no attachment
    #[error("input text is empty - paste or upload a transcript before running a stage")]
    EmptyInput,

    /// The transcription executor failed before or during streaming
    #[error("transcription executor failed: {0}")]
    ExecutorFailure(#[from] ExecutorError),

    /// Advance or export attempted on output a human has not signed off
    #[error("case '{case_id}' cannot {action}: {reason}")]
    ComplianceGate {
        case_id: String,
        action: &'static str,
        reason: &'static str,
    },

    /// Advance attempted on the last stage of the pipeline
    #[error("case '{case_id}' is already at the final stage '{stage}'")]
    WorkflowComplete { case_id: String, stage: String },

    /// A stage id that is not present in the registry
    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    #[error("case not found: {0}")]
    CaseNotFound(String),

    /// A run is already streaming into this case
    #[error("a stage run is already in progress for case '{0}'")]
    RunInProgress(String),

    /// Binary attachments are only accepted by ingestion stages
    #[error("stage '{0}' does not accept attachments")]
    AttachmentNotAllowed(String),

    /// The stage catalog is empty or contains duplicate ids
    #[error("invalid stage catalog: {0}")]
    InvalidCatalog(String),
}

impl WorkflowError {
    /// Stable machine-readable identifier for this error class
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::EmptyInput => "empty_input",
            WorkflowError::ExecutorFailure(_) => "executor_failure",
            WorkflowError::ComplianceGate { .. } => "compliance_gate",
            WorkflowError::WorkflowComplete { .. } => "workflow_complete",
            WorkflowError::UnknownStage(_) => "unknown_stage",
            WorkflowError::CaseNotFound(_) => "case_not_found",
            WorkflowError::RunInProgress(_) => "run_in_progress",
            WorkflowError::AttachmentNotAllowed(_) => "attachment_not_allowed",
            WorkflowError::InvalidCatalog(_) => "invalid_catalog",
        }
    }
}
