//! HTTP API Layer
//!
//! REST endpoints that drive the transcription workflow. It handles:
//! - Stage catalog listing
//! - Case CRUD and active-case selection
//! - Run / cancel / verify / advance / export actions
//!
//! Every workflow rejection is returned as an explicit JSON notice with a
//! distinct status code and error kind.

// Case management and workflow action endpoints
pub mod cases;

// Read-only stage catalog endpoint
pub mod stages;

use crate::error::WorkflowError;
use crate::runtime::engine::WorkflowEngine;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

pub use cases::create_case_routes;
pub use stages::create_stage_routes;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Workflow engine (registry, workspace and executor)
    pub engine: WorkflowEngine,
}

/// Error returned by every API handler
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Malformed request payload (e.g., bad base64)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Workflow(err) => match err {
                WorkflowError::EmptyInput | WorkflowError::AttachmentNotAllowed(_) => {
                    StatusCode::BAD_REQUEST
                }
                WorkflowError::ComplianceGate { .. } => StatusCode::FORBIDDEN,
                WorkflowError::WorkflowComplete { .. } | WorkflowError::RunInProgress(_) => {
                    StatusCode::CONFLICT
                }
                WorkflowError::CaseNotFound(_) => StatusCode::NOT_FOUND,
                WorkflowError::UnknownStage(_) => StatusCode::UNPROCESSABLE_ENTITY,
                WorkflowError::ExecutorFailure(_) => StatusCode::BAD_GATEWAY,
                WorkflowError::InvalidCatalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::Workflow(err) => err.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_and_completion_map_to_different_statuses() {
        let gate = ApiError::from(WorkflowError::ComplianceGate {
            case_id: "c".to_string(),
            action: "export",
            reason: "output has not been verified",
        });
        let done = ApiError::from(WorkflowError::WorkflowComplete {
            case_id: "c".to_string(),
            stage: "final_polish".to_string(),
        });

        assert_eq!(gate.status(), StatusCode::FORBIDDEN);
        assert_eq!(done.status(), StatusCode::CONFLICT);
        assert_ne!(gate.kind(), done.kind());
    }

    #[test]
    fn empty_input_is_a_client_error() {
        let err = ApiError::from(WorkflowError::EmptyInput);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "empty_input");
    }

    #[test]
    fn unknown_stage_is_unprocessable() {
        let err = ApiError::from(WorkflowError::UnknownStage("legacy".to_string()));
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
