//! Case management and workflow action endpoints
//!
//! Handlers stay thin: they decode the request, call the workflow engine and
//! turn its result into JSON. Stage runs are spawned in the background and
//! clients poll the case to watch the output grow.

use crate::api::{ApiError, AppState};
use crate::case::Case;
use crate::runtime::engine::RunOptions;
use crate::runtime::executor::Attachment;
use crate::stage::StageId;
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Case as returned by the API, with its run state
#[derive(Debug, Serialize)]
pub struct CaseView {
    #[serde(flatten)]
    pub case: Case,
    /// Whether a stage run is currently streaming into this case
    pub running: bool,
    /// The case sits on the last pipeline stage; advancing is not possible
    pub final_stage: bool,
}

/// Request body for case creation
#[derive(Debug, Default, Deserialize)]
pub struct CreateCaseRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub input_text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TitleRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct StageRequest {
    pub stage: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct ActiveCaseRequest {
    pub id: Option<String>,
}

/// Audio or document bundled with a run, base64-encoded
#[derive(Debug, Deserialize)]
pub struct AttachmentPayload {
    pub file_name: String,
    pub mime_type: String,
    pub data_base64: String,
}

/// Request body for starting a stage run
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    /// Stage to run instead of the case's current stage
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub attachment: Option<AttachmentPayload>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    /// Serve as a file download instead of inline text
    #[serde(default)]
    pub download: bool,
}

/// Create case management routes
///
/// `max_upload_bytes` bounds the body of run requests, which carry base64 audio.
pub fn create_case_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/api/cases", get(list_cases).post(create_case))
        .route("/api/cases/{id}", get(get_case).delete(delete_case))
        .route("/api/cases/{id}/title", put(rename_case))
        .route("/api/cases/{id}/input", put(update_input))
        .route("/api/cases/{id}/output", put(update_output))
        .route("/api/cases/{id}/stage", put(select_stage))
        .route(
            "/api/cases/{id}/run",
            post(run_stage).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/cases/{id}/cancel", post(cancel_run))
        .route("/api/cases/{id}/verify", post(set_verified))
        .route("/api/cases/{id}/advance", post(advance_stage))
        .route("/api/cases/{id}/export", get(export_output))
        .route("/api/active", get(get_active).put(set_active))
}

async fn view(state: &AppState, case: Case) -> Result<CaseView, ApiError> {
    let running = state.engine.workspace().is_running(case.id()).await?;
    let final_stage = state
        .engine
        .registry()
        .is_last(case.current_stage())
        .unwrap_or(false);
    Ok(CaseView { case, running, final_stage })
}

/// List all cases, most recently modified first
///
/// GET /api/cases
async fn list_cases(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let mut cases = Vec::new();
    for case in state.engine.workspace().list().await {
        cases.push(view(&state, case).await?);
    }
    Ok(Json(json!({ "cases": cases })))
}

/// Create a case at the first stage and make it active
///
/// POST /api/cases
/// Body: { "title": "...", "input_text": "..." } (both optional)
async fn create_case(
    State(state): State<AppState>,
    Json(payload): Json<CreateCaseRequest>,
) -> Result<(StatusCode, Json<CaseView>), ApiError> {
    let case = state.engine.create_case(payload.title, payload.input_text).await;
    Ok((StatusCode::CREATED, Json(view(&state, case).await?)))
}

/// GET /api/cases/{id}
async fn get_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CaseView>, ApiError> {
    let case = state.engine.workspace().get(&id).await?;
    Ok(Json(view(&state, case).await?))
}

/// DELETE /api/cases/{id}
async fn delete_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.delete_case(&id).await?;
    Ok(Json(json!({ "message": "Case deleted successfully" })))
}

/// PUT /api/cases/{id}/title
async fn rename_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<TitleRequest>,
) -> Result<Json<CaseView>, ApiError> {
    let case = state.engine.rename_case(&id, payload.title).await?;
    Ok(Json(view(&state, case).await?))
}

/// PUT /api/cases/{id}/input
async fn update_input(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<TextRequest>,
) -> Result<Json<CaseView>, ApiError> {
    let case = state.engine.update_input(&id, payload.text).await?;
    Ok(Json(view(&state, case).await?))
}

/// Manual correction of the output; withdraws verification
///
/// PUT /api/cases/{id}/output
async fn update_output(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<TextRequest>,
) -> Result<Json<CaseView>, ApiError> {
    let case = state.engine.update_output(&id, payload.text).await?;
    Ok(Json(view(&state, case).await?))
}

/// PUT /api/cases/{id}/stage
async fn select_stage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<StageRequest>,
) -> Result<Json<CaseView>, ApiError> {
    let case = state.engine.select_stage(&id, StageId::new(payload.stage)).await?;
    Ok(Json(view(&state, case).await?))
}

/// Start a stage run in the background
///
/// POST /api/cases/{id}/run
/// Body: { "stage": "opd_note", "attachment": { "file_name", "mime_type", "data_base64" } }
/// Returns 202 with the run id; poll GET /api/cases/{id} for output.
async fn run_stage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<RunRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let attachment = payload
        .attachment
        .map(|attachment| {
            general_purpose::STANDARD
                .decode(attachment.data_base64.as_bytes())
                .map(|bytes| Attachment {
                    file_name: attachment.file_name,
                    mime_type: attachment.mime_type,
                    bytes,
                })
                .map_err(|e| ApiError::InvalidRequest(format!("attachment is not valid base64: {}", e)))
        })
        .transpose()?;

    let options = RunOptions {
        stage: payload.stage.map(StageId::new),
        attachment,
    };

    let prepared = state.engine.prepare_run(&id, options).await?;
    let run_id = prepared.run_id();

    tokio::spawn(async move {
        let outcome = prepared.execute().await;
        tracing::info!(
            "🏁 Run {} for case {} ended: {:?}",
            outcome.run_id,
            outcome.case_id,
            outcome.status
        );
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "run_id": run_id, "case_id": id, "message": "Stage run started" })),
    ))
}

/// POST /api/cases/{id}/cancel
async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let cancelled = state.engine.cancel_run(&id).await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

/// POST /api/cases/{id}/verify
/// Body: { "verified": true }
async fn set_verified(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<CaseView>, ApiError> {
    let case = state.engine.set_verified(&id, payload.verified).await?;
    Ok(Json(view(&state, case).await?))
}

/// POST /api/cases/{id}/advance
async fn advance_stage(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CaseView>, ApiError> {
    let case = state.engine.advance_stage(&id).await?;
    Ok(Json(view(&state, case).await?))
}

/// Release verified output as plain text
///
/// GET /api/cases/{id}/export[?download=true]
async fn export_output(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let text = state.engine.export_output(&id).await?;
    let content_type = (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string());

    if query.download {
        let case = state.engine.workspace().get(&id).await?;
        let disposition = format!(
            "attachment; filename=\"{}\"",
            download_file_name(case.title(), case.current_stage())
        );
        return Ok(([content_type, (header::CONTENT_DISPOSITION, disposition)], text).into_response());
    }

    Ok(([content_type], text).into_response())
}

/// GET /api/active
async fn get_active(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "active_case_id": state.engine.workspace().active_case_id() }))
}

/// PUT /api/active
/// Body: { "id": "case-..." } or { "id": null }
async fn set_active(
    State(state): State<AppState>,
    Json(payload): Json<ActiveCaseRequest>,
) -> Result<Json<Value>, ApiError> {
    state.engine.workspace().set_active(payload.id.as_deref()).await?;
    Ok(Json(json!({ "active_case_id": payload.id })))
}

/// File name for a downloaded export, safe for a Content-Disposition header
fn download_file_name(title: &str, stage: &StageId) -> String {
    let slug: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let slug = if slug.is_empty() { "case".to_string() } else { slug };
    format!("{}-{}.txt", slug, stage)
}
