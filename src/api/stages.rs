//! Stage catalog endpoint

use crate::api::AppState;
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};

pub fn create_stage_routes() -> Router<AppState> {
    Router::new().route("/api/stages", get(list_stages))
}

/// List stages in pipeline order
///
/// GET /api/stages
/// Returns: { "stages": [{ "id": "cleanup", "label": "...", "model_selector": "...", ... }] }
async fn list_stages(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "stages": state.engine.registry().ordered_stages() }))
}
