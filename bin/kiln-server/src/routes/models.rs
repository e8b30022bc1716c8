//! `GET /v1/models`, `GET /v1/model` — loaded-model metadata (§4.5).

use axum::extract::State;
use axum::Json;

use crate::models::openai::{ModelInfo, ModelListResponse};
use crate::state::AppState;

fn describe(state: &AppState) -> ModelInfo {
    ModelInfo {
        id: state.config.model_path.clone(),
        object: "model",
        created: 0,
        owned_by: "kiln",
    }
}

pub async fn list_models(State(state): State<AppState>) -> Json<ModelListResponse> {
    Json(ModelListResponse {
        object: "list",
        data: vec![describe(&state)],
    })
}

pub async fn get_model(State(state): State<AppState>) -> Json<ModelInfo> {
    Json(describe(&state))
}
