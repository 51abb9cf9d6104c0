use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::HeaderMap,
    routing::{get, post},
};
use log::{debug, info};
use model_registry::{Predictions, TOP_K, mock_predictions, predict};
use serde::Serialize;
use tokio::task;
use tower_http::cors::CorsLayer;

use crate::{
    error::ApiError,
    history::{HISTORY_LIMIT, HistoryRecord},
    state::AppState,
};

/// The header an upstream gateway identifies the caller with.
pub const USER_ID_HEADER: &str = "x-user-id";
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    #[serde(flatten)]
    pub predictions: Predictions,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub mode: &'static str,
    pub loaded_models: Vec<String>,
}

/// Builds the service's router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/predict", post(predict_image))
        .route("/api/health", get(health))
        .route("/api/history", get(history))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

async fn read_file(multipart: &mut Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            return Ok(field.bytes().await?.to_vec());
        }
    }

    Err(ApiError::MissingFile)
}

async fn predict_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let bytes = read_file(&mut multipart).await?;
    let image = image::load_from_memory(&bytes)?;
    debug!(width = image.width(), height = image.height(); "decoded upload");

    let predictions = if state.is_mock() {
        mock_predictions(state.model_names.iter().map(String::as_str), &state.labels)
    } else {
        let shared = state.clone();
        task::spawn_blocking(move || {
            predict(&image, &shared.registry, &shared.selector, &shared.labels, TOP_K)
        })
        .await?
    };

    if let Some(user_id) = user_id(&headers) {
        info!(user = user_id.as_str(), models = predictions.len(); "saving prediction");
        state
            .history
            .push(HistoryRecord::new(user_id, None, predictions.clone()));
    }

    Ok(Json(PredictResponse {
        predictions,
        image_url: None,
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        mode: state.mode(),
        loaded_models: state.registry.names().map(String::from).collect(),
    })
}

async fn history(State(state): State<AppState>, headers: HeaderMap) -> Json<Vec<HistoryRecord>> {
    let records = match user_id(&headers) {
        Some(user_id) => state.history.recent(&user_id, HISTORY_LIMIT),
        None => Vec::new(),
    };

    Json(records)
}
