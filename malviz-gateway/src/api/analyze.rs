//! File analysis endpoint
//!
//! `POST /analyze/` with a multipart body carrying one file field.

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use tracing::debug;

use crate::{
    error::{AnalyzeError, AnalyzeResult},
    AppState,
};

/// POST /analyze/
///
/// Stages the uploaded file, runs the AI engine on it and returns the
/// engine's JSON verdict unchanged. A request that is not multipart at all
/// has no file field either, so it gets the same 400 as an empty form.
pub async fn analyze_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AnalyzeResult<Json<Value>> {
    let mut multipart = multipart.map_err(|rejection| {
        debug!(reason = %rejection, "Request body is not multipart");
        AnalyzeError::MissingFile
    })?;

    let result = state.pipeline.analyze(&mut multipart).await?;
    Ok(Json(result))
}

/// Build analysis routes
pub fn analyze_routes() -> Router<AppState> {
    Router::new()
        .route("/analyze/", post(analyze_file))
        .route("/analyze", post(analyze_file))
}
