use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ApiError;
use super::AppState;
use crate::orchestration::{AnalyzeRequest, DispatchDetail};
use crate::services::drinks::DrinkCategory;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeBody {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub name: String,
    pub estimated_oz: f64,
    pub confidence: f64,
    pub description: String,
    pub cached: bool,
    pub category: DrinkCategory,
    pub hydration_oz: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderResponse {
    pub success: bool,
    pub notifications_sent: u32,
    pub details: Vec<DispatchDetail>,
}

pub async fn root() -> &'static str {
    "Hydration backend: drink analysis and reminders"
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
pub async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    serde_json::to_value(state.metrics.snapshot())
        .map(Json)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialize metrics: {}", e),
            )
        })
}

/// Analyse a drink photo
///
/// # Request Format:
/// - JSON `{ "image": base64 or data URL, "userId": optional }`
///
/// # Response:
/// - 200 with the analysis, 400 without an image, 429 over quota
/// - 4xx JSON error when the body can't be read as the request above
pub async fn analyze_drink_image(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeBody>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    state.metrics.record_endpoint_request("/analyze-drink-image");
    let Json(body) = payload?;

    let analysis = state
        .analyzer
        .analyze(
            AnalyzeRequest {
                image: body.image,
                user_id: body.user_id,
            },
            Utc::now(),
        )
        .await?;

    Ok(Json(AnalyzeResponse {
        name: analysis.result.drink_name,
        estimated_oz: analysis.result.estimated_volume_oz,
        confidence: analysis.result.confidence,
        description: analysis.result.description,
        cached: analysis.cached,
        category: analysis.category,
        hydration_oz: analysis.hydration_oz,
    }))
}

/// Run one reminder dispatch pass. Intended to be hit by a scheduler every
/// minute or two.
pub async fn send_hydration_reminder(
    State(state): State<AppState>,
) -> Result<Json<ReminderResponse>, ApiError> {
    state.metrics.record_endpoint_request("/send-hydration-reminder");

    let report = state.dispatcher.run(Utc::now()).await?;
    info!("Reminder endpoint: {} notifications sent", report.notifications_sent);

    Ok(Json(ReminderResponse {
        success: true,
        notifications_sent: report.notifications_sent,
        details: report.details,
    }))
}
