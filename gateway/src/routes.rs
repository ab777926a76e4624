use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::AppState;
use sun_geometry::ActuatorAngles;
use tracker_core::StatusSnapshot;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
}

#[derive(Deserialize)]
pub struct OverrideRequest {
    pub axis_a: f64,
    pub axis_b: f64,
    /// Defaults to the configured manual hold when omitted.
    pub hold_seconds: Option<i64>,
}

#[derive(Serialize)]
pub struct OverrideResponse {
    pub status: &'static str,
    pub axis_a: f64,
    pub axis_b: f64,
    pub hold_seconds: i64,
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json((*state.shared.latest_status()).clone())
}

pub async fn post_override(
    State(state): State<AppState>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<OverrideResponse>, ApiError> {
    for (axis, value) in [("axis_a", request.axis_a), ("axis_b", request.axis_b)] {
        if !(0.0..=180.0).contains(&value) {
            return Err(bad_request(format!(
                "{axis} must be within 0-180 degrees, got {value}"
            )));
        }
    }

    let hold_seconds = request.hold_seconds.unwrap_or(state.default_hold_seconds);
    if hold_seconds < 1 {
        return Err(bad_request("hold_seconds must be at least 1".to_string()));
    }

    state
        .shared
        .apply_override(
            ActuatorAngles::new(request.axis_a, request.axis_b),
            hold_seconds,
        )
        .map_err(|err| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
        })?;

    Ok(Json(OverrideResponse {
        status: "success",
        axis_a: request.axis_a,
        axis_b: request.axis_b,
        hold_seconds,
    }))
}

pub async fn post_resume(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.shared.resume_auto();
    Json(serde_json::json!({ "status": "success", "mode": "auto" }))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "tracker-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
