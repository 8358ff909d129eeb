use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::{unavailable, ApiError, AppState, ErrorResponse};
use crate::services::termini::TerminusStatus;

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub generated_at: DateTime<Utc>,
    /// False when the alert feed could not be read; every terminus is then `unknown`
    pub alerts_available: bool,
    pub termini: Vec<TerminusStatus>,
}

/// Closure and incident status for every network terminus
#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Terminus statuses from the latest evaluation cycle", body = StatusResponse),
        (status = 503, description = "No evaluation cycle has completed yet", body = ErrorResponse)
    ),
    tag = "network"
)]
pub async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let reports = state.reports.read().await;
    let report = reports
        .as_ref()
        .ok_or_else(|| unavailable("No evaluation cycle has completed yet"))?;

    Ok(Json(StatusResponse {
        generated_at: report.generated_at,
        alerts_available: report.alerts_available,
        termini: report.termini.clone(),
    }))
}
