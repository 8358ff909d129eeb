use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::{unavailable, ApiError, AppState, ErrorResponse};
use crate::services::service_period::{period_for, ServicePeriod};
use crate::services::statistics::ModeCounts;

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub generated_at: DateTime<Utc>,
    /// Service period at the time of the request
    pub period: ServicePeriod,
    pub period_label: String,
    /// Absent when the vehicle position feed could not be read
    pub vehicles: Option<ModeCounts>,
    pub routes_operating_today: usize,
    pub scheduled_trips_running: ModeCounts,
    pub schedule_loaded_at: DateTime<Utc>,
}

/// Live vehicle counts, routes operating today and the current service period
#[utoipa::path(
    get,
    path = "/api/stats",
    responses(
        (status = 200, description = "Network statistics from the latest evaluation cycle", body = StatsResponse),
        (status = 503, description = "No evaluation cycle has completed yet", body = ErrorResponse)
    ),
    tag = "network"
)]
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let reports = state.reports.read().await;
    let report = reports
        .as_ref()
        .ok_or_else(|| unavailable("No evaluation cycle has completed yet"))?;

    let period = period_for(&Utc::now().with_timezone(&state.config.timezone));

    Ok(Json(StatsResponse {
        generated_at: report.generated_at,
        period,
        period_label: period.label().to_string(),
        vehicles: report.vehicles,
        routes_operating_today: report.routes_operating_today,
        scheduled_trips_running: report.scheduled_trips_running,
        schedule_loaded_at: report.schedule_loaded_at,
    }))
}
