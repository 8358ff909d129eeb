use axum::{
    extract::{Query, State},
    Json,
};
use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::{not_found, ApiError, AppState, ErrorResponse};
use crate::services::departures::DepartureRecord;

/// A departure from a stop
#[derive(Debug, Serialize, ToSchema)]
pub struct Departure {
    pub trip_id: String,
    pub stop_id: String,
    pub route_id: String,
    pub route_short_name: String,
    /// Hex colour without the leading '#'
    pub route_color: String,
    pub headsign: String,
    pub platform: String,
    pub scheduled_departure: String,
    pub estimated_departure: String,
    pub minutes_away: i64,
    pub delay_minutes: Option<i64>,
    pub realtime: bool,
}

impl Departure {
    fn from_record(record: &DepartureRecord, now: DateTime<Tz>) -> Self {
        Self {
            trip_id: record.trip_id.clone(),
            stop_id: record.stop_id.clone(),
            route_id: record.route_id.clone(),
            route_short_name: record.route_short_name.clone(),
            route_color: record.route_color.clone(),
            headsign: record.headsign.clone(),
            platform: record.platform.clone(),
            scheduled_departure: record.scheduled.to_rfc3339(),
            estimated_departure: record.eta.to_rfc3339(),
            minutes_away: (record.eta - now).num_seconds().div_euclid(60).max(0),
            delay_minutes: record.delay_minutes(),
            realtime: record.realtime,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DepartureBoardResponse {
    pub stop_id: String,
    pub stop_name: String,
    /// False when live trip updates could not be fetched; times are scheduled only
    pub realtime_available: bool,
    pub generated_at: String,
    pub departures: Vec<Departure>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DepartureQuery {
    /// Stop id, or a full or partial stop name
    pub stop: String,
    /// Number of departures to return
    pub count: Option<usize>,
}

/// Next departures at a stop (and its platforms, for a station)
#[utoipa::path(
    get,
    path = "/api/departures",
    params(DepartureQuery),
    responses(
        (status = 200, description = "Upcoming departures ordered by estimated time", body = DepartureBoardResponse),
        (status = 404, description = "Stop not found", body = ErrorResponse)
    ),
    tag = "departures"
)]
pub async fn get_departures(
    State(state): State<AppState>,
    Query(query): Query<DepartureQuery>,
) -> Result<Json<DepartureBoardResponse>, ApiError> {
    let snapshot = state.schedule.snapshot();
    let stop = snapshot
        .resolve_stop(&query.stop)
        .ok_or_else(|| not_found(format!("Stop '{}' not found", query.stop)))?;
    let stop_id = stop.stop_id.clone();
    let stop_name = stop.name().to_string();

    let limits = &state.config.departures;
    let count = query
        .count
        .unwrap_or(limits.default_count)
        .clamp(1, limits.max_count.max(1));

    let stop_ids = snapshot.stop_family(&stop_id);
    let board = state.departures.board(&snapshot, &stop_ids, count).await;

    Ok(Json(DepartureBoardResponse {
        stop_id,
        stop_name,
        realtime_available: board.realtime_available,
        generated_at: board.generated_at.to_rfc3339(),
        departures: board
            .departures
            .iter()
            .map(|record| Departure::from_record(record, board.generated_at))
            .collect(),
    }))
}
