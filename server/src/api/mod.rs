pub mod departures;
pub mod error;
pub mod network;

pub use error::{not_found, unavailable, ApiError, ErrorResponse};

use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::config::Config;
use crate::schedule::ScheduleStore;
use crate::services::departures::DepartureReconciler;
use crate::sync::ReportStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub schedule: ScheduleStore,
    pub departures: DepartureReconciler,
    pub reports: ReportStore,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Transit Pulse API",
        description = "Next departures with live delays, and terminus closure status"
    ),
    tags(
        (name = "departures", description = "Departure boards for stops and stations"),
        (name = "network", description = "Network-wide status and statistics")
    )
)]
pub struct ApiDoc;

pub fn router(state: AppState) -> OpenApiRouter {
    OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(departures::get_departures))
        .routes(routes!(network::get_status))
        .routes(routes!(network::get_stats))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::gtfs_rt::FeedClient;
    use crate::schedule::test_fixtures::snapshot;
    use crate::sync::{build_report, CycleInputs};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    fn config() -> Config {
        Config::parse(
            r#"
schedule:
  directory: /nonexistent
feeds:
  alerts_url: http://127.0.0.1:9/alerts
  trip_updates_url: http://127.0.0.1:9/trips
  vehicle_positions_url: http://127.0.0.1:9/vehicles
  timeout_secs: 1
departures:
  default_count: 3
  max_count: 5
"#,
        )
        .unwrap()
    }

    fn state() -> AppState {
        let config = Arc::new(config());
        let feeds = FeedClient::new(&config.feeds).unwrap();
        AppState {
            departures: DepartureReconciler::new(feeds, config.timezone),
            schedule: ScheduleStore::new(snapshot()),
            reports: Arc::new(RwLock::new(None)),
            config,
        }
    }

    async fn get(state: AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        let (app, _) = router(state).split_for_parts();
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_unknown_stop_is_not_found() {
        let (status, body) = get(state(), "/api/departures?stop=Nowhere%20Junction").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("Nowhere Junction"));
    }

    #[tokio::test]
    async fn test_departures_degrade_without_live_feed() {
        let (status, body) = get(state(), "/api/departures?stop=central%20station&count=50").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stop_id"], "place_censtn");
        assert_eq!(body["realtime_available"], false);
        assert!(body["departures"].as_array().unwrap().len() <= 5);
    }

    #[tokio::test]
    async fn test_network_endpoints_wait_for_first_cycle() {
        let state = state();
        let (status, _) = get(state.clone(), "/api/status").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, _) = get(state.clone(), "/api/stats").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let report = build_report(CycleInputs {
            snapshot: &state.schedule.snapshot(),
            config: &state.config,
            now: crate::schedule::test_fixtures::brisbane(2026, 3, 4, 8, 30),
            alerts: None,
            positions: None,
        });
        *state.reports.write().await = Some(report);

        let (status, body) = get(state.clone(), "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alerts_available"], false);
        assert_eq!(body["termini"].as_array().unwrap().len(), 6);
        assert_eq!(body["termini"][0]["state"], "unknown");

        let (status, body) = get(state, "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["vehicles"].is_null());
        assert_eq!(body["routes_operating_today"], 4);
    }

    #[test]
    fn test_openapi_lists_endpoints() {
        let (_, api) = router(state()).split_for_parts();
        for path in ["/api/departures", "/api/status", "/api/stats"] {
            assert!(api.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
