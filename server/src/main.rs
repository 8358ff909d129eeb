mod api;
mod config;
mod providers;
mod schedule;
mod services;
mod sync;

use axum::http::{header, HeaderValue, Method};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa_swagger_ui::SwaggerUi;

use api::AppState;
use config::Config;
use providers::gtfs_rt::FeedClient;
use schedule::ScheduleStore;
use services::departures::DepartureReconciler;
use sync::SyncManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transit_pulse=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("TRANSIT_PULSE_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    info!(path = %config_path, "Loading configuration");
    let config = Arc::new(Config::load(&config_path)?);

    info!(directory = %config.schedule.directory.display(), "Loading static schedule");
    let directory = config.schedule.directory.clone();
    let schedule = tokio::task::spawn_blocking(move || ScheduleStore::load(&directory)).await??;

    let feeds = FeedClient::new(&config.feeds)?;

    let sync_manager = Arc::new(SyncManager::new(config.clone(), schedule.clone(), feeds.clone()));
    let reports = sync_manager.report_store();
    tokio::spawn(sync_manager.start());

    let state = AppState {
        config: config.clone(),
        schedule,
        departures: DepartureReconciler::new(feeds, config.timezone),
        reports,
    };

    // Configure CORS
    let cors = if config.cors_permissive {
        warn!("CORS is permissive, all origins are allowed");
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        CorsLayer::new().allow_origin(origins)
    }
    .allow_methods([Method::GET])
    .allow_headers([header::CONTENT_TYPE]);

    // Build router
    let (router, openapi) = api::router(state).split_for_parts();
    let app = router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}
