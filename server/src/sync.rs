use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use gtfs_realtime::FeedMessage;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::config::Config;
use crate::providers::gtfs_rt::{FeedClient, FeedKind};
use crate::schedule::{ScheduleSnapshot, ScheduleStore};
use crate::services::alerts::alerts_by_route;
use crate::services::service_period::{period_for, ServicePeriod};
use crate::services::statistics::{
    count_active_vehicles, count_routes_operating_today, count_trips_running, ModeCounts,
};
use crate::services::termini::{
    attach_replacements, compute_snapshot, unknown_snapshot, RelevanceGuard, TerminusStatus,
    TerminusTopology,
};

/// Output of one evaluation cycle
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NetworkReport {
    pub generated_at: DateTime<Utc>,
    pub period: ServicePeriod,
    /// False when the alert feed could not be read this cycle
    pub alerts_available: bool,
    pub termini: Vec<TerminusStatus>,
    /// Live vehicles by mode, absent when the position feed could not be read
    pub vehicles: Option<ModeCounts>,
    pub routes_operating_today: usize,
    pub scheduled_trips_running: ModeCounts,
    pub schedule_loaded_at: DateTime<Utc>,
}

/// Latest evaluation cycle output, replaced wholesale each cycle
pub type ReportStore = Arc<RwLock<Option<NetworkReport>>>;

/// Everything one cycle reads, captured up front
pub struct CycleInputs<'a> {
    pub snapshot: &'a ScheduleSnapshot,
    pub config: &'a Config,
    pub now: DateTime<Tz>,
    pub alerts: Option<&'a FeedMessage>,
    pub positions: Option<&'a FeedMessage>,
}

/// Build a report from already-fetched feeds. A missing feed degrades only
/// the part of the report that depends on it.
pub fn build_report(inputs: CycleInputs<'_>) -> NetworkReport {
    let CycleInputs {
        snapshot,
        config,
        now,
        alerts,
        positions,
    } = inputs;
    let today = now.date_naive();

    let topology = TerminusTopology::build(snapshot, &config.termini.forced);
    let operating_today = snapshot.routes_operating_on(today);

    let termini = match alerts {
        Some(feed) => {
            let route_alerts = alerts_by_route(feed, snapshot);
            let guard = RelevanceGuard::from_config(&config.termini);
            let mut statuses = compute_snapshot(&topology, &route_alerts, &guard, now);
            attach_replacements(&mut statuses, &config.rail_replacements, snapshot, &operating_today);
            statuses
        }
        None => unknown_snapshot(&topology),
    };

    NetworkReport {
        generated_at: now.with_timezone(&Utc),
        period: period_for(&now),
        alerts_available: alerts.is_some(),
        termini,
        vehicles: positions.map(|feed| count_active_vehicles(feed, snapshot)),
        routes_operating_today: count_routes_operating_today(snapshot, today),
        scheduled_trips_running: count_trips_running(snapshot, now),
        schedule_loaded_at: snapshot.loaded_at(),
    }
}

/// Runs the schedule refresh loop and the periodic evaluation cycle
pub struct SyncManager {
    config: Arc<Config>,
    schedule: ScheduleStore,
    feeds: FeedClient,
    reports: ReportStore,
}

impl SyncManager {
    pub fn new(config: Arc<Config>, schedule: ScheduleStore, feeds: FeedClient) -> Self {
        Self {
            config,
            schedule,
            feeds,
            reports: Arc::new(RwLock::new(None)),
        }
    }

    /// Get a reference to the report store for API access
    pub fn report_store(&self) -> ReportStore {
        self.reports.clone()
    }

    /// Start the background loops
    pub async fn start(self: Arc<Self>) {
        info!(
            evaluation_interval_secs = self.config.evaluation_interval_secs,
            refresh_interval_secs = self.config.schedule.refresh_interval_secs,
            "Starting sync manager"
        );

        let refresh_self = self.clone();
        let refresh_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                refresh_self.config.schedule.refresh_interval_secs.max(60),
            ));
            // Skip the first tick which fires immediately (loaded at startup)
            interval.tick().await;

            loop {
                interval.tick().await;
                refresh_self.refresh_schedule().await;
            }
        });

        let cycle_self = self.clone();
        let cycle_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                cycle_self.config.evaluation_interval_secs.max(1),
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                cycle_self.run_cycle().await;
            }
        });

        // Both loops run forever
        let (refresh, cycle) = tokio::join!(refresh_handle, cycle_handle);
        if let Err(e) = refresh {
            error!(error = %e, "Schedule refresh loop ended");
        }
        if let Err(e) = cycle {
            error!(error = %e, "Evaluation loop ended");
        }
    }

    /// Reload the schedule off the async runtime. A failed load keeps the
    /// current snapshot.
    async fn refresh_schedule(&self) {
        let store = self.schedule.clone();
        let directory = self.config.schedule.directory.clone();

        match tokio::task::spawn_blocking(move || store.reload(&directory)).await {
            Ok(Ok(snapshot)) => info!(loaded_at = %snapshot.loaded_at(), "Schedule refreshed"),
            Ok(Err(e)) => warn!(error = %e, "Schedule refresh failed, keeping previous snapshot"),
            Err(e) => warn!(error = %e, "Schedule refresh task failed, keeping previous snapshot"),
        }
    }

    async fn fetch_or_warn(&self, kind: FeedKind) -> Option<FeedMessage> {
        match self.feeds.fetch(kind).await {
            Ok(feed) => Some(feed),
            Err(e) => {
                warn!(feed = %kind, error = %e, "Feed unavailable this cycle");
                None
            }
        }
    }

    /// One evaluation cycle: fetch alerts and positions, evaluate against a
    /// single schedule snapshot and publish the report
    pub async fn run_cycle(&self) {
        let snapshot = self.schedule.snapshot();

        let (alerts, positions) = tokio::join!(
            self.fetch_or_warn(FeedKind::Alerts),
            self.fetch_or_warn(FeedKind::VehiclePositions)
        );

        let now = Utc::now().with_timezone(&self.config.timezone);
        let report = build_report(CycleInputs {
            snapshot: &snapshot,
            config: &self.config,
            now,
            alerts: alerts.as_ref(),
            positions: positions.as_ref(),
        });

        info!(
            period = %report.period,
            termini = report.termini.len(),
            alerts_available = report.alerts_available,
            vehicles = report.vehicles.map(|v| v.total()),
            routes_operating_today = report.routes_operating_today,
            "Evaluation cycle complete"
        );

        *self.reports.write().await = Some(report);
    }
}
