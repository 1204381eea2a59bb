pub mod automatic;
pub mod decision;
pub mod schedule_window;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod time_controlled;

use anyhow::Result;
use chrono::Duration;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::domain::{AutomaticConfig, BoilerRelay, ScheduleConfig, SimulatedBoiler, SimulatedWallbox, Wallbox};
use crate::events::{EventSink, FanoutEventSink, MemoryEventSink, TracingEventSink};
use crate::forecast::{OpenMeteoClient, PriceStatisticsCache, PvForecastEvaluator, WeatherSource};
use crate::power_flow::PvSurplusEvaluator;
use crate::repo::{InMemoryMeasurementRepository, MeasurementRepository};
use crate::store::{AutomaticConfigStore, JsonFile, ModeStore, ScheduleStore};

pub use decision::{decide_boiler, decide_wallbox, BoilerTuning, Decision, Reason, WallboxTuning};
pub use schedule_window::ScheduleWindowMatcher;
pub use scheduler::{Scheduler, SchedulerDeps, SchedulerSettings, TickStatus};
pub use state::{SchedulerState, WallboxSession};

/// Everything the host process shares between the scheduler and the
/// manual-control path.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub clock: Arc<dyn Clock>,
    pub mode: Arc<ModeStore>,
    pub schedule: Arc<ScheduleStore>,
    pub automatic: Arc<AutomaticConfigStore>,
    pub boiler: Arc<dyn BoilerRelay>,
    pub wallbox: Arc<dyn Wallbox>,
    pub measurements: Arc<InMemoryMeasurementRepository>,
    pub forecast: Arc<PvForecastEvaluator>,
    pub prices: Arc<PriceStatisticsCache>,
    pub recent_events: Arc<MemoryEventSink>,
    pub events: Arc<dyn EventSink>,
}

impl AppState {
    /// Wire the engine from configuration with simulated devices and the
    /// in-memory measurement store.
    pub fn new(cfg: Config) -> Result<Self> {
        let tz = cfg.controller.tz()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(tz));
        let weather: Arc<dyn WeatherSource> = Arc::new(OpenMeteoClient::new(
            cfg.forecast.base_url.clone(),
            tz,
            std::time::Duration::from_secs(cfg.forecast.http_timeout_seconds),
        )?);
        Ok(Self::with_parts(
            cfg,
            clock,
            weather,
            Arc::new(SimulatedBoiler::default()),
            Arc::new(SimulatedWallbox::default()),
        ))
    }

    pub fn with_parts(
        cfg: Config,
        clock: Arc<dyn Clock>,
        weather: Arc<dyn WeatherSource>,
        boiler: Arc<dyn BoilerRelay>,
        wallbox: Arc<dyn Wallbox>,
    ) -> Self {
        let file = |name: &str| {
            cfg.stores
                .file(name)
                .map(JsonFile::at)
                .unwrap_or_else(JsonFile::memory)
        };
        let mode = Arc::new(ModeStore::open(file("system_mode.json")));
        let schedule = Arc::new(ScheduleStore::open(
            ScheduleConfig::factory_default(),
            file("schedule.json"),
        ));
        let automatic = Arc::new(AutomaticConfigStore::open(
            AutomaticConfig::default(),
            file("automatic_config.json"),
        ));

        let measurements = Arc::new(
            InMemoryMeasurementRepository::new(clock.clone())
                .with_price_retention(Duration::days(cfg.prices.analysis_days + 1)),
        );
        let forecast = Arc::new(
            PvForecastEvaluator::new(weather, cfg.location.geo(), clock.clone())
                .with_cloud_threshold(cfg.forecast.cloud_threshold_percent)
                .with_cache_ttl(Duration::seconds(cfg.forecast.cache_ttl_seconds)),
        );
        let repo: Arc<dyn MeasurementRepository> = measurements.clone();
        let prices = Arc::new(PriceStatisticsCache::new(
            repo,
            clock.clone(),
            cfg.prices.clone(),
        ));

        let recent_events = Arc::new(MemoryEventSink::new());
        let events: Arc<dyn EventSink> = Arc::new(FanoutEventSink::new(vec![
            Arc::new(TracingEventSink),
            recent_events.clone(),
        ]));

        Self {
            cfg,
            clock,
            mode,
            schedule,
            automatic,
            boiler,
            wallbox,
            measurements,
            forecast,
            prices,
            recent_events,
            events,
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            boiler: self.cfg.boiler,
            wallbox: self.cfg.wallbox,
            error_log_cooldown: Duration::seconds(self.cfg.controller.error_log_cooldown_seconds),
            max_sample_age: Duration::minutes(self.cfg.controller.max_sample_age_minutes),
        }
    }

    pub fn scheduler(&self) -> Scheduler {
        let repo: Arc<dyn MeasurementRepository> = self.measurements.clone();
        let deps = SchedulerDeps {
            clock: self.clock.clone(),
            mode: self.mode.clone(),
            schedule: self.schedule.clone(),
            automatic: self.automatic.clone(),
            boiler: self.boiler.clone(),
            wallbox: self.wallbox.clone(),
            repo: repo.clone(),
            surplus: Arc::new(PvSurplusEvaluator::new(
                repo,
                self.clock.clone(),
                Duration::minutes(self.cfg.controller.max_sample_age_minutes),
            )),
            forecast: self.forecast.clone(),
            prices: self.prices.clone(),
            events: self.events.clone(),
        };
        Scheduler::new(deps, self.scheduler_settings())
    }
}

/// Start the poll loop. The handle resolves once `shutdown` fires.
pub fn spawn_controller_tasks(state: &AppState, shutdown: CancellationToken) -> JoinHandle<()> {
    let scheduler = state.scheduler();
    let interval = std::time::Duration::from_secs(state.cfg.controller.tick_seconds.max(1));
    info!(mode = %state.mode.get(), "spawning scheduler");
    tokio::spawn(async move {
        let scheduler = scheduler.run(interval, shutdown).await;
        let status = scheduler.status();
        if let Some(err) = &status.last_error {
            warn!(error = %err, errors = status.error_count, "scheduler stopped after errors");
        }
    })
}
