use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::decision::{BoilerTuning, Decision, Reason, WallboxTuning};
use super::schedule_window::ScheduleWindowMatcher;
use super::state::SchedulerState;
use crate::clock::Clock;
use crate::domain::{BoilerAction, BoilerRelay, Device, SystemMode, Wallbox};
use crate::error::ControlError;
use crate::events::{EventLevel, EventSink};
use crate::forecast::{PriceStatisticsCache, PriceStats, PvForecastEvaluator};
use crate::power_flow::PvSurplusEvaluator;
use crate::repo::MeasurementRepository;
use crate::store::{AutomaticConfigStore, ModeStore, ScheduleStore};

/// Collaborators the scheduler reads from and drives.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub clock: Arc<dyn Clock>,
    pub mode: Arc<ModeStore>,
    pub schedule: Arc<ScheduleStore>,
    pub automatic: Arc<AutomaticConfigStore>,
    pub boiler: Arc<dyn BoilerRelay>,
    pub wallbox: Arc<dyn Wallbox>,
    pub repo: Arc<dyn MeasurementRepository>,
    pub surplus: Arc<PvSurplusEvaluator>,
    pub forecast: Arc<PvForecastEvaluator>,
    pub prices: Arc<PriceStatisticsCache>,
    pub events: Arc<dyn EventSink>,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub boiler: BoilerTuning,
    pub wallbox: WallboxTuning,
    /// Minimum gap between two error logs for the same device.
    pub error_log_cooldown: Duration,
    /// Older measurements count as missing. Zero disables the check.
    pub max_sample_age: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            boiler: BoilerTuning::default(),
            wallbox: WallboxTuning::default(),
            error_log_cooldown: Duration::days(1),
            max_sample_age: Duration::minutes(15),
        }
    }
}

/// Tick bookkeeping
#[derive(Debug, Clone, Default)]
pub struct TickStatus {
    pub last_run: Option<DateTime<Tz>>,
    pub last_mode: Option<SystemMode>,
    pub run_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
}

/// Decision engine: reads the mode on every tick and runs the matching pass.
pub struct Scheduler {
    pub(super) deps: SchedulerDeps,
    pub(super) settings: SchedulerSettings,
    pub(super) state: SchedulerState,
    pub(super) windows: ScheduleWindowMatcher,
    status: TickStatus,
}

impl Scheduler {
    pub fn new(deps: SchedulerDeps, settings: SchedulerSettings) -> Self {
        let windows = ScheduleWindowMatcher::new(deps.schedule.clone(), deps.clock.clone());
        let state = SchedulerState::new(settings.error_log_cooldown);
        Self {
            deps,
            settings,
            state,
            windows,
            status: TickStatus::default(),
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn status(&self) -> &TickStatus {
        &self.status
    }

    pub fn windows(&self) -> &ScheduleWindowMatcher {
        &self.windows
    }

    /// Poll loop. The sleep starts after a tick finishes, so ticks never
    /// overlap. Returns once `shutdown` fires between two ticks.
    pub async fn run(mut self, interval: std::time::Duration, shutdown: CancellationToken) -> Self {
        info!(interval_secs = interval.as_secs(), "scheduler started");
        while !shutdown.is_cancelled() {
            self.tick().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!(ticks = self.status.run_count, "scheduler stopped");
        self
    }

    /// One decision round. Never fails: panics inside a pass are caught here
    /// and reported as a system error.
    pub async fn tick(&mut self) {
        let now = self.deps.clock.now();
        let mode = self.deps.mode.get();
        if self.status.last_mode != Some(mode) {
            info!(%mode, previous = ?self.status.last_mode, "system mode active");
            self.status.last_mode = Some(mode);
        }
        self.status.last_run = Some(now);
        self.status.run_count += 1;

        let outcome = AssertUnwindSafe(self.run_mode(mode)).catch_unwind().await;
        if let Err(panic) = outcome {
            let message = format!("{mode} scheduler error: {}", panic_message(panic.as_ref()));
            error!(%mode, error = %message, "scheduler tick failed");
            self.deps
                .events
                .system_event(now.with_timezone(&Utc), EventLevel::Error, "scheduler", &message);
            self.status.error_count += 1;
            self.status.last_error = Some(message);
        }
    }

    async fn run_mode(&mut self, mode: SystemMode) {
        match mode {
            SystemMode::Manual => self.observe_wallbox().await,
            SystemMode::TimeControlled => self.run_time_controlled().await,
            SystemMode::Automatic => self.run_automatic().await,
        }
    }

    /// Run one device's pass with panics turned into an error, so the other
    /// device is still evaluated.
    pub(super) async fn isolated<F>(pass: F) -> Result<(), ControlError>
    where
        F: Future<Output = Result<(), ControlError>>,
    {
        match AssertUnwindSafe(pass).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(ControlError::Internal(panic_message(panic.as_ref()))),
        }
    }

    /// Expected conditions are dropped quietly; real failures are logged at
    /// most once per device and cooldown.
    pub(super) fn report(&mut self, device: Device, source: &str, result: Result<(), ControlError>) {
        let Err(err) = result else { return };
        if err.is_silent() {
            debug!(%device, %source, reason = %err, "device skipped this tick");
            return;
        }

        let now = self.deps.clock.now();
        if self.state.device_errors.should_log(device, &now) {
            error!(%device, %source, error = %err, "device pass failed");
            self.deps.events.system_event(
                now.with_timezone(&Utc),
                EventLevel::Error,
                source,
                &format!("{source} {device} error: {err}"),
            );
        } else {
            debug!(%device, %source, error = %err, "device error suppressed");
        }
    }

    /// Switch the boiler relay and record the transition.
    pub(super) async fn switch_boiler(&self, was_on: bool, decision: &Decision) -> Result<(), ControlError> {
        let action = BoilerAction::switch_to(decision.on);
        let result = self
            .deps
            .boiler
            .control(action)
            .await
            .map_err(|e| ControlError::unreachable(Device::Boiler, e))?;

        info!(device = %Device::Boiler, %action, reason = %decision.reason, "boiler switched");
        let at = self.event_time();
        self.deps.events.control_decision(
            at,
            Device::Boiler,
            &action.to_string(),
            decision.reason.as_ref(),
            true,
            decision.extra.clone(),
        );
        self.deps
            .events
            .device_state_change(at, Device::Boiler, was_on, result.heating);
        Ok(())
    }

    /// Send an allow flag to the wallbox and record the transition.
    /// `baseline` is what the wallbox was believed to be doing before.
    pub(super) async fn command_wallbox(&self, baseline: Option<bool>, decision: &Decision) -> Result<(), ControlError> {
        let allow = decision.on;
        self.deps
            .wallbox
            .set_allow_charging(allow)
            .await
            .map_err(|e| ControlError::unreachable(Device::Wallbox, e))?;

        info!(device = %Device::Wallbox, allow, reason = %decision.reason, "wallbox allow flag set");
        let mut extra = decision.extra.clone();
        if extra.is_null() {
            extra = json!({ "allow": allow });
        }
        let at = self.event_time();
        self.deps.events.control_decision(
            at,
            Device::Wallbox,
            "set_allow",
            decision.reason.as_ref(),
            true,
            extra,
        );
        match baseline {
            Some(old) => self.deps.events.device_state_change(at, Device::Wallbox, old, allow),
            None => debug!(device = %Device::Wallbox, allow, "previous allow state unknown, no state change recorded"),
        }
        Ok(())
    }

    /// Event timestamp from the injected clock.
    pub(super) fn event_time(&self) -> DateTime<Utc> {
        self.deps.clock.now().with_timezone(&Utc)
    }

    pub(super) fn last_reason_mut(&mut self, device: Device) -> &mut Option<Reason> {
        match device {
            Device::Boiler => &mut self.state.boiler_last_reason,
            Device::Wallbox => &mut self.state.wallbox_last_reason,
        }
    }

    /// A decision that changes nothing is only worth a record when it is a
    /// forecast wait following some other reason.
    pub(super) fn note_unchanged(&mut self, device: Device, decision: &Decision) {
        let last = self.last_reason_mut(device);
        let repeated = *last == Some(decision.reason);
        *last = Some(decision.reason);
        if decision.reason == Reason::ForecastWait && !repeated {
            self.deps.events.control_decision(
                self.event_time(),
                device,
                "wait",
                decision.reason.as_ref(),
                true,
                decision.extra.clone(),
            );
        }
    }

    pub(super) fn log_price_diagnostics(&mut self, device: Device, now: &DateTime<Tz>, prices: &PriceStats) {
        if !self.state.price_log.should_log(device, now) {
            return;
        }
        match &prices.error {
            Some(err) => warn!(
                %device,
                error = %err,
                data_points = prices.data_points,
                "price statistics unavailable"
            ),
            None => info!(
                %device,
                current = ?prices.current,
                threshold = ?prices.threshold,
                emergency_threshold = ?prices.emergency_threshold,
                is_cheap = prices.is_cheap,
                is_emergency_cheap = prices.is_emergency_cheap,
                data_points = prices.data_points,
                "price statistics"
            ),
        }
    }

    pub(super) fn log_forecast_override(
        &mut self,
        device: Device,
        now: &DateTime<Tz>,
        decision: &Decision,
        prices: &PriceStats,
    ) {
        if decision.reason == Reason::ForecastWait
            && prices.is_cheap
            && self.state.forecast_override_log.should_log(device, now)
        {
            info!(
                %device,
                current = ?prices.current,
                threshold = ?prices.threshold,
                "cheap grid price ignored, PV expected"
            );
        }
    }

    pub(super) async fn read_surplus(&self, device: Device) -> Option<f64> {
        match self.deps.surplus.get_surplus_kw().await {
            Ok(kw) => Some(kw),
            Err(e) if e.is_silent() => {
                debug!(%device, reason = %e, "pv surplus unavailable");
                None
            }
            Err(e) => {
                warn!(%device, error = %e, "pv surplus query failed");
                None
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::{AutomaticConfig, ScheduleConfig, SimulatedBoiler, SimulatedWallbox};
    use crate::events::MemoryEventSink;
    use crate::forecast::{GeoLocation, PriceSettings, WeatherSeries, WeatherSource};
    use crate::repo::InMemoryMeasurementRepository;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use chrono_tz::Europe::Vienna;

    struct NoWeather;

    #[async_trait]
    impl WeatherSource for NoWeather {
        async fn fetch_hourly_cloud_cover_and_sun_times(
            &self,
            _location: &GeoLocation,
        ) -> anyhow::Result<WeatherSeries> {
            anyhow::bail!("offline")
        }

        fn name(&self) -> &'static str {
            "none"
        }
    }

    /// Relay whose state query panics.
    struct PanickingBoiler;

    #[async_trait]
    impl BoilerRelay for PanickingBoiler {
        async fn is_on(&self) -> anyhow::Result<bool> {
            panic!("relay driver bug")
        }

        async fn control(&self, _action: BoilerAction) -> anyhow::Result<crate::domain::BoilerCommandResult> {
            panic!("relay driver bug")
        }
    }

    fn scheduler(mode: SystemMode, boiler: Arc<dyn BoilerRelay>) -> (Scheduler, Arc<MemoryEventSink>, Arc<SimulatedWallbox>) {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(
            Vienna.with_ymd_and_hms(2025, 1, 15, 23, 0, 0).unwrap(),
        ));
        let repo = Arc::new(InMemoryMeasurementRepository::new(clock.clone()));
        let events = Arc::new(MemoryEventSink::new());
        let wallbox = Arc::new(SimulatedWallbox::default());
        let location = GeoLocation {
            latitude: 47.2849,
            longitude: 12.8231,
            name: None,
        };
        let deps = SchedulerDeps {
            clock: clock.clone(),
            mode: Arc::new(ModeStore::in_memory(mode)),
            schedule: Arc::new(ScheduleStore::in_memory(ScheduleConfig::factory_default())),
            automatic: Arc::new(AutomaticConfigStore::in_memory(AutomaticConfig::default())),
            boiler,
            wallbox: wallbox.clone(),
            repo: repo.clone(),
            surplus: Arc::new(PvSurplusEvaluator::new(repo.clone(), clock.clone(), Duration::minutes(15))),
            forecast: Arc::new(PvForecastEvaluator::new(Arc::new(NoWeather), location, clock.clone())),
            prices: Arc::new(PriceStatisticsCache::new(repo, clock, PriceSettings::default())),
            events: events.clone(),
        };
        (Scheduler::new(deps, SchedulerSettings::default()), events, wallbox)
    }

    #[tokio::test]
    async fn test_manual_mode_does_nothing() {
        let boiler = Arc::new(SimulatedBoiler::default());
        let (mut scheduler, events, wallbox) = scheduler(SystemMode::Manual, boiler.clone());
        scheduler.tick().await;
        assert!(boiler.commands().await.is_empty());
        assert!(wallbox.allow_commands().await.is_empty());
        assert!(events.events().is_empty());
        assert_eq!(scheduler.status().run_count, 1);
    }

    #[tokio::test]
    async fn test_panicking_boiler_does_not_block_wallbox() {
        let (mut scheduler, events, wallbox) = scheduler(SystemMode::TimeControlled, Arc::new(PanickingBoiler));
        // 23:00 in January: winter wallbox window 22:00-06:00 is open
        scheduler.tick().await;

        assert_eq!(wallbox.allow_commands().await, vec![true]);
        let errors = events.system_events(EventLevel::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "time_controlled");
        assert!(errors[0].1.contains("relay driver bug"));

        // the same failure on the next tick stays quiet
        scheduler.tick().await;
        assert_eq!(events.system_events(EventLevel::Error).len(), 1);
        assert_eq!(scheduler.status().error_count, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let boiler = Arc::new(SimulatedBoiler::default());
        let (scheduler, _events, _wallbox) = scheduler(SystemMode::Manual, boiler);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(std::time::Duration::from_millis(10), shutdown.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(35)).await;
        shutdown.cancel();
        let scheduler = handle.await.unwrap();
        assert!(scheduler.status().run_count >= 1);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
