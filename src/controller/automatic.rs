//! AUTOMATIC pass: surplus, forecast and price driven decisions.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::json;
use tracing::{debug, info};

use super::decision::{decide_boiler, decide_wallbox, BoilerInputs, Decision, Reason, WallboxInputs};
use super::scheduler::Scheduler;
use super::state::WallboxSession;
use crate::domain::{
    minutes_until, next_deadline, parse_time_of_day, round2, BoilerSettings, Device, Season,
    WallboxSettings, WallboxTelemetry,
};
use crate::error::ControlError;
use crate::power_flow::surplus::ensure_fresh;

const SOURCE: &str = "automatic";

impl Scheduler {
    pub(super) async fn run_automatic(&mut self) {
        // One consistent snapshot for the whole pass.
        let config = self.deps.automatic.get();
        let now = self.deps.clock.now();
        let season = Season::at(&now);

        let boiler = Self::isolated(self.automatic_boiler(&now, config.boiler(season))).await;
        self.report(Device::Boiler, SOURCE, boiler);

        let wallbox = Self::isolated(self.automatic_wallbox(&now, config.wallbox(season))).await;
        self.report(Device::Wallbox, SOURCE, wallbox);
    }

    async fn automatic_boiler(&mut self, now: &DateTime<Tz>, settings: &BoilerSettings) -> Result<(), ControlError> {
        if !settings.enabled {
            return Ok(());
        }
        let (Some(target_time), Some(target_temp_c)) = (settings.target_time.as_deref(), settings.target_temp_c)
        else {
            return Err(ControlError::ConfigIncomplete(
                "boiler target_time or target_temp_c unset".to_string(),
            ));
        };
        let target = parse_time_of_day(target_time).ok_or_else(|| {
            ControlError::ConfigIncomplete(format!("boiler target_time {target_time:?} unparseable"))
        })?;

        let sample = self
            .deps
            .repo
            .latest_boiler_temp()
            .await
            .map_err(|e| ControlError::Storage(format!("{e:#}")))?
            .ok_or_else(|| ControlError::DataUnavailable("no boiler temperature".to_string()))?;
        ensure_fresh(
            sample.measured_at,
            now.with_timezone(&Utc),
            self.settings.max_sample_age,
            "boiler temperature",
        )?;

        let relay_on = self
            .deps
            .boiler
            .is_on()
            .await
            .map_err(|e| ControlError::unreachable(Device::Boiler, e))?;

        let deadline = next_deadline(now, target);
        let remaining_min = minutes_until(now, &deadline);

        let pv_surplus_kw = self.read_surplus(Device::Boiler).await;
        let forecast = self.deps.forecast.get_forecast().await;
        let prices = self.deps.prices.get_price_statistics().await;
        self.log_price_diagnostics(Device::Boiler, now, &prices);

        let decision = decide_boiler(
            &BoilerInputs {
                current_temp_c: sample.celsius,
                target_temp_c,
                relay_on,
                remaining_min,
                min_runtime_min: settings.min_runtime_min,
                pv_surplus_kw,
                forecast: &forecast,
                prices: &prices,
            },
            &self.settings.boiler,
        );
        debug!(
            device = %Device::Boiler,
            on = decision.on,
            reason = %decision.reason,
            current_temp_c = sample.celsius,
            remaining_min,
            "boiler decision"
        );
        self.log_forecast_override(Device::Boiler, now, &decision, &prices);

        if decision.on != relay_on {
            self.switch_boiler(relay_on, &decision).await?;
            self.state.boiler_last_reason = Some(decision.reason);
        } else {
            self.note_unchanged(Device::Boiler, &decision);
        }
        Ok(())
    }

    async fn automatic_wallbox(&mut self, now: &DateTime<Tz>, settings: &WallboxSettings) -> Result<(), ControlError> {
        let Some(telemetry) = self.read_wallbox().await? else {
            return Ok(());
        };
        self.track_session(now, &telemetry, settings.energy_kwh);
        if !settings.enabled || !telemetry.car_connected {
            return Ok(());
        }

        let Some(mut session) = self.state.wallbox_session.take() else {
            return Ok(());
        };
        let result = self.drive_session(&mut session, now, settings, &telemetry).await;
        self.state.wallbox_session = Some(session);
        result
    }

    async fn drive_session(
        &mut self,
        session: &mut WallboxSession,
        now: &DateTime<Tz>,
        settings: &WallboxSettings,
        telemetry: &WallboxTelemetry,
    ) -> Result<(), ControlError> {
        let target_kwh = settings.energy_kwh;
        let charged_kwh = session.charged_kwh(telemetry.eto_wh);
        let baseline = session.last_commanded_allow.or(telemetry.allow);

        if charged_kwh >= target_kwh {
            if !session.finished {
                let mut decision = Decision::new(false, Reason::SessionComplete);
                decision.extra = json!({
                    "allow": false,
                    "charged_kwh": round2(charged_kwh),
                    "target_kwh": target_kwh,
                });
                self.command_wallbox(baseline, &decision).await?;
                session.last_commanded_allow = Some(false);
                session.finished = true;
                self.state.wallbox_last_reason = Some(Reason::SessionComplete);
            }
            return Ok(());
        }
        if session.finished {
            info!(device = %Device::Wallbox, charged_kwh, target_kwh, "charge target raised, session resumed");
            session.finished = false;
        }

        let remaining_hours = settings
            .target_time
            .as_deref()
            .and_then(parse_time_of_day)
            .map(|target| minutes_until(now, &next_deadline(now, target)) / 60.0);

        let pv_surplus_kw = self.read_surplus(Device::Wallbox).await;
        let forecast = self.deps.forecast.get_forecast().await;
        let prices = self.deps.prices.get_price_statistics().await;
        self.log_price_diagnostics(Device::Wallbox, now, &prices);

        let decision = decide_wallbox(
            &WallboxInputs {
                pv_surplus_kw,
                forecast: &forecast,
                prices: &prices,
                remaining_hours,
                allow_night_grid: settings.allow_night_grid,
                charged_kwh,
                target_kwh,
            },
            &self.settings.wallbox,
        );
        debug!(
            device = %Device::Wallbox,
            allow = decision.on,
            reason = %decision.reason,
            charged_kwh,
            "wallbox decision"
        );
        self.log_forecast_override(Device::Wallbox, now, &decision, &prices);

        if baseline != Some(decision.on) {
            self.command_wallbox(baseline, &decision).await?;
            session.last_commanded_allow = Some(decision.on);
            self.state.wallbox_last_reason = Some(decision.reason);
        } else {
            self.note_unchanged(Device::Wallbox, &decision);
        }
        Ok(())
    }
}
