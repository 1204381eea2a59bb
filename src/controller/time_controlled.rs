//! TIME_CONTROLLED pass: devices follow their seasonal windows.

use serde_json::json;
use tracing::debug;

use super::decision::{Decision, Reason};
use super::scheduler::Scheduler;
use crate::domain::{Device, Season};
use crate::error::ControlError;

const SOURCE: &str = "time_controlled";

impl Scheduler {
    pub(super) async fn run_time_controlled(&mut self) {
        let boiler = Self::isolated(self.time_controlled_boiler()).await;
        self.report(Device::Boiler, SOURCE, boiler);

        let wallbox = Self::isolated(self.time_controlled_wallbox()).await;
        self.report(Device::Wallbox, SOURCE, wallbox);
    }

    async fn time_controlled_boiler(&mut self) -> Result<(), ControlError> {
        let relay_on = self
            .deps
            .boiler
            .is_on()
            .await
            .map_err(|e| ControlError::unreachable(Device::Boiler, e))?;
        let should_on = self.windows.is_active(Device::Boiler);
        if should_on == relay_on {
            return Ok(());
        }

        let mut decision = Decision::new(should_on, Reason::TimeControlledSchedule);
        decision.extra = json!({ "window_active": should_on });
        self.switch_boiler(relay_on, &decision).await
    }

    async fn time_controlled_wallbox(&mut self) -> Result<(), ControlError> {
        let Some(telemetry) = self.read_wallbox().await? else {
            return Ok(());
        };
        let now = self.deps.clock.now();
        let target_kwh = self.deps.automatic.get().wallbox(Season::at(&now)).energy_kwh;
        self.track_session(&now, &telemetry, target_kwh);

        // Never command against an indeterminate baseline.
        let Some(current) = telemetry.allow else {
            debug!("wallbox allow state unknown, skipping");
            return Ok(());
        };

        let allow = self.windows.is_active(Device::Wallbox);
        if allow == current {
            return Ok(());
        }

        let mut decision = Decision::new(allow, Reason::TimeControlledSchedule);
        decision.extra = json!({ "allow": allow });
        self.command_wallbox(Some(current), &decision).await?;
        if let Some(session) = self.state.wallbox_session.as_mut() {
            session.last_commanded_allow = Some(allow);
        }
        Ok(())
    }
}
