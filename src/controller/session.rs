//! Wallbox charging-session bookkeeping, shared by every mode.

use chrono::DateTime;
use chrono_tz::Tz;
use serde_json::json;
use tracing::{debug, info};

use super::scheduler::Scheduler;
use super::state::WallboxSession;
use crate::domain::{round2, Device, Season, WallboxTelemetry};
use crate::error::ControlError;

impl Scheduler {
    /// Wallbox telemetry, or `None` when the box reports itself offline.
    pub(super) async fn read_wallbox(&self) -> Result<Option<WallboxTelemetry>, ControlError> {
        if !self.deps.wallbox.is_online().await {
            debug!("wallbox offline, skipping");
            return Ok(None);
        }
        self.deps
            .wallbox
            .telemetry()
            .await
            .map(Some)
            .map_err(|e| ControlError::unreachable(Device::Wallbox, e))
    }

    /// Open a session on plug-in and close it on unplug, whatever the mode.
    pub(super) fn track_session(&mut self, now: &DateTime<Tz>, telemetry: &WallboxTelemetry, target_kwh: f64) {
        match (telemetry.car_connected, self.state.wallbox_session.is_some()) {
            (true, false) => {
                self.state.wallbox_session = Some(self.start_session(now, telemetry));
            }
            (false, true) => {
                if let Some(session) = self.state.wallbox_session.take() {
                    self.end_session(&session, now, telemetry, target_kwh);
                }
                self.state.wallbox_last_reason = None;
            }
            _ => {}
        }
    }

    /// MANUAL leaves the devices alone but still follows plug-in/unplug, so a
    /// car swapped meanwhile gets a fresh session.
    pub(super) async fn observe_wallbox(&mut self) {
        let telemetry = match self.read_wallbox().await {
            Ok(Some(telemetry)) => telemetry,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "wallbox telemetry unavailable in manual mode");
                return;
            }
        };
        let now = self.deps.clock.now();
        let target_kwh = self.deps.automatic.get().wallbox(Season::at(&now)).energy_kwh;
        self.track_session(&now, &telemetry, target_kwh);
    }

    fn start_session(&self, now: &DateTime<Tz>, telemetry: &WallboxTelemetry) -> WallboxSession {
        info!(device = %Device::Wallbox, eto_start_wh = telemetry.eto_wh, "charging session started");
        self.deps.events.control_decision(
            self.event_time(),
            Device::Wallbox,
            "session_start",
            "car_connected",
            true,
            json!({ "eto_start_wh": telemetry.eto_wh }),
        );
        WallboxSession::start(*now, telemetry.eto_wh)
    }

    fn end_session(&self, session: &WallboxSession, now: &DateTime<Tz>, telemetry: &WallboxTelemetry, target_kwh: f64) {
        let charged_kwh = round2(session.charged_kwh(telemetry.eto_wh));
        let success = charged_kwh >= target_kwh;
        let duration_min = (*now - session.started_at).num_minutes();
        info!(
            device = %Device::Wallbox,
            charged_kwh,
            target_kwh,
            success,
            duration_min,
            "charging session ended"
        );
        self.deps.events.control_decision(
            self.event_time(),
            Device::Wallbox,
            "session_end",
            "car_disconnected",
            success,
            json!({
                "charged_kwh": charged_kwh,
                "target_kwh": target_kwh,
                "duration_min": duration_min,
            }),
        );
    }
}
