use chrono::{DateTime, Duration, NaiveDate, Timelike};
use chrono_tz::Tz;
use std::collections::HashMap;

use super::decision::Reason;
use crate::domain::Device;

/// One car-connect interval at the wallbox.
#[derive(Debug, Clone, PartialEq)]
pub struct WallboxSession {
    pub started_at: DateTime<Tz>,
    /// Lifetime counter when the car was plugged in, Wh.
    pub eto_start_wh: f64,
    pub finished: bool,
    /// Last allow flag this controller sent; firmware may reset the reported
    /// flag on its own, so this is tracked separately.
    pub last_commanded_allow: Option<bool>,
}

impl WallboxSession {
    pub fn start(now: DateTime<Tz>, eto_wh: f64) -> Self {
        Self {
            started_at: now,
            eto_start_wh: eto_wh,
            finished: false,
            last_commanded_allow: None,
        }
    }

    pub fn charged_kwh(&self, eto_now_wh: f64) -> f64 {
        ((eto_now_wh - self.eto_start_wh) / 1000.0).max(0.0)
    }
}

/// Allows one log line per device and calendar hour.
#[derive(Debug, Default)]
pub struct HourlyThrottle {
    last: HashMap<Device, (NaiveDate, u32)>,
}

impl HourlyThrottle {
    pub fn should_log(&mut self, device: Device, now: &DateTime<Tz>) -> bool {
        let hour = (now.date_naive(), now.hour());
        if self.last.get(&device) == Some(&hour) {
            return false;
        }
        self.last.insert(device, hour);
        true
    }
}

/// Allows one log line per device and `interval`.
#[derive(Debug)]
pub struct IntervalThrottle {
    interval: Duration,
    last: HashMap<Device, DateTime<Tz>>,
}

impl IntervalThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: HashMap::new(),
        }
    }

    pub fn should_log(&mut self, device: Device, now: &DateTime<Tz>) -> bool {
        match self.last.get(&device) {
            Some(last) if *now - *last < self.interval => false,
            _ => {
                self.last.insert(device, *now);
                true
            }
        }
    }
}

/// Mutable state carried from one tick to the next. Owned by the scheduler
/// and only touched from its tick.
#[derive(Debug)]
pub struct SchedulerState {
    pub boiler_last_reason: Option<Reason>,
    pub wallbox_last_reason: Option<Reason>,
    pub wallbox_session: Option<WallboxSession>,
    pub price_log: HourlyThrottle,
    pub forecast_override_log: IntervalThrottle,
    pub device_errors: IntervalThrottle,
}

impl SchedulerState {
    pub fn new(error_log_cooldown: Duration) -> Self {
        Self {
            boiler_last_reason: None,
            wallbox_last_reason: None,
            wallbox_session: None,
            price_log: HourlyThrottle::default(),
            forecast_override_log: IntervalThrottle::new(Duration::hours(2)),
            device_errors: IntervalThrottle::new(error_log_cooldown),
        }
    }
}
