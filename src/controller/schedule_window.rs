use chrono::DateTime;
use chrono_tz::Tz;
use std::sync::Arc;

use crate::clock::Clock;
use crate::domain::{Device, Season};
use crate::store::ScheduleStore;

/// Decides whether a device's seasonal time window is currently open.
pub struct ScheduleWindowMatcher {
    store: Arc<ScheduleStore>,
    clock: Arc<dyn Clock>,
}

impl ScheduleWindowMatcher {
    pub fn new(store: Arc<ScheduleStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn is_active(&self, device: Device) -> bool {
        self.is_active_at(device, &self.clock.now())
    }

    /// Missing or unparseable windows count as inactive.
    pub fn is_active_at(&self, device: Device, now: &DateTime<Tz>) -> bool {
        let season = Season::at(now);
        self.store
            .effective()
            .window(device, season)
            .map(|window| window.contains(now.time()))
            .unwrap_or(false)
    }
}
