use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{parse_time_of_day, Device, Season};

/// A local time-of-day window, kept as the operator typed it.
///
/// Parsing happens at evaluation time so a malformed entry only makes the
/// window inactive instead of poisoning the whole schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub start: String,
    pub end: String,
}

impl ScheduleWindow {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Whether `now` falls inside the window.
    ///
    /// `start == end` is the "no window" sentinel and never matches;
    /// `start > end` wraps past midnight. Both bounds are inclusive.
    pub fn contains(&self, now: NaiveTime) -> bool {
        let (Some(start), Some(end)) = (parse_time_of_day(&self.start), parse_time_of_day(&self.end))
        else {
            return false;
        };

        if start == end {
            return false;
        }
        if start < end {
            start <= now && now <= end
        } else {
            now >= start || now <= end
        }
    }
}

/// Windows per device and season.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleConfig(pub BTreeMap<Device, BTreeMap<Season, ScheduleWindow>>);

impl ScheduleConfig {
    pub fn window(&self, device: Device, season: Season) -> Option<&ScheduleWindow> {
        self.0.get(&device).and_then(|seasons| seasons.get(&season))
    }

    pub fn set(&mut self, device: Device, season: Season, window: ScheduleWindow) {
        self.0.entry(device).or_default().insert(season, window);
    }

    /// Overlay `other` on top of `self`: every (device, season) window present
    /// in `other` replaces ours, everything else is kept.
    pub fn overlay(&mut self, other: &ScheduleConfig) {
        for (device, seasons) in &other.0 {
            for (season, window) in seasons {
                self.set(*device, *season, window.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|s| s.is_empty())
    }

    /// Factory windows: boiler around midday, wallbox overnight in winter.
    pub fn factory_default() -> Self {
        let mut cfg = Self::default();
        cfg.set(Device::Boiler, Season::Summer, ScheduleWindow::new("10:00", "16:00"));
        cfg.set(Device::Boiler, Season::Winter, ScheduleWindow::new("11:00", "14:00"));
        cfg.set(Device::Wallbox, Season::Summer, ScheduleWindow::new("10:00", "17:00"));
        cfg.set(Device::Wallbox, Season::Winter, ScheduleWindow::new("22:00", "06:00"));
        cfg
    }
}
