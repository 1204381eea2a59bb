use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

// ============================================================================
// Operating mode
// ============================================================================

/// Process-wide operating mode, read by the scheduler on every tick.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemMode {
    /// Devices are only driven through the manual API.
    Manual,
    /// Devices follow the seasonal start/end windows.
    TimeControlled,
    /// PV surplus, forecast and price driven decisions.
    #[default]
    Automatic,
}

// ============================================================================
// Devices & seasons
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Device {
    Boiler,
    Wallbox,
}

impl Device {
    pub const ALL: [Device; 2] = [Device::Boiler, Device::Wallbox];
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Season {
    Summer,
    Winter,
}

impl Season {
    /// April through September is summer, everything else winter.
    pub fn from_month(month: u32) -> Self {
        if (4..=9).contains(&month) {
            Season::Summer
        } else {
            Season::Winter
        }
    }

    pub fn at<T: TimeZone>(now: &DateTime<T>) -> Self {
        Self::from_month(now.month())
    }
}

// ============================================================================
// Time helpers
// ============================================================================

/// Parse an operator supplied "HH:MM" time of day.
///
/// Anything else (missing colon, out of range, trailing seconds) yields `None`
/// so callers can fall back to their safe default.
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    let (h, m) = value.trim().split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Next occurrence of `target` local time strictly after `now`.
///
/// Today's occurrence is used unless it is not in the future, in which case the
/// deadline rolls over to tomorrow. Local times that fall into a DST gap resolve
/// to the first valid instant after the gap.
pub fn next_deadline(now: &DateTime<Tz>, target: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = localize(&tz, now.date_naive().and_time(target));
    if today > *now {
        return today;
    }
    let tomorrow = now.date_naive() + Duration::days(1);
    localize(&tz, tomorrow.and_time(target))
}

fn localize(tz: &Tz, naive: chrono::NaiveDateTime) -> DateTime<Tz> {
    let mut probe = naive;
    // DST gaps are at most a couple of hours; walk forward until valid.
    for _ in 0..(4 * 60) {
        if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
            return dt;
        }
        probe += Duration::minutes(1);
    }
    tz.from_utc_datetime(&naive)
}

/// Minutes between `now` and `deadline` (fractional).
pub fn minutes_until(now: &DateTime<Tz>, deadline: &DateTime<Tz>) -> f64 {
    (*deadline - *now).num_seconds() as f64 / 60.0
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
