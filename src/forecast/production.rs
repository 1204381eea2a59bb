//! PV viability forecast derived from cloud cover.
//!
//! A day counts as "PV possible" when at least one forecast hour between
//! sunrise and sunset is at or below the cloud-cover threshold. For today
//! only the part of the window that still lies ahead is considered.

use chrono::{DateTime, Duration, NaiveDateTime, Timelike};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::weather::{GeoLocation, WeatherSeries, WeatherSource};
use crate::clock::Clock;

pub const DEFAULT_CLOUD_THRESHOLD_PERCENT: f64 = 40.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub pv_today: bool,
    pub pv_tomorrow: bool,
    pub pv_hours_today: u32,
    pub pv_hours_tomorrow: u32,
    /// Local hour with the least cloud cover in the remaining window.
    pub best_hour_today: Option<u32>,
    pub best_hour_tomorrow: Option<u32>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ForecastResult {
    pub fn unavailable(source: &str, error: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// True when PV production is expected today or tomorrow.
    pub fn predicts_pv(&self) -> bool {
        self.pv_today || self.pv_tomorrow
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowScan {
    possible: bool,
    hours: u32,
    best_hour: Option<u32>,
}

impl WindowScan {
    const EMPTY: WindowScan = WindowScan {
        possible: false,
        hours: 0,
        best_hour: None,
    };
}

fn scan(series: &WeatherSeries, start: NaiveDateTime, end: NaiveDateTime, threshold: f64) -> WindowScan {
    let mut hours = 0;
    let mut best: Option<(f64, u32)> = None;
    for point in series
        .hourly
        .iter()
        .filter(|p| p.time >= start && p.time <= end)
    {
        if point.cloud_cover_percent <= threshold {
            hours += 1;
        }
        if best.map_or(true, |(cloud, _)| point.cloud_cover_percent < cloud) {
            best = Some((point.cloud_cover_percent, point.time.hour()));
        }
    }
    WindowScan {
        possible: hours > 0,
        hours,
        best_hour: best.map(|(_, hour)| hour),
    }
}

/// Evaluate a raw weather series at local time `now`.
pub fn evaluate(series: &WeatherSeries, now: &DateTime<Tz>, threshold: f64) -> ForecastResult {
    let now_local = now.naive_local();
    let today = now_local.date();
    let tomorrow = today + Duration::days(1);

    let today_scan = match series.sun_times(today) {
        Some(sun) if now_local <= sun.sunset => {
            scan(series, now_local.max(sun.sunrise), sun.sunset, threshold)
        }
        _ => WindowScan::EMPTY,
    };
    let tomorrow_scan = series
        .sun_times(tomorrow)
        .map(|sun| scan(series, sun.sunrise, sun.sunset, threshold))
        .unwrap_or(WindowScan::EMPTY);

    ForecastResult {
        pv_today: today_scan.possible,
        pv_tomorrow: tomorrow_scan.possible,
        pv_hours_today: today_scan.hours,
        pv_hours_tomorrow: tomorrow_scan.hours,
        best_hour_today: today_scan.best_hour,
        best_hour_tomorrow: tomorrow_scan.best_hour,
        source: String::new(),
        error: None,
    }
}

/// Forecast Evaluator: fetches (and briefly caches) the weather series and
/// evaluates it against the current time on every call.
pub struct PvForecastEvaluator {
    source: Arc<dyn WeatherSource>,
    location: GeoLocation,
    clock: Arc<dyn Clock>,
    cloud_threshold: f64,
    cache_ttl: Duration,
    cache: Mutex<Option<(DateTime<Tz>, Arc<WeatherSeries>)>>,
}

impl PvForecastEvaluator {
    pub fn new(source: Arc<dyn WeatherSource>, location: GeoLocation, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            location,
            clock,
            cloud_threshold: DEFAULT_CLOUD_THRESHOLD_PERCENT,
            cache_ttl: Duration::zero(),
            cache: Mutex::new(None),
        }
    }

    pub fn with_cloud_threshold(mut self, percent: f64) -> Self {
        self.cloud_threshold = percent;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn cloud_threshold(&self) -> f64 {
        self.cloud_threshold
    }

    /// Never fails: transport or parse problems yield a result with both
    /// days `false` and `error` set.
    pub async fn get_forecast(&self) -> ForecastResult {
        let now = self.clock.now();
        let series = match self.series(&now).await {
            Ok(series) => series,
            Err(e) => {
                warn!(error = %e, source = self.source.name(), "weather forecast unavailable");
                return ForecastResult::unavailable(self.source.name(), format!("{e:#}"));
            }
        };

        let mut result = evaluate(&series, &now, self.cloud_threshold);
        result.source = self.source.name().to_string();
        debug!(
            pv_today = result.pv_today,
            pv_tomorrow = result.pv_tomorrow,
            pv_hours_today = result.pv_hours_today,
            best_hour_today = ?result.best_hour_today,
            "pv forecast evaluated"
        );
        result
    }

    async fn series(&self, now: &DateTime<Tz>) -> anyhow::Result<Arc<WeatherSeries>> {
        if self.cache_ttl > Duration::zero() {
            let cache = self.cache.lock();
            if let Some((fetched, series)) = &*cache {
                let age = *now - *fetched;
                // A fetch from a previous day cannot describe today/tomorrow.
                if age >= Duration::zero()
                    && age < self.cache_ttl
                    && fetched.date_naive() == now.date_naive()
                {
                    return Ok(series.clone());
                }
            }
        }

        let series = Arc::new(
            self.source
                .fetch_hourly_cloud_cover_and_sun_times(&self.location)
                .await?,
        );
        if self.cache_ttl > Duration::zero() {
            *self.cache.lock() = Some((*now, series.clone()));
        }
        Ok(series)
    }

    pub fn invalidate_cache(&self) {
        *self.cache.lock() = None;
    }
}
