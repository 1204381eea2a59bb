//! Day-ahead price statistics over a trailing window.
//!
//! "Cheap" and "emergency cheap" are relative to the price range seen over the
//! analysis window (lower third and lower fifth of the span by default).

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::domain::round2;
use crate::repo::MeasurementRepository;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceSettings {
    pub analysis_days: i64,
    pub cache_ttl_seconds: i64,
    pub min_data_points: usize,
    pub cheap_fraction: f64,
    pub emergency_fraction: f64,
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            analysis_days: 14,
            cache_ttl_seconds: 3600,
            min_data_points: 10,
            cheap_fraction: 0.33,
            emergency_fraction: 0.20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub current: Option<f64>,
    pub threshold: Option<f64>,
    pub emergency_threshold: Option<f64>,
    pub is_cheap: bool,
    pub is_emergency_cheap: bool,
    pub span: Option<f64>,
    pub data_points: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PriceStats {
    fn failed(data_points: usize, current: Option<f64>, error: impl Into<String>) -> Self {
        Self {
            current,
            data_points,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    fn apply_current(&mut self, current: f64) {
        self.current = Some(round2(current));
        if let Some(threshold) = self.threshold {
            self.is_cheap = current <= threshold;
        }
        if let Some(emergency) = self.emergency_threshold {
            self.is_emergency_cheap = current <= emergency;
        }
    }
}

/// Compute statistics from a raw series and the current price.
///
/// Returns `None` for the thresholds when the series is too short or the
/// current price is unknown; `error` explains which.
pub fn compute(prices: &[f64], current: Option<f64>, settings: &PriceSettings) -> PriceStats {
    if prices.len() < settings.min_data_points {
        return PriceStats::failed(
            prices.len(),
            current,
            format!(
                "Insufficient price data (need at least {} data points)",
                settings.min_data_points
            ),
        );
    }

    let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
    let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = prices.iter().sum::<f64>() / prices.len() as f64;
    let span = max - min;

    let mut stats = PriceStats {
        min: Some(round2(min)),
        max: Some(round2(max)),
        avg: Some(round2(avg)),
        span: Some(round2(span)),
        data_points: prices.len(),
        ..Default::default()
    };

    let Some(current) = current else {
        stats.error = Some("Current price unavailable".to_string());
        return stats;
    };

    let threshold = min + span * settings.cheap_fraction;
    let emergency = min + span * settings.emergency_fraction;
    stats.current = Some(round2(current));
    stats.threshold = Some(round2(threshold));
    stats.emergency_threshold = Some(round2(emergency));
    stats.is_cheap = current <= threshold;
    stats.is_emergency_cheap = current <= emergency;
    stats
}

/// Price Statistics Cache.
///
/// The full trailing-window query runs at most once per TTL; in between only
/// the current price is re-read and the cheap flags recomputed against the
/// cached thresholds.
pub struct PriceStatisticsCache {
    repo: Arc<dyn MeasurementRepository>,
    clock: Arc<dyn Clock>,
    settings: PriceSettings,
    cache: Mutex<Option<(DateTime<Tz>, PriceStats)>>,
}

impl PriceStatisticsCache {
    pub fn new(repo: Arc<dyn MeasurementRepository>, clock: Arc<dyn Clock>, settings: PriceSettings) -> Self {
        Self {
            repo,
            clock,
            settings,
            cache: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &PriceSettings {
        &self.settings
    }

    fn cached(&self, now: &DateTime<Tz>) -> Option<PriceStats> {
        let cache = self.cache.lock();
        let (at, stats) = cache.as_ref()?;
        let age = (*now - *at).num_seconds();
        (age >= 0 && age < self.settings.cache_ttl_seconds).then(|| stats.clone())
    }

    /// Never fails; problems are reported through `PriceStats::error`.
    pub async fn get_price_statistics(&self) -> PriceStats {
        let now = self.clock.now();

        if let Some(mut stats) = self.cached(&now) {
            match self.repo.current_price().await {
                Ok(Some(current)) => {
                    stats.apply_current(current);
                    if let Some((_, cached)) = self.cache.lock().as_mut() {
                        cached.clone_from(&stats);
                    }
                }
                Ok(None) => debug!("current price missing, keeping cached value"),
                Err(e) => warn!(error = %e, "current price query failed, keeping cached value"),
            }
            return stats;
        }

        let end = now.with_timezone(&Utc);
        let start = end - Duration::days(self.settings.analysis_days);
        let prices = match self.repo.price_series(start, end).await {
            Ok(prices) => prices,
            Err(e) => {
                warn!(error = %e, "price series query failed");
                return PriceStats::failed(0, None, format!("{e:#}"));
            }
        };
        let current = match self.repo.current_price().await {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "current price query failed");
                None
            }
        };

        let stats = compute(&prices, current, &self.settings);
        if stats.error.is_none() {
            debug!(
                data_points = stats.data_points,
                threshold = ?stats.threshold,
                emergency_threshold = ?stats.emergency_threshold,
                "price statistics refreshed"
            );
            *self.cache.lock() = Some((now, stats.clone()));
        }
        stats
    }

    /// Force a full refresh on the next access.
    pub fn invalidate_cache(&self) {
        *self.cache.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::repo::MockMeasurementRepository;
    use chrono::TimeZone;
    use chrono_tz::Europe::Vienna;
    use mockall::predicate::always;
    use mockall::Sequence;

    fn series() -> Vec<f64> {
        let mut prices: Vec<f64> = (0..20).map(|i| 20.0 + (i % 5) as f64).collect();
        prices.push(10.0);
        prices.push(40.0);
        prices
    }

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Vienna.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn test_thresholds_from_range() {
        let stats = compute(&series(), Some(15.0), &PriceSettings::default());
        assert_eq!(stats.min, Some(10.0));
        assert_eq!(stats.max, Some(40.0));
        assert_eq!(stats.span, Some(30.0));
        assert_eq!(stats.threshold, Some(19.9));
        assert_eq!(stats.emergency_threshold, Some(16.0));
        assert!(stats.is_cheap);
        assert!(stats.is_emergency_cheap);
        assert_eq!(stats.data_points, 22);
        assert!(stats.error.is_none());
    }

    #[test]
    fn test_cheap_but_not_emergency() {
        let stats = compute(&series(), Some(18.0), &PriceSettings::default());
        assert!(stats.is_cheap);
        assert!(!stats.is_emergency_cheap);
    }

    #[test]
    fn test_insufficient_data() {
        let stats = compute(&[10.0; 9], Some(5.0), &PriceSettings::default());
        assert!(stats.threshold.is_none());
        assert!(stats.min.is_none());
        assert!(!stats.is_cheap);
        assert_eq!(stats.data_points, 9);
        assert!(stats.error.unwrap().contains("at least 10"));
    }

    #[test]
    fn test_missing_current_price_keeps_range() {
        let stats = compute(&series(), None, &PriceSettings::default());
        assert_eq!(stats.min, Some(10.0));
        assert!(stats.threshold.is_none());
        assert!(!stats.is_cheap);
        assert_eq!(stats.error.as_deref(), Some("Current price unavailable"));
    }

    #[tokio::test]
    async fn test_cache_hit_only_refreshes_current() {
        let mut repo = MockMeasurementRepository::new();
        let mut seq = Sequence::new();
        repo.expect_price_series()
            .with(always(), always())
            .times(1)
            .returning(|_, _| Ok(series()));
        repo.expect_current_price()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(Some(30.0)));
        repo.expect_current_price()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(Some(15.0)));

        let clock = clock();
        let cache = PriceStatisticsCache::new(Arc::new(repo), clock.clone(), PriceSettings::default());

        let first = cache.get_price_statistics().await;
        assert!(!first.is_cheap);

        clock.advance(Duration::minutes(30));
        let second = cache.get_price_statistics().await;
        assert_eq!(second.current, Some(15.0));
        assert!(second.is_cheap);
        assert!(second.is_emergency_cheap);
        assert_eq!(second.threshold, Some(19.9));
    }

    #[tokio::test]
    async fn test_expired_cache_requeries() {
        let mut repo = MockMeasurementRepository::new();
        repo.expect_price_series()
            .times(2)
            .returning(|_, _| Ok(series()));
        repo.expect_current_price().returning(|| Ok(Some(25.0)));

        let clock = clock();
        let cache = PriceStatisticsCache::new(Arc::new(repo), clock.clone(), PriceSettings::default());
        cache.get_price_statistics().await;
        clock.advance(Duration::seconds(3600));
        cache.get_price_statistics().await;
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let mut repo = MockMeasurementRepository::new();
        repo.expect_price_series()
            .times(2)
            .returning(|_, _| Ok(series()));
        repo.expect_current_price().returning(|| Ok(Some(25.0)));

        let cache = PriceStatisticsCache::new(Arc::new(repo), clock(), PriceSettings::default());
        cache.get_price_statistics().await;
        cache.invalidate_cache();
        cache.get_price_statistics().await;
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let mut repo = MockMeasurementRepository::new();
        let mut seq = Sequence::new();
        repo.expect_price_series()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(anyhow::anyhow!("database offline")));
        repo.expect_price_series()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(series()));
        repo.expect_current_price().returning(|| Ok(Some(12.0)));

        let cache = PriceStatisticsCache::new(Arc::new(repo), clock(), PriceSettings::default());
        let failed = cache.get_price_statistics().await;
        assert!(failed.error.unwrap().contains("database offline"));
        assert!(!failed.is_cheap);

        let ok = cache.get_price_statistics().await;
        assert!(ok.is_emergency_cheap);
    }

    #[tokio::test]
    async fn test_window_covers_analysis_days() {
        let mut repo = MockMeasurementRepository::new();
        repo.expect_price_series()
            .withf(|start, end| *end - *start == Duration::days(14))
            .times(1)
            .returning(|_, _| Ok(series()));
        repo.expect_current_price().returning(|| Ok(None));

        let cache = PriceStatisticsCache::new(Arc::new(repo), clock(), PriceSettings::default());
        let stats = cache.get_price_statistics().await;
        assert_eq!(stats.data_points, 22);
    }
}
