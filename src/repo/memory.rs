use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use super::{MeasurementRepository, PricePoint, PvSample, TemperatureSample};
use crate::clock::Clock;

#[derive(Debug, Default)]
struct Inner {
    boiler_temp: Option<TemperatureSample>,
    pv: Option<PvSample>,
    prices: Vec<PricePoint>,
    failing: bool,
}

/// Measurement store kept in process memory.
///
/// The host feeds it from whatever collectors it runs; tests use it directly.
pub struct InMemoryMeasurementRepository {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
    price_retention: Duration,
}

impl InMemoryMeasurementRepository {
    /// Price slots older than this are dropped on every upsert.
    pub const DEFAULT_PRICE_RETENTION_DAYS: i64 = 15;

    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
            price_retention: Duration::days(Self::DEFAULT_PRICE_RETENTION_DAYS),
        }
    }

    pub fn with_price_retention(mut self, retention: Duration) -> Self {
        self.price_retention = retention;
        self
    }

    pub fn record_boiler_temp(&self, sample: TemperatureSample) {
        self.inner.write().boiler_temp = Some(sample);
    }

    pub fn record_pv(&self, sample: PvSample) {
        self.inner.write().pv = Some(sample);
    }

    /// Insert or replace price slots, keeping the series ordered and
    /// bounded by the retention window.
    pub fn upsert_prices(&self, points: impl IntoIterator<Item = PricePoint>) {
        {
            let mut inner = self.inner.write();
            for point in points {
                inner.prices.retain(|p| p.time_start != point.time_start);
                inner.prices.push(point);
            }
            inner.prices.sort_by_key(|p| p.time_start);
        }
        let cutoff = self.clock.now().with_timezone(&Utc) - self.price_retention;
        self.prune_prices(cutoff);
    }

    pub fn price_count(&self) -> usize {
        self.inner.read().prices.len()
    }

    /// Drop price slots that ended before `before`.
    pub fn prune_prices(&self, before: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write();
        let len = inner.prices.len();
        inner.prices.retain(|p| p.time_end >= before);
        len - inner.prices.len()
    }

    /// Make every query fail, to exercise storage outages.
    pub fn set_failing(&self, failing: bool) {
        self.inner.write().failing = failing;
    }

    fn check(&self) -> Result<()> {
        if self.inner.read().failing {
            anyhow::bail!("measurement store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl MeasurementRepository for InMemoryMeasurementRepository {
    async fn latest_boiler_temp(&self) -> Result<Option<TemperatureSample>> {
        self.check()?;
        Ok(self.inner.read().boiler_temp.clone())
    }

    async fn latest_pv_sample(&self) -> Result<Option<PvSample>> {
        self.check()?;
        Ok(self.inner.read().pv.clone())
    }

    async fn price_series(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<f64>> {
        self.check()?;
        Ok(self
            .inner
            .read()
            .prices
            .iter()
            .filter(|p| p.time_start >= start && p.time_start < end)
            .map(|p| p.price)
            .collect())
    }

    async fn current_price(&self) -> Result<Option<f64>> {
        self.check()?;
        let now = self.clock.now().with_timezone(&Utc);
        Ok(self
            .inner
            .read()
            .prices
            .iter()
            .find(|p| p.time_start <= now && now < p.time_end)
            .map(|p| p.price))
    }
}
