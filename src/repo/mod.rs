//! Read side of the measurement time-series store.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::InMemoryMeasurementRepository;

/// Latest inverter/battery/meter reading, kW.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvSample {
    pub measured_at: DateTime<Utc>,
    pub pv_power_kw: f64,
    pub house_load_kw: f64,
    /// Positive while the home battery is charging.
    pub battery_power_kw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSample {
    pub measured_at: DateTime<Utc>,
    pub celsius: f64,
}

/// One day-ahead price slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    pub price: f64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MeasurementRepository: Send + Sync {
    async fn latest_boiler_temp(&self) -> Result<Option<TemperatureSample>>;
    async fn latest_pv_sample(&self) -> Result<Option<PvSample>>;
    /// Prices of all slots starting in `[start, end)`, oldest first.
    async fn price_series(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<f64>>;
    /// Price of the slot covering the present moment.
    async fn current_price(&self) -> Result<Option<f64>>;
}
