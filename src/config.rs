use anyhow::{Context, Result};
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::controller::{BoilerTuning, WallboxTuning};
use crate::forecast::{GeoLocation, OpenMeteoClient, PriceSettings};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub controller: ControllerConfig,
    pub location: LocationConfig,
    pub forecast: ForecastConfig,
    pub prices: PriceSettings,
    pub boiler: BoilerTuning,
    pub wallbox: WallboxTuning,
    pub stores: StoresConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub tick_seconds: u64,
    /// IANA timezone of the installation.
    pub timezone: String,
    pub error_log_cooldown_seconds: i64,
    pub max_sample_age_minutes: i64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 60,
            timezone: "Europe/Vienna".to_string(),
            error_log_cooldown_seconds: 86_400,
            max_sample_age_minutes: 15,
        }
    }
}

impl ControllerConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid timezone {:?}: {e}", self.timezone))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 47.2849,
            longitude: 12.8231,
            name: Some("Bruck an der Grossglocknerstrasse".to_string()),
        }
    }
}

impl LocationConfig {
    pub fn geo(&self) -> GeoLocation {
        GeoLocation {
            latitude: self.latitude,
            longitude: self.longitude,
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub base_url: String,
    pub http_timeout_seconds: u64,
    pub cloud_threshold_percent: f64,
    /// Raw weather series reuse window; 0 fetches on every evaluation.
    pub cache_ttl_seconds: i64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            base_url: OpenMeteoClient::DEFAULT_BASE_URL.to_string(),
            http_timeout_seconds: 5,
            cloud_threshold_percent: 40.0,
            cache_ttl_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoresConfig {
    /// Directory for the persisted mode, schedule and automatic settings.
    /// Empty keeps everything in memory.
    pub data_dir: String,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

impl StoresConfig {
    pub fn file(&self, name: &str) -> Option<PathBuf> {
        (!self.data_dir.is_empty()).then(|| PathBuf::from(&self.data_dir).join(name))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::figment("config/default.toml")
            .extract()
            .context("invalid configuration")
    }

    /// Built-in defaults, then the TOML file, then `SHC__SECTION__KEY`
    /// environment variables.
    pub fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SHC__").split("__"))
    }
}
