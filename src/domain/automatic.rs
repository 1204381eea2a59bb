use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use super::Season;

/// Minimum boiler runtime assumed when the operator leaves it unset.
pub const DEFAULT_MIN_RUNTIME_MIN: u32 = 90;

/// Per-season values for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Seasonal<T> {
    pub summer: T,
    pub winter: T,
}

impl<T> Seasonal<T> {
    pub fn get(&self, season: Season) -> &T {
        match season {
            Season::Summer => &self.summer,
            Season::Winter => &self.winter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BoilerSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Deadline as local "HH:MM".
    #[serde(default)]
    pub target_time: Option<String>,
    #[serde(default)]
    #[validate(range(min = 20.0, max = 95.0))]
    pub target_temp_c: Option<f64>,
    #[serde(default = "default_min_runtime")]
    #[validate(range(min = 1, max = 1440))]
    pub min_runtime_min: u32,
}

fn default_min_runtime() -> u32 {
    DEFAULT_MIN_RUNTIME_MIN
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct WallboxSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Deadline as local "HH:MM".
    #[serde(default)]
    pub target_time: Option<String>,
    /// Energy to deliver per car-connect session.
    #[serde(default)]
    #[validate(range(min = 0.0, max = 200.0))]
    pub energy_kwh: f64,
    #[serde(default)]
    pub allow_night_grid: bool,
}

/// Settings of the AUTOMATIC mode, per device and season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutomaticConfig {
    pub boiler: Seasonal<BoilerSettings>,
    pub wallbox: Seasonal<WallboxSettings>,
}

impl AutomaticConfig {
    pub fn boiler(&self, season: Season) -> &BoilerSettings {
        self.boiler.get(season)
    }

    pub fn wallbox(&self, season: Season) -> &WallboxSettings {
        self.wallbox.get(season)
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        self.boiler.summer.validate()?;
        self.boiler.winter.validate()?;
        self.wallbox.summer.validate()?;
        self.wallbox.winter.validate()
    }
}

impl Default for AutomaticConfig {
    fn default() -> Self {
        Self {
            boiler: Seasonal {
                summer: BoilerSettings {
                    enabled: true,
                    target_time: Some("18:00".to_string()),
                    target_temp_c: Some(55.0),
                    min_runtime_min: DEFAULT_MIN_RUNTIME_MIN,
                },
                winter: BoilerSettings {
                    enabled: true,
                    target_time: Some("17:00".to_string()),
                    target_temp_c: Some(55.0),
                    min_runtime_min: 120,
                },
            },
            wallbox: Seasonal {
                summer: WallboxSettings {
                    enabled: true,
                    target_time: Some("07:00".to_string()),
                    energy_kwh: 10.0,
                    allow_night_grid: false,
                },
                winter: WallboxSettings {
                    enabled: true,
                    target_time: Some("07:00".to_string()),
                    energy_kwh: 10.0,
                    allow_night_grid: true,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AutomaticConfig::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_temperature_rejected() {
        let mut cfg = AutomaticConfig::default();
        cfg.boiler.winter.target_temp_c = Some(120.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: BoilerSettings = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert_eq!(settings.min_runtime_min, DEFAULT_MIN_RUNTIME_MIN);
        assert_eq!(settings.target_time, None);
        assert_eq!(settings.target_temp_c, None);
    }

    #[test]
    fn test_season_lookup() {
        let cfg = AutomaticConfig::default();
        assert_eq!(cfg.boiler(Season::Winter).min_runtime_min, 120);
        assert!(cfg.wallbox(Season::Winter).allow_night_grid);
        assert!(!cfg.wallbox(Season::Summer).allow_night_grid);
    }
}
