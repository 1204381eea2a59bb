//! Priority decision trees for the boiler and the wallbox.
//!
//! Both functions are pure: every signal is read by the caller beforehand, so
//! the trees can be exercised without devices, storage or a clock.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{AsRefStr, Display, EnumString};

use crate::domain::round2;
use crate::forecast::{ForecastResult, PriceStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Reason {
    TargetTempReached,
    PvSurplus,
    EpexEmergencyCheap,
    EpexCheap,
    DeadlineFailsafe,
    Wait,
    ForecastWait,
    HysteresisHold,
    SessionComplete,
    NightGridFailsafe,
    NoPvNoForecast,
    TimeControlledSchedule,
}

/// Outcome of one decision tree evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Relay on / charging allowed.
    pub on: bool,
    pub reason: Reason,
    /// Context attached to the control-decision event.
    pub extra: Value,
}

impl Decision {
    pub fn new(on: bool, reason: Reason) -> Self {
        Self {
            on,
            reason,
            extra: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoilerTuning {
    pub pv_min_surplus_kw: f64,
    /// Width of the band below the target in which the relay keeps its state.
    pub hysteresis_c: f64,
}

impl Default for BoilerTuning {
    fn default() -> Self {
        Self {
            pv_min_surplus_kw: 0.5,
            hysteresis_c: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WallboxTuning {
    pub pv_min_surplus_kw: f64,
    pub night_grid_window_hours: f64,
}

impl Default for WallboxTuning {
    fn default() -> Self {
        Self {
            pv_min_surplus_kw: 1.4,
            night_grid_window_hours: 2.0,
        }
    }
}

pub struct BoilerInputs<'a> {
    pub current_temp_c: f64,
    pub target_temp_c: f64,
    pub relay_on: bool,
    pub remaining_min: f64,
    pub min_runtime_min: u32,
    /// `None` when no valid surplus reading exists.
    pub pv_surplus_kw: Option<f64>,
    pub forecast: &'a ForecastResult,
    pub prices: &'a PriceStats,
}

pub fn decide_boiler(inputs: &BoilerInputs<'_>, tuning: &BoilerTuning) -> Decision {
    let temp = inputs.current_temp_c;
    let target = inputs.target_temp_c;
    let deadline_close = inputs.remaining_min <= f64::from(inputs.min_runtime_min);

    let mut decision = if temp >= target {
        Decision::new(false, Reason::TargetTempReached)
    } else if temp <= target - tuning.hysteresis_c {
        let candidate = match inputs.pv_surplus_kw {
            Some(kw) if kw > tuning.pv_min_surplus_kw => Decision::new(true, Reason::PvSurplus),
            _ if inputs.prices.is_emergency_cheap => Decision::new(true, Reason::EpexEmergencyCheap),
            _ if !inputs.forecast.predicts_pv() => {
                if inputs.prices.is_cheap {
                    Decision::new(true, Reason::EpexCheap)
                } else if deadline_close {
                    Decision::new(true, Reason::DeadlineFailsafe)
                } else {
                    Decision::new(false, Reason::Wait)
                }
            }
            _ => Decision::new(false, Reason::ForecastWait),
        };
        if !candidate.on && deadline_close {
            Decision::new(true, Reason::DeadlineFailsafe)
        } else {
            candidate
        }
    } else {
        Decision::new(inputs.relay_on, Reason::HysteresisHold)
    };

    decision.extra = json!({
        "current_temp_c": temp,
        "target_temp_c": target,
        "remaining_min": (inputs.remaining_min * 10.0).round() / 10.0,
        "pv_surplus_kw": inputs.pv_surplus_kw,
        "pv_today": inputs.forecast.pv_today,
        "pv_tomorrow": inputs.forecast.pv_tomorrow,
        "is_cheap": inputs.prices.is_cheap,
        "is_emergency_cheap": inputs.prices.is_emergency_cheap,
    });
    decision
}

pub struct WallboxInputs<'a> {
    pub pv_surplus_kw: Option<f64>,
    pub forecast: &'a ForecastResult,
    pub prices: &'a PriceStats,
    /// Hours until the charge deadline; `None` without a usable target time.
    pub remaining_hours: Option<f64>,
    pub allow_night_grid: bool,
    pub charged_kwh: f64,
    pub target_kwh: f64,
}

/// First matching rule wins.
pub fn decide_wallbox(inputs: &WallboxInputs<'_>, tuning: &WallboxTuning) -> Decision {
    let surplus_ok = inputs
        .pv_surplus_kw
        .is_some_and(|kw| kw >= tuning.pv_min_surplus_kw);
    let predicts_pv = inputs.forecast.predicts_pv();
    let night_window = inputs
        .remaining_hours
        .is_some_and(|h| h <= tuning.night_grid_window_hours);

    let mut decision = if surplus_ok {
        Decision::new(true, Reason::PvSurplus)
    } else if inputs.prices.is_emergency_cheap {
        Decision::new(true, Reason::EpexEmergencyCheap)
    } else if !predicts_pv && inputs.prices.is_cheap {
        Decision::new(true, Reason::EpexCheap)
    } else if predicts_pv {
        Decision::new(false, Reason::ForecastWait)
    } else if inputs.allow_night_grid && night_window {
        Decision::new(true, Reason::NightGridFailsafe)
    } else {
        Decision::new(false, Reason::NoPvNoForecast)
    };

    decision.extra = json!({
        "allow": decision.on,
        "pv_surplus_kw": inputs.pv_surplus_kw,
        "pv_today": inputs.forecast.pv_today,
        "pv_tomorrow": inputs.forecast.pv_tomorrow,
        "is_cheap": inputs.prices.is_cheap,
        "is_emergency_cheap": inputs.prices.is_emergency_cheap,
        "remaining_hours": inputs.remaining_hours.map(round2),
        "charged_kwh": round2(inputs.charged_kwh),
        "target_kwh": inputs.target_kwh,
    });
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn forecast(today: bool, tomorrow: bool) -> ForecastResult {
        ForecastResult {
            pv_today: today,
            pv_tomorrow: tomorrow,
            ..Default::default()
        }
    }

    fn prices(cheap: bool, emergency: bool) -> PriceStats {
        PriceStats {
            is_cheap: cheap,
            is_emergency_cheap: emergency,
            ..Default::default()
        }
    }

    fn boiler(
        temp: f64,
        relay_on: bool,
        remaining_min: f64,
        surplus: Option<f64>,
        forecast: &ForecastResult,
        prices: &PriceStats,
    ) -> Decision {
        decide_boiler(
            &BoilerInputs {
                current_temp_c: temp,
                target_temp_c: 55.0,
                relay_on,
                remaining_min,
                min_runtime_min: 90,
                pv_surplus_kw: surplus,
                forecast,
                prices,
            },
            &BoilerTuning::default(),
        )
    }

    #[test]
    fn test_boiler_pv_surplus_turns_on() {
        let d = boiler(40.0, false, 600.0, Some(1.2), &forecast(false, false), &prices(false, false));
        assert!(d.on);
        assert_eq!(d.reason, Reason::PvSurplus);
        assert_eq!(d.extra["pv_surplus_kw"], 1.2);
    }

    #[rstest]
    #[case(Some(0.5), false, false, false, false, Reason::Wait, false)]
    #[case(None, false, false, false, false, Reason::Wait, false)]
    #[case(Some(0.2), true, true, false, true, Reason::EpexEmergencyCheap, true)]
    #[case(Some(0.2), false, false, true, false, Reason::EpexCheap, true)]
    #[case(Some(0.2), true, false, true, false, Reason::ForecastWait, false)]
    #[case(Some(0.2), false, true, false, false, Reason::ForecastWait, false)]
    fn test_boiler_candidate_branch(
        #[case] surplus: Option<f64>,
        #[case] pv_today: bool,
        #[case] pv_tomorrow: bool,
        #[case] cheap: bool,
        #[case] emergency: bool,
        #[case] reason: Reason,
        #[case] on: bool,
    ) {
        let d = boiler(40.0, false, 600.0, surplus, &forecast(pv_today, pv_tomorrow), &prices(cheap, emergency));
        assert_eq!(d.reason, reason);
        assert_eq!(d.on, on);
    }

    #[rstest]
    #[case(true, true)]
    #[case(false, false)]
    fn test_boiler_deadline_failsafe(#[case] pv_today: bool, #[case] pv_tomorrow: bool) {
        let d = boiler(40.0, false, 90.0, None, &forecast(pv_today, pv_tomorrow), &prices(false, false));
        assert!(d.on);
        assert_eq!(d.reason, Reason::DeadlineFailsafe);
    }

    #[test]
    fn test_boiler_target_reached_is_terminal() {
        let d = boiler(55.0, true, 5.0, None, &forecast(false, false), &prices(true, true));
        assert!(!d.on);
        assert_eq!(d.reason, Reason::TargetTempReached);
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn test_boiler_hysteresis_holds(#[case] relay_on: bool) {
        // 53.5 is inside (target - 2, target); even an imminent deadline holds.
        let d = boiler(53.5, relay_on, 10.0, Some(5.0), &forecast(false, false), &prices(true, true));
        assert_eq!(d.on, relay_on);
        assert_eq!(d.reason, Reason::HysteresisHold);
    }

    #[test]
    fn test_boiler_lower_band_edge_is_candidate() {
        let d = boiler(53.0, false, 600.0, Some(2.0), &forecast(false, false), &prices(false, false));
        assert_eq!(d.reason, Reason::PvSurplus);
    }

    fn wallbox(
        surplus: Option<f64>,
        forecast: &ForecastResult,
        prices: &PriceStats,
        remaining_hours: Option<f64>,
        night: bool,
    ) -> Decision {
        decide_wallbox(
            &WallboxInputs {
                pv_surplus_kw: surplus,
                forecast,
                prices,
                remaining_hours,
                allow_night_grid: night,
                charged_kwh: 1.0,
                target_kwh: 5.0,
            },
            &WallboxTuning::default(),
        )
    }

    #[rstest]
    #[case(Some(1.4), true, false, false, Some(10.0), false, Reason::PvSurplus, true)]
    #[case(Some(1.39), true, false, true, Some(10.0), false, Reason::EpexEmergencyCheap, true)]
    #[case(None, false, true, false, Some(10.0), false, Reason::EpexCheap, true)]
    #[case(Some(0.5), true, true, false, Some(1.0), true, Reason::ForecastWait, false)]
    #[case(Some(0.0), false, false, false, Some(2.0), true, Reason::NightGridFailsafe, true)]
    #[case(Some(0.0), false, false, false, Some(2.5), true, Reason::NoPvNoForecast, false)]
    #[case(Some(0.0), false, false, false, None, true, Reason::NoPvNoForecast, false)]
    #[case(Some(0.0), false, false, false, Some(1.0), false, Reason::NoPvNoForecast, false)]
    fn test_wallbox_cascade(
        #[case] surplus: Option<f64>,
        #[case] pv_today: bool,
        #[case] cheap: bool,
        #[case] emergency: bool,
        #[case] remaining_hours: Option<f64>,
        #[case] night: bool,
        #[case] reason: Reason,
        #[case] allow: bool,
    ) {
        let d = wallbox(surplus, &forecast(pv_today, false), &prices(cheap, emergency), remaining_hours, night);
        assert_eq!(d.reason, reason);
        assert_eq!(d.on, allow);
        assert_eq!(d.extra["allow"], allow);
    }

    #[test]
    fn test_wallbox_no_pv_no_forecast_not_forced() {
        let d = wallbox(Some(0.0), &forecast(false, false), &prices(false, false), Some(8.0), false);
        assert!(!d.on);
        assert_eq!(d.reason, Reason::NoPvNoForecast);
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(Reason::EpexEmergencyCheap.to_string(), "epex_emergency_cheap");
        assert_eq!("night_grid_failsafe".parse::<Reason>().unwrap(), Reason::NightGridFailsafe);
        assert_eq!(serde_json::to_value(Reason::HysteresisHold).unwrap(), "hysteresis_hold");
    }
}
