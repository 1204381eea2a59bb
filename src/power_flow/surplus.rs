use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::clock::Clock;
use crate::domain::round2;
use crate::error::ControlError;
use crate::repo::{MeasurementRepository, PvSample};

/// PV surplus in kW: generation minus house load minus battery charging.
/// Battery discharge does not count as surplus.
pub fn surplus_kw(sample: &PvSample) -> f64 {
    round2(sample.pv_power_kw - sample.house_load_kw - sample.battery_power_kw.max(0.0))
}

pub struct PvSurplusEvaluator {
    repo: Arc<dyn MeasurementRepository>,
    clock: Arc<dyn Clock>,
    max_sample_age: Duration,
}

impl PvSurplusEvaluator {
    pub fn new(repo: Arc<dyn MeasurementRepository>, clock: Arc<dyn Clock>, max_sample_age: Duration) -> Self {
        Self {
            repo,
            clock,
            max_sample_age,
        }
    }

    /// Current surplus; `DataUnavailable` when there is no recent sample.
    pub async fn get_surplus_kw(&self) -> Result<f64, ControlError> {
        let sample = self
            .repo
            .latest_pv_sample()
            .await
            .map_err(|e| ControlError::Storage(format!("{e:#}")))?
            .ok_or_else(|| ControlError::DataUnavailable("no PV sample".to_string()))?;

        ensure_fresh(
            sample.measured_at,
            self.clock.now().with_timezone(&Utc),
            self.max_sample_age,
            "PV sample",
        )?;
        Ok(surplus_kw(&sample))
    }
}

/// Reject samples older than `max_age`. A zero `max_age` disables the check.
pub fn ensure_fresh(
    measured_at: DateTime<Utc>,
    now: DateTime<Utc>,
    max_age: Duration,
    what: &str,
) -> Result<(), ControlError> {
    if max_age > Duration::zero() && now - measured_at > max_age {
        return Err(ControlError::DataUnavailable(format!(
            "{what} is stale (measured {measured_at})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::repo::MockMeasurementRepository;
    use chrono::TimeZone;
    use chrono_tz::Europe::Vienna;
    use rstest::rstest;

    fn sample(pv: f64, load: f64, battery: f64, measured_at: DateTime<Utc>) -> PvSample {
        PvSample {
            measured_at,
            pv_power_kw: pv,
            house_load_kw: load,
            battery_power_kw: battery,
        }
    }

    #[rstest]
    #[case(5.0, 1.5, 1.0, 2.5)]
    #[case(5.0, 1.5, -2.0, 3.5)]
    #[case(0.0, 0.8, 0.0, -0.8)]
    #[case(3.333, 1.111, 0.0, 2.22)]
    fn test_surplus_formula(#[case] pv: f64, #[case] load: f64, #[case] battery: f64, #[case] expected: f64) {
        assert_eq!(surplus_kw(&sample(pv, load, battery, Utc::now())), expected);
    }

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Vienna.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_missing_sample_is_data_unavailable() {
        let mut repo = MockMeasurementRepository::new();
        repo.expect_latest_pv_sample().returning(|| Ok(None));
        let eval = PvSurplusEvaluator::new(Arc::new(repo), clock(), Duration::minutes(15));
        assert!(matches!(
            eval.get_surplus_kw().await,
            Err(ControlError::DataUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_sample_is_data_unavailable() {
        let clock = clock();
        let measured = clock.now().with_timezone(&Utc) - Duration::minutes(20);
        let mut repo = MockMeasurementRepository::new();
        repo.expect_latest_pv_sample()
            .returning(move || Ok(Some(sample(4.0, 1.0, 0.0, measured))));

        let eval = PvSurplusEvaluator::new(Arc::new(repo), clock, Duration::minutes(15));
        let err = eval.get_surplus_kw().await.unwrap_err();
        assert!(err.is_silent());
    }

    #[tokio::test]
    async fn test_fresh_sample() {
        let clock = clock();
        let measured = clock.now().with_timezone(&Utc) - Duration::minutes(1);
        let mut repo = MockMeasurementRepository::new();
        repo.expect_latest_pv_sample()
            .returning(move || Ok(Some(sample(4.0, 1.0, 0.5, measured))));

        let eval = PvSurplusEvaluator::new(Arc::new(repo), clock, Duration::minutes(15));
        assert_eq!(eval.get_surplus_kw().await.unwrap(), 2.5);
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported() {
        let mut repo = MockMeasurementRepository::new();
        repo.expect_latest_pv_sample()
            .returning(|| Err(anyhow::anyhow!("connection reset")));
        let eval = PvSurplusEvaluator::new(Arc::new(repo), clock(), Duration::minutes(15));
        let err = eval.get_surplus_kw().await.unwrap_err();
        assert!(matches!(err, ControlError::Storage(_)));
        assert!(!err.is_silent());
    }
}
