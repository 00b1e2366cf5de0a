use crate::error::{PipelineError, Result};
use crate::models::{Alert, ForecastResult, PeriodCount, Threshold};
use crate::stats;

/// Flags forecast periods whose point estimate exceeds
/// `historical mean + z * historical sample stddev`.
///
/// The threshold is computed once per series from the whole history and does
/// not correct for seasonality or trend.
#[derive(Debug, Clone, Copy)]
pub struct AlertEngine {
    z: f64,
}

impl AlertEngine {
    pub fn new(z: f64) -> Result<Self> {
        if !z.is_finite() || z < 0.0 {
            return Err(PipelineError::Configuration(format!(
                "alert z must be a non-negative number, got {z}"
            )));
        }
        Ok(Self { z })
    }

    pub fn threshold(&self, history: &[PeriodCount]) -> Result<Threshold> {
        if history.is_empty() {
            return Err(PipelineError::InsufficientHistory {
                required: 1,
                actual: 0,
            });
        }
        let values: Vec<f64> = history.iter().map(|p| p.count as f64).collect();
        let mean = stats::mean(&values);
        let stddev = stats::sample_stddev(&values);
        Ok(Threshold {
            mean,
            stddev,
            z: self.z,
            value: mean + self.z * stddev,
        })
    }

    pub fn evaluate(
        &self,
        history: &[PeriodCount],
        forecast: &ForecastResult,
    ) -> Result<(Threshold, Vec<Alert>)> {
        let threshold = self.threshold(history)?;
        let alerts = forecast
            .points
            .iter()
            .map(|point| Alert {
                entity: forecast.key.entity.clone(),
                disease: forecast.key.disease.clone(),
                period_start: point.period_start,
                predicted_cases: point.point_estimate,
                triggered: point.point_estimate > threshold.value,
            })
            .collect();
        Ok((threshold, alerts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ForecastPoint, Granularity, SeriesKey};
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn weekly(values: &[u64]) -> Vec<PeriodCount> {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(idx, &count)| PeriodCount {
                period_start: Granularity::Weekly.advance(start, idx as i64),
                count,
            })
            .collect()
    }

    fn forecast_of(estimates: &[f64]) -> ForecastResult {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        ForecastResult {
            key: SeriesKey::new("Lagos", "cholera"),
            model: "test".to_string(),
            points: estimates
                .iter()
                .enumerate()
                .map(|(idx, &estimate)| ForecastPoint {
                    period_start: Granularity::Weekly.advance(start, idx as i64),
                    point_estimate: estimate,
                    interval: None,
                })
                .collect(),
        }
    }

    #[test]
    fn single_spike_raises_threshold_but_flat_forecast_stays_quiet() {
        let mut counts = vec![0u64; 104];
        counts[51] = 50;
        let history = weekly(&counts);
        let engine = AlertEngine::new(2.0).unwrap();

        let (threshold, alerts) = engine
            .evaluate(&history, &forecast_of(&[0.0, 0.1, 0.2, 0.05]))
            .unwrap();

        assert!(threshold.value > 0.0);
        assert_abs_diff_eq!(threshold.mean, 50.0 / 104.0, epsilon = 1e-12);
        assert!(alerts.iter().all(|alert| !alert.triggered));
    }

    #[test]
    fn constant_history_uses_strict_comparison() {
        let history = weekly(&[10; 104]);
        let engine = AlertEngine::new(2.0).unwrap();

        let (threshold, alerts) = engine
            .evaluate(&history, &forecast_of(&[10.0, 10.01, 9.99]))
            .unwrap();

        assert_eq!(threshold.stddev, 0.0);
        assert_eq!(threshold.value, 10.0);
        let flags: Vec<bool> = alerts.iter().map(|a| a.triggered).collect();
        assert_eq!(flags, vec![false, true, false]);
    }

    #[test]
    fn alerts_mirror_forecast_periods() {
        let history = weekly(&[1, 2, 3, 4]);
        let forecast = forecast_of(&[1.0, 100.0]);
        let (_, alerts) = AlertEngine::new(2.0)
            .unwrap()
            .evaluate(&history, &forecast)
            .unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[1].period_start, forecast.points[1].period_start);
        assert_eq!(alerts[1].predicted_cases, 100.0);
        assert!(alerts[1].triggered);
        assert_eq!(alerts[0].entity, "Lagos");
    }

    #[test]
    fn empty_history_is_rejected() {
        let engine = AlertEngine::new(2.0).unwrap();
        assert!(matches!(
            engine.threshold(&[]),
            Err(PipelineError::InsufficientHistory { .. })
        ));
    }

    #[test]
    fn negative_z_is_rejected() {
        assert!(AlertEngine::new(-1.0).is_err());
        assert!(AlertEngine::new(f64::NAN).is_err());
    }

    proptest! {
        #[test]
        fn raising_z_never_adds_alerts(
            counts in prop::collection::vec(0u64..200, 2..60),
            estimates in prop::collection::vec(0.0f64..300.0, 1..12),
            z_low in 0.0f64..4.0,
            bump in 0.0f64..4.0,
        ) {
            let history = weekly(&counts);
            let forecast = forecast_of(&estimates);
            let count = |z: f64| {
                AlertEngine::new(z)
                    .unwrap()
                    .evaluate(&history, &forecast)
                    .unwrap()
                    .1
                    .iter()
                    .filter(|a| a.triggered)
                    .count()
            };
            prop_assert!(count(z_low + bump) <= count(z_low));
        }
    }
}
