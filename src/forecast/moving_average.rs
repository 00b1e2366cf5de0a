use crate::error::{PipelineError, Result};
use crate::stats;

/// Trailing moving-average forecaster.
///
/// Cheap approximate estimates with no interval. Each in-sample value is the
/// mean of the previous `window` observations, shifted one period so no
/// period sees its own count.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: usize,
}

impl MovingAverage {
    pub fn new(window: usize) -> Result<Self> {
        if window == 0 {
            return Err(PipelineError::Configuration(
                "moving-average window must be positive".to_string(),
            ));
        }
        Ok(Self { window })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Shifted rolling means; `None` for the first period, partial windows after.
    pub fn fitted(&self, data: &[f64]) -> Vec<Option<f64>> {
        (0..data.len())
            .map(|t| {
                let prior = &data[t.saturating_sub(self.window)..t];
                (!prior.is_empty()).then(|| stats::mean(prior))
            })
            .collect()
    }

    /// Iterated forecasts: each step averages the last `window` values of the
    /// series extended with the earlier steps.
    pub fn forecast(&self, data: &[f64], steps: usize) -> Result<Vec<f64>> {
        if data.is_empty() {
            return Err(PipelineError::InsufficientHistory {
                required: 1,
                actual: 0,
            });
        }
        let mut extended = data.to_vec();
        for _ in 0..steps {
            let start = extended.len().saturating_sub(self.window);
            let next = stats::mean(&extended[start..]);
            extended.push(next);
        }
        Ok(extended.split_off(data.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitted_values_never_use_their_own_period() {
        let model = MovingAverage::new(2).unwrap();
        let fitted = model.fitted(&[4.0, 8.0, 2.0, 6.0]);
        assert_eq!(fitted, vec![None, Some(4.0), Some(6.0), Some(5.0)]);
    }

    #[test]
    fn forecast_rolls_forward_over_its_own_output() {
        let model = MovingAverage::new(2).unwrap();
        let forecast = model.forecast(&[4.0, 8.0, 2.0, 6.0], 3).unwrap();
        assert_eq!(forecast, vec![4.0, 5.0, 4.5]);
    }

    #[test]
    fn short_series_uses_partial_window() {
        let model = MovingAverage::new(4).unwrap();
        assert_eq!(model.forecast(&[3.0], 1).unwrap(), vec![3.0]);
    }

    #[test]
    fn empty_series_and_zero_window_fail() {
        let model = MovingAverage::new(2).unwrap();
        assert!(matches!(
            model.forecast(&[], 2),
            Err(PipelineError::InsufficientHistory { .. })
        ));
        assert!(matches!(
            MovingAverage::new(0),
            Err(PipelineError::Configuration(_))
        ));
    }
}
