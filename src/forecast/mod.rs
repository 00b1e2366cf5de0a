//! Per-series forecasting.
//!
//! Two interchangeable strategies share one contract: point estimates for a
//! fixed horizon, with an interval when the model provides one.
//!
//! - [`SeasonalForecaster`]: seasonal ARIMA with confidence bounds (primary).
//! - [`MovingAverageForecaster`]: trailing mean, no interval (fallback).

pub mod moving_average;
pub mod optimizer;
pub mod sarima;

use chrono::NaiveDate;

use crate::config::{
    ArimaOrder, ForecastStrategy, PipelineConfig, SeasonalOrder, ShortHistoryPolicy,
};
use crate::error::{PipelineError, Result};
use crate::models::{
    ForecastPoint, ForecastResult, Granularity, Interval, PeriodCount, SeriesKey,
};
use crate::stats;

use moving_average::MovingAverage;
use sarima::SeasonalArima;

#[derive(Debug, Clone)]
pub enum Forecaster {
    Seasonal(SeasonalForecaster),
    MovingAverage(MovingAverageForecaster),
}

impl Forecaster {
    pub fn from_config(config: &PipelineConfig) -> Self {
        match config.strategy {
            ForecastStrategy::Seasonal => Self::Seasonal(SeasonalForecaster::from_config(config)),
            ForecastStrategy::MovingAverage => Self::MovingAverage(MovingAverageForecaster {
                window: config.moving_average_window,
                horizon: config.horizon,
            }),
        }
    }

    pub fn forecast(
        &self,
        key: &SeriesKey,
        history: &[PeriodCount],
        granularity: Granularity,
    ) -> Result<ForecastResult> {
        match self {
            Self::Seasonal(forecaster) => forecaster.forecast(key, history, granularity),
            Self::MovingAverage(forecaster) => forecaster.forecast(key, history, granularity),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeasonalForecaster {
    pub order: ArimaOrder,
    pub seasonal_order: SeasonalOrder,
    pub seasonal_period: usize,
    pub horizon: usize,
    pub min_history: usize,
    pub short_history: ShortHistoryPolicy,
    pub confidence_level: f64,
    pub max_iterations: usize,
}

impl SeasonalForecaster {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            order: config.order,
            seasonal_order: config.seasonal_order,
            seasonal_period: config.seasonal_period,
            horizon: config.horizon,
            min_history: config.min_history,
            short_history: config.short_history,
            confidence_level: config.confidence_level,
            max_iterations: config.max_iterations,
        }
    }

    pub fn forecast(
        &self,
        key: &SeriesKey,
        history: &[PeriodCount],
        granularity: Granularity,
    ) -> Result<ForecastResult> {
        let values = as_values(history);
        let mut model = self.select_model(key, values.len())?;
        ensure_not_constant(&values)?;
        let last = last_period(history)?;

        model.fit(&values)?;
        let (means, std_errors) = model.forecast(self.horizon)?;
        let z = stats::two_sided_z(self.confidence_level);

        let points = means
            .into_iter()
            .zip(std_errors)
            .enumerate()
            .map(|(step, (mean, se))| ForecastPoint {
                period_start: granularity.advance(last, step as i64 + 1),
                point_estimate: mean,
                interval: Some(Interval {
                    lower: mean - z * se,
                    upper: mean + z * se,
                }),
            })
            .collect();

        Ok(ForecastResult {
            key: key.clone(),
            model: model.label(),
            points,
        })
    }

    fn select_model(&self, key: &SeriesKey, observations: usize) -> Result<SeasonalArima> {
        if observations >= self.min_history {
            return SeasonalArima::new(
                self.order,
                self.seasonal_order,
                self.seasonal_period,
                self.max_iterations,
            );
        }

        match self.short_history {
            ShortHistoryPolicy::Fail => Err(PipelineError::InsufficientHistory {
                required: self.min_history,
                actual: observations,
            }),
            ShortHistoryPolicy::Fallback => {
                let ArimaOrder { p, d, q } = self.order;
                let required = p + d + q + 10;
                if observations < required {
                    return Err(PipelineError::InsufficientHistory {
                        required,
                        actual: observations,
                    });
                }
                tracing::info!(
                    series = %key,
                    observations,
                    min_history = self.min_history,
                    "history too short for the seasonal model; using non-seasonal fallback"
                );
                SeasonalArima::non_seasonal(self.order, self.max_iterations)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MovingAverageForecaster {
    pub window: usize,
    pub horizon: usize,
}

impl MovingAverageForecaster {
    pub fn forecast(
        &self,
        key: &SeriesKey,
        history: &[PeriodCount],
        granularity: Granularity,
    ) -> Result<ForecastResult> {
        let model = MovingAverage::new(self.window)?;
        let last = last_period(history)?;
        let forecasts = model.forecast(&as_values(history), self.horizon)?;

        let points = forecasts
            .into_iter()
            .enumerate()
            .map(|(step, estimate)| ForecastPoint {
                period_start: granularity.advance(last, step as i64 + 1),
                point_estimate: estimate,
                interval: None,
            })
            .collect();

        Ok(ForecastResult {
            key: key.clone(),
            model: format!("moving_average({})", model.window()),
            points,
        })
    }
}

fn as_values(history: &[PeriodCount]) -> Vec<f64> {
    history.iter().map(|p| p.count as f64).collect()
}

fn ensure_not_constant(values: &[f64]) -> Result<()> {
    match values.first() {
        Some(&first) if values.iter().all(|v| *v == first) => {
            Err(PipelineError::ConstantSeries { value: first })
        }
        _ => Ok(()),
    }
}

fn last_period(history: &[PeriodCount]) -> Result<NaiveDate> {
    history
        .last()
        .map(|p| p.period_start)
        .ok_or(PipelineError::InsufficientHistory {
            required: 1,
            actual: 0,
        })
}
