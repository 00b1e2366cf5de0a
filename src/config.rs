//! Pipeline configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it changes.
//! `validate` runs before any stage touches data.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::models::Granularity;

pub const DEFAULT_DISEASES: [&str; 10] = [
    "cholera",
    "diarrhoea",
    "measles",
    "viral_haemmorrhaphic_fever",
    "meningitis",
    "ebola",
    "marburg_virus",
    "yellow_fever",
    "rubella_mars",
    "malaria",
];

/// Non-seasonal (p, d, q) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

/// Seasonal (P, D, Q) order; the period lives in `PipelineConfig::seasonal_period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonalOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

impl SeasonalOrder {
    pub const NONE: Self = Self { p: 0, d: 0, q: 0 };

    pub fn is_none(&self) -> bool {
        self.p == 0 && self.d == 0 && self.q == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastStrategy {
    #[default]
    Seasonal,
    MovingAverage,
}

impl fmt::Display for ForecastStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seasonal => write!(f, "seasonal"),
            Self::MovingAverage => write!(f, "moving_average"),
        }
    }
}

impl FromStr for ForecastStrategy {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "seasonal" | "sarima" => Ok(Self::Seasonal),
            "moving_average" | "ma" => Ok(Self::MovingAverage),
            other => Err(format!("unknown forecast strategy '{other}'")),
        }
    }
}

/// What the seasonal forecaster does with a series shorter than `min_history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortHistoryPolicy {
    #[default]
    Fail,
    Fallback,
}

impl FromStr for ShortHistoryPolicy {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "fallback" => Ok(Self::Fallback),
            other => Err(format!("unknown short-history policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub granularity: Granularity,
    pub diseases: Vec<String>,
    pub clusters: usize,
    pub cluster_seed: u64,
    pub cluster_max_iterations: usize,
    pub cluster_restarts: usize,
    pub horizon: usize,
    pub seasonal_period: usize,
    pub order: ArimaOrder,
    pub seasonal_order: SeasonalOrder,
    pub alert_z: f64,
    pub min_history: usize,
    pub short_history: ShortHistoryPolicy,
    pub strategy: ForecastStrategy,
    pub moving_average_window: usize,
    pub confidence_level: f64,
    pub max_iterations: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            granularity: Granularity::Weekly,
            diseases: DEFAULT_DISEASES.iter().map(|d| d.to_string()).collect(),
            clusters: 3,
            cluster_seed: 42,
            cluster_max_iterations: 300,
            cluster_restarts: 10,
            horizon: 8,
            seasonal_period: 52,
            order: ArimaOrder { p: 1, d: 1, q: 1 },
            seasonal_order: SeasonalOrder { p: 1, d: 1, q: 1 },
            alert_z: 2.0,
            min_history: 104,
            short_history: ShortHistoryPolicy::Fail,
            strategy: ForecastStrategy::Seasonal,
            moving_average_window: 2,
            confidence_level: 0.95,
            max_iterations: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("invalid config JSON in {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> { Err(PipelineError::Configuration(msg)) };

        if self.diseases.is_empty() {
            return fail("disease ordering is empty".into());
        }
        let unique: BTreeSet<&str> = self.diseases.iter().map(String::as_str).collect();
        if unique.len() != self.diseases.len() {
            return fail("disease ordering contains duplicates".into());
        }
        if self.clusters == 0 {
            return fail("cluster count must be at least 1".into());
        }
        if self.cluster_max_iterations == 0 || self.cluster_restarts == 0 {
            return fail("clustering needs at least one iteration and one restart".into());
        }
        if self.horizon == 0 {
            return fail("forecast horizon must be positive".into());
        }
        if !self.seasonal_order.is_none() {
            if self.seasonal_period < 2 {
                return fail(format!(
                    "seasonal period must be at least 2, got {}",
                    self.seasonal_period
                ));
            }
            if self.min_history < 2 * self.seasonal_period {
                return fail(format!(
                    "minimum history {} is shorter than two seasonal cycles ({})",
                    self.min_history,
                    2 * self.seasonal_period
                ));
            }
        }
        if self.order.d > 2 || self.seasonal_order.d > 1 {
            return fail("differencing orders are limited to d <= 2 and D <= 1".into());
        }
        if !self.alert_z.is_finite() || self.alert_z < 0.0 {
            return fail(format!("alert z must be a non-negative number, got {}", self.alert_z));
        }
        if self.moving_average_window == 0 {
            return fail("moving-average window must be positive".into());
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return fail(format!(
                "confidence level must lie in (0, 1), got {}",
                self.confidence_level
            ));
        }
        if self.max_iterations == 0 {
            return fail("optimizer iteration budget must be positive".into());
        }
        Ok(())
    }
}
