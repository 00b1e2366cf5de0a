use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

/// One reported count for an entity and disease on a given day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub entity: String,
    pub disease: String,
    pub report_date: NaiveDate,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Daily,
    #[default]
    Weekly,
}

impl Granularity {
    pub fn days(&self) -> i64 {
        match self {
            Self::Daily => 1,
            Self::Weekly => 7,
        }
    }

    /// Start of the period containing `date`. Weeks start on Monday.
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Self::Daily => date,
            Self::Weekly => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
        }
    }

    /// The period `steps` periods after `start`.
    pub fn advance(&self, start: NaiveDate, steps: i64) -> NaiveDate {
        start + Duration::days(self.days() * steps)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "daily" | "d" => Ok(Self::Daily),
            "weekly" | "w" => Ok(Self::Weekly),
            other => Err(format!("unknown granularity '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub entity: String,
    pub disease: String,
}

impl SeriesKey {
    pub fn new(entity: impl Into<String>, disease: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            disease: disease.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.disease)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodCount {
    pub period_start: NaiveDate,
    pub count: u64,
}

/// Gap-free, grid-aligned counts per (entity, disease).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketedSeries {
    granularity: Granularity,
    series: BTreeMap<SeriesKey, Vec<PeriodCount>>,
}

impl BucketedSeries {
    pub(crate) fn from_parts(
        granularity: Granularity,
        series: BTreeMap<SeriesKey, Vec<PeriodCount>>,
    ) -> Self {
        Self {
            granularity,
            series,
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn get(&self, key: &SeriesKey) -> Option<&[PeriodCount]> {
        self.series.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &SeriesKey> {
        self.series.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SeriesKey, &[PeriodCount])> {
        self.series.iter().map(|(key, values)| (key, values.as_slice()))
    }

    pub fn entities(&self) -> BTreeSet<&str> {
        self.series.keys().map(|key| key.entity.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Per-entity disease totals, aligned to one disease ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityProfile {
    pub diseases: Vec<String>,
    pub vectors: BTreeMap<String, Vec<f64>>,
}

impl EntityProfile {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAssignment {
    pub k: usize,
    pub labels: BTreeMap<String, usize>,
    /// Centroids in standardized space, indexed by cluster id.
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
    pub iterations: usize,
}

impl ClusterAssignment {
    pub fn cluster_of(&self, entity: &str) -> Option<usize> {
        self.labels.get(entity).copied()
    }

    pub fn members(&self, cluster_id: usize) -> Vec<&str> {
        self.labels
            .iter()
            .filter(|(_, label)| **label == cluster_id)
            .map(|(entity, _)| entity.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub period_start: NaiveDate,
    pub point_estimate: f64,
    pub interval: Option<Interval>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub key: SeriesKey,
    pub model: String,
    pub points: Vec<ForecastPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Threshold {
    pub mean: f64,
    pub stddev: f64,
    pub z: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub entity: String,
    pub disease: String,
    pub period_start: NaiveDate,
    pub predicted_cases: f64,
    pub triggered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub entity: String,
    pub disease: String,
    pub period_start: NaiveDate,
    pub action_text: String,
}

/// Flat alert row handed to persistence and reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub entity: String,
    pub disease: String,
    pub period_start: NaiveDate,
    pub predicted_cases: f64,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub threshold: f64,
    pub triggered: bool,
    pub action_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterRecord {
    pub entity: String,
    pub cluster_id: usize,
}

/// A (entity, disease) pair that produced no forecast, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairFailure {
    pub entity: String,
    pub disease: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DiseaseSummary {
    pub disease: String,
    pub total_cases: u64,
    pub entity_count: usize,
    pub triggered_alerts: usize,
}

#[derive(Debug, Clone)]
pub struct CaseTrend {
    pub week_start: NaiveDate,
    pub case_count: i64,
    pub entity_count: i64,
}
