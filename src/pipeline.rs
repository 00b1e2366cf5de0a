//! Runs the clustering branch and the per-pair forecast chain.
//!
//! Pairs are independent: each chain reads only its own series slice, so the
//! chains run on the rayon pool and one pair's failure never touches another.
//! Failed pairs are collected into `ForecastRun::failures`; a pair that ran
//! and raised no alert still contributes its untriggered alerts.

use rayon::prelude::*;

use crate::alert::AlertEngine;
use crate::cluster::Clusterer;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::forecast::Forecaster;
use crate::models::{
    Alert, AlertRecord, BucketedSeries, ClusterAssignment, ClusterRecord, ForecastResult,
    PairFailure, Recommendation, SeriesKey, Threshold,
};
use crate::profile::build_profiles;
use crate::recommend::recommendations;

#[derive(Debug, Clone)]
pub struct PairOutcome {
    pub forecast: ForecastResult,
    pub threshold: Threshold,
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Default)]
pub struct ForecastRun {
    pub outcomes: Vec<PairOutcome>,
    pub failures: Vec<PairFailure>,
}

impl ForecastRun {
    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.outcomes.iter().flat_map(|outcome| outcome.alerts.iter())
    }

    pub fn recommendations(&self) -> impl Iterator<Item = &Recommendation> {
        self.outcomes
            .iter()
            .flat_map(|outcome| outcome.recommendations.iter())
    }

    pub fn triggered_count(&self) -> usize {
        self.alerts().filter(|alert| alert.triggered).count()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub clustering: Result<ClusterAssignment>,
    pub forecasts: ForecastRun,
}

/// Keys of the series matching the optional entity and disease filters.
pub fn select_pairs(
    series: &BucketedSeries,
    entity: Option<&str>,
    disease: Option<&str>,
) -> Vec<SeriesKey> {
    series
        .keys()
        .filter(|key| entity.map_or(true, |e| key.entity == e))
        .filter(|key| disease.map_or(true, |d| key.disease == d))
        .cloned()
        .collect()
}

pub fn run_clustering(
    series: &BucketedSeries,
    config: &PipelineConfig,
) -> Result<ClusterAssignment> {
    ensure_granularity(series, config)?;
    let profile = build_profiles(series, &config.diseases)?;
    let clusterer = Clusterer::new(
        config.clusters,
        config.cluster_seed,
        config.cluster_max_iterations,
        config.cluster_restarts,
    )?;
    let assignment = clusterer.cluster(&profile)?;
    tracing::info!(
        entities = assignment.labels.len(),
        k = assignment.k,
        inertia = assignment.inertia,
        "clustered entity profiles"
    );
    Ok(assignment)
}

pub fn run_forecasts(
    series: &BucketedSeries,
    pairs: &[SeriesKey],
    config: &PipelineConfig,
) -> Result<ForecastRun> {
    config.validate()?;
    ensure_granularity(series, config)?;

    let forecaster = Forecaster::from_config(config);
    let engine = AlertEngine::new(config.alert_z)?;

    let results: Vec<std::result::Result<PairOutcome, PairFailure>> = pairs
        .par_iter()
        .map(|key| {
            forecast_pair(series, key, &forecaster, &engine).map_err(|err| {
                tracing::warn!(series = %key, error = %err, "skipping pair");
                PairFailure {
                    entity: key.entity.clone(),
                    disease: key.disease.clone(),
                    kind: err.kind(),
                    message: err.to_string(),
                }
            })
        })
        .collect();

    let mut run = ForecastRun::default();
    for result in results {
        match result {
            Ok(outcome) => run.outcomes.push(outcome),
            Err(failure) => run.failures.push(failure),
        }
    }

    tracing::info!(
        pairs = pairs.len(),
        forecast = run.outcomes.len(),
        skipped = run.failures.len(),
        triggered = run.triggered_count(),
        "forecast chain finished"
    );
    Ok(run)
}

/// Runs both branches. A clustering failure is reported in the output and
/// does not stop forecasting.
pub fn run(
    series: &BucketedSeries,
    pairs: &[SeriesKey],
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    let (clustering, forecasts) = rayon::join(
        || run_clustering(series, config),
        || run_forecasts(series, pairs, config),
    );
    if let Err(err) = &clustering {
        tracing::warn!(error = %err, "clustering aborted");
    }
    Ok(PipelineOutput {
        clustering,
        forecasts: forecasts?,
    })
}

fn forecast_pair(
    series: &BucketedSeries,
    key: &SeriesKey,
    forecaster: &Forecaster,
    engine: &AlertEngine,
) -> Result<PairOutcome> {
    let history = series.get(key).ok_or(PipelineError::InsufficientHistory {
        required: 1,
        actual: 0,
    })?;
    let forecast = forecaster.forecast(key, history, series.granularity())?;
    let (threshold, alerts) = engine.evaluate(history, &forecast)?;
    let recommendations = recommendations(&alerts);
    Ok(PairOutcome {
        forecast,
        threshold,
        alerts,
        recommendations,
    })
}

fn ensure_granularity(series: &BucketedSeries, config: &PipelineConfig) -> Result<()> {
    if series.granularity() != config.granularity {
        return Err(PipelineError::Configuration(format!(
            "series are bucketed {} but the pipeline is configured for {}",
            series.granularity(),
            config.granularity
        )));
    }
    Ok(())
}

/// Flat alert rows, one per forecast period.
pub fn alert_records(run: &ForecastRun) -> Vec<AlertRecord> {
    run.outcomes
        .iter()
        .flat_map(|outcome| {
            outcome
                .alerts
                .iter()
                .zip(&outcome.recommendations)
                .zip(&outcome.forecast.points)
                .map(|((alert, recommendation), point)| AlertRecord {
                    entity: alert.entity.clone(),
                    disease: alert.disease.clone(),
                    period_start: alert.period_start,
                    predicted_cases: alert.predicted_cases,
                    lower_bound: point.interval.map(|i| i.lower),
                    upper_bound: point.interval.map(|i| i.upper),
                    threshold: outcome.threshold.value,
                    triggered: alert.triggered,
                    action_text: recommendation.action_text.clone(),
                })
        })
        .collect()
}

pub fn cluster_records(assignment: &ClusterAssignment) -> Vec<ClusterRecord> {
    assignment
        .labels
        .iter()
        .map(|(entity, &cluster_id)| ClusterRecord {
            entity: entity.clone(),
            cluster_id,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::config::ForecastStrategy;
    use crate::error::FailureKind;
    use crate::models::{CaseRecord, Granularity};
    use chrono::{Duration, NaiveDate};

    fn weekly_records(entity: &str, disease: &str, counts: &[u32]) -> Vec<CaseRecord> {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        counts
            .iter()
            .enumerate()
            .map(|(week, &count)| CaseRecord {
                entity: entity.to_string(),
                disease: disease.to_string(),
                report_date: start + Duration::days(7 * week as i64 + 2),
                count,
            })
            .collect()
    }

    fn seasonal_counts(weeks: usize, base: f64) -> Vec<u32> {
        (0..weeks)
            .map(|t| {
                let phase = 2.0 * std::f64::consts::PI * (t % 52) as f64 / 52.0;
                let wobble = ((t * 7919) % 5) as f64;
                (base + 0.5 * base * phase.sin() + wobble).round() as u32
            })
            .collect()
    }

    fn mixed_series() -> BucketedSeries {
        let mut records = weekly_records("Lagos", "cholera", &seasonal_counts(110, 30.0));
        records.extend(weekly_records("Kano", "cholera", &seasonal_counts(40, 20.0)));
        records.extend(weekly_records("Oyo", "measles", &[10; 110]));
        records.extend(weekly_records("Kano", "measles", &seasonal_counts(110, 12.0)));
        aggregate(&records, Granularity::Weekly)
    }

    #[test]
    fn failing_pairs_do_not_stop_the_others() {
        let series = mixed_series();
        let pairs = select_pairs(&series, None, None);
        let run = run_forecasts(&series, &pairs, &PipelineConfig::default()).unwrap();

        assert_eq!(run.outcomes.len(), 2);
        assert_eq!(run.failures.len(), 2);
        assert_eq!(run.outcomes.len() + run.failures.len(), pairs.len());

        let short = run
            .failures
            .iter()
            .find(|f| f.entity == "Kano" && f.disease == "cholera")
            .unwrap();
        assert_eq!(short.kind, FailureKind::InsufficientHistory);
        let constant = run.failures.iter().find(|f| f.entity == "Oyo").unwrap();
        assert_eq!(constant.kind, FailureKind::InsufficientHistory);

        for outcome in &run.outcomes {
            assert_eq!(outcome.alerts.len(), 8);
            assert_eq!(outcome.recommendations.len(), 8);
        }
    }

    #[test]
    fn moving_average_covers_every_pair() {
        let series = mixed_series();
        let pairs = select_pairs(&series, None, None);
        let config = PipelineConfig {
            strategy: ForecastStrategy::MovingAverage,
            ..PipelineConfig::default()
        };
        let run = run_forecasts(&series, &pairs, &config).unwrap();
        assert!(run.failures.is_empty());
        assert_eq!(run.alerts().count(), pairs.len() * config.horizon);

        let records = alert_records(&run);
        assert_eq!(records.len(), run.alerts().count());
        assert!(records.iter().all(|r| r.lower_bound.is_none()));
    }

    #[test]
    fn select_pairs_applies_filters() {
        let series = mixed_series();
        assert_eq!(select_pairs(&series, Some("Kano"), None).len(), 2);
        assert_eq!(select_pairs(&series, None, Some("measles")).len(), 2);
        assert_eq!(
            select_pairs(&series, Some("Kano"), Some("measles")),
            vec![SeriesKey::new("Kano", "measles")]
        );
        assert!(select_pairs(&series, Some("Abuja"), None).is_empty());
    }

    #[test]
    fn unknown_pair_is_reported_not_dropped() {
        let series = mixed_series();
        let pairs = vec![SeriesKey::new("Abuja", "ebola")];
        let run = run_forecasts(&series, &pairs, &PipelineConfig::default()).unwrap();
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].entity, "Abuja");
    }

    #[test]
    fn granularity_mismatch_is_a_configuration_error() {
        let series = mixed_series();
        let config = PipelineConfig {
            granularity: Granularity::Daily,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            run_forecasts(&series, &[], &config),
            Err(PipelineError::Configuration(_))
        ));
        assert!(matches!(
            run_clustering(&series, &config),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn clustering_failure_does_not_cancel_forecasts() {
        let series = mixed_series();
        let config = PipelineConfig {
            clusters: 5,
            strategy: ForecastStrategy::MovingAverage,
            ..PipelineConfig::default()
        };
        let pairs = select_pairs(&series, None, None);
        let output = run(&series, &pairs, &config).unwrap();
        assert!(matches!(
            output.clustering,
            Err(PipelineError::InsufficientData {
                required: 5,
                actual: 3
            })
        ));
        assert_eq!(output.forecasts.outcomes.len(), pairs.len());
    }

    #[test]
    fn cluster_records_cover_every_entity() {
        let series = mixed_series();
        let config = PipelineConfig {
            clusters: 2,
            ..PipelineConfig::default()
        };
        let assignment = run_clustering(&series, &config).unwrap();
        let records = cluster_records(&assignment);
        let entities: Vec<&str> = records.iter().map(|r| r.entity.as_str()).collect();
        assert_eq!(entities, vec!["Kano", "Lagos", "Oyo"]);
        assert!(records.iter().all(|r| r.cluster_id < 2));
    }
}
