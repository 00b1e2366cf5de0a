use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use crate::aggregate::total_by_period;
use crate::error::Result;
use crate::models::{BucketedSeries, CaseTrend, ClusterAssignment, DiseaseSummary};
use crate::pipeline::{ForecastRun, PairOutcome};
use crate::recommend::display_name;

pub fn summarize_by_disease(series: &BucketedSeries, run: &ForecastRun) -> Vec<DiseaseSummary> {
    let mut map: BTreeMap<String, (u64, BTreeSet<String>)> = BTreeMap::new();

    for (key, values) in series.iter() {
        let entry = map.entry(key.disease.clone()).or_default();
        entry.0 += values.iter().map(|v| v.count).sum::<u64>();
        entry.1.insert(key.entity.clone());
    }

    let mut triggered: BTreeMap<&str, usize> = BTreeMap::new();
    for alert in run.alerts().filter(|alert| alert.triggered) {
        *triggered.entry(alert.disease.as_str()).or_insert(0) += 1;
    }

    let mut summaries: Vec<DiseaseSummary> = map
        .into_iter()
        .map(|(disease, (total_cases, entities))| DiseaseSummary {
            triggered_alerts: triggered.get(disease.as_str()).copied().unwrap_or(0),
            disease,
            total_cases,
            entity_count: entities.len(),
        })
        .collect();

    summaries.sort_by(|a, b| b.total_cases.cmp(&a.total_cases));
    summaries
}

/// Per-period totals computed from the bucketed table.
pub fn case_trends(series: &BucketedSeries) -> Vec<CaseTrend> {
    let mut active: BTreeMap<chrono::NaiveDate, BTreeSet<&str>> = BTreeMap::new();
    for (key, values) in series.iter() {
        for value in values.iter().filter(|v| v.count > 0) {
            active
                .entry(value.period_start)
                .or_default()
                .insert(key.entity.as_str());
        }
    }

    total_by_period(series)
        .into_iter()
        .map(|(week_start, total)| CaseTrend {
            week_start,
            case_count: total as i64,
            entity_count: active.get(&week_start).map_or(0, |set| set.len()) as i64,
        })
        .collect()
}

pub fn build_report(
    scope: Option<&str>,
    series: &BucketedSeries,
    clustering: &Result<ClusterAssignment>,
    run: &ForecastRun,
    trends: &[CaseTrend],
) -> String {
    let summaries = summarize_by_disease(series, run);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all entities");

    let _ = writeln!(output, "# Outbreak Early Warning Report");
    let _ = writeln!(
        output,
        "Generated for {} ({} series, {} periods)",
        scope_label,
        series.len(),
        series.granularity()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Disease Burden");

    if summaries.is_empty() {
        let _ = writeln!(output, "No cases recorded for this window.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} cases across {} entities ({} triggered alert periods)",
                display_name(&summary.disease),
                summary.total_cases,
                summary.entity_count,
                summary.triggered_alerts
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Entity Clusters");

    match clustering {
        Ok(assignment) => {
            for cluster_id in 0..assignment.k {
                let members = assignment.members(cluster_id);
                let _ = writeln!(
                    output,
                    "- Cluster {} ({} entities): {}",
                    cluster_id,
                    members.len(),
                    if members.is_empty() {
                        "none".to_string()
                    } else {
                        members.join(", ")
                    }
                );
            }
        }
        Err(err) => {
            let _ = writeln!(output, "Clustering unavailable: {err}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Triggered Alerts");

    let mut outcomes: Vec<_> = run
        .outcomes
        .iter()
        .filter(|outcome| outcome.alerts.iter().any(|alert| alert.triggered))
        .collect();
    outcomes.sort_by(|a, b| {
        let peak = |o: &PairOutcome| {
            o.alerts
                .iter()
                .map(|alert| alert.predicted_cases - o.threshold.value)
                .fold(f64::NEG_INFINITY, f64::max)
        };
        peak(*b).total_cmp(&peak(*a))
    });

    if outcomes.is_empty() {
        let _ = writeln!(output, "No forecast period exceeds its alert threshold.");
    } else {
        for outcome in outcomes.iter().take(10) {
            let triggered: Vec<_> = outcome.alerts.iter().filter(|a| a.triggered).collect();
            let first = triggered[0];
            let _ = writeln!(
                output,
                "- {} in {}: {} of {} periods above threshold {:.2} (from {}, forecast {:.2})",
                display_name(&first.disease),
                first.entity,
                triggered.len(),
                outcome.alerts.len(),
                outcome.threshold.value,
                first.period_start,
                first.predicted_cases
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recommended Actions");

    let actions: BTreeSet<&str> = run
        .recommendations()
        .zip(run.alerts())
        .filter(|(_, alert)| alert.triggered)
        .map(|(rec, _)| rec.action_text.as_str())
        .collect();
    if actions.is_empty() {
        let _ = writeln!(output, "No immediate threats in the forecast horizon.");
    } else {
        for action in actions {
            let _ = writeln!(output, "- {action}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Skipped Series");

    if run.failures.is_empty() {
        let _ = writeln!(output, "Every selected series was forecast.");
    } else {
        for failure in run.failures.iter() {
            let _ = writeln!(
                output,
                "- {} / {} ({}): {}",
                failure.entity,
                failure.disease,
                failure.kind.as_str(),
                failure.message
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Case Trend");

    if trends.is_empty() {
        let _ = writeln!(output, "No cases recorded for this window.");
    } else {
        let skip = trends.len().saturating_sub(8);
        for trend in trends.iter().skip(skip) {
            let _ = writeln!(
                output,
                "- Week of {}: {} cases across {} entities",
                trend.week_start, trend.case_count, trend.entity_count
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::config::{ForecastStrategy, PipelineConfig};
    use crate::models::{CaseRecord, Granularity};
    use crate::pipeline::{run_clustering, run_forecasts, select_pairs};
    use chrono::{Duration, NaiveDate};

    fn records() -> Vec<CaseRecord> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut rows = Vec::new();
        for week in 0..12i64 {
            rows.push(CaseRecord {
                entity: "Lagos".into(),
                disease: "cholera".into(),
                report_date: start + Duration::days(7 * week),
                count: if week >= 10 { 40 } else { 2 },
            });
            rows.push(CaseRecord {
                entity: "Kano".into(),
                disease: "measles".into(),
                report_date: start + Duration::days(7 * week + 1),
                count: 3,
            });
        }
        rows
    }

    #[test]
    fn report_lists_alerts_skips_and_trend() {
        let series = aggregate(&records(), Granularity::Weekly);
        let config = PipelineConfig {
            strategy: ForecastStrategy::MovingAverage,
            clusters: 2,
            ..PipelineConfig::default()
        };
        let pairs = select_pairs(&series, None, None);
        let mut run = run_forecasts(&series, &pairs, &config).unwrap();
        run.failures.push(crate::models::PairFailure {
            entity: "Oyo".into(),
            disease: "ebola".into(),
            kind: crate::error::FailureKind::InsufficientHistory,
            message: "insufficient history: need at least 104 periods, got 3".into(),
        });
        let clustering = run_clustering(&series, &config);
        let report = build_report(None, &series, &clustering, &run, &case_trends(&series));

        assert!(report.starts_with("# Outbreak Early Warning Report"));
        assert!(report.contains("- Cholera: 100 cases across 1 entities"));
        assert!(report.contains("- Cholera in Lagos:"));
        assert!(report.contains("High risk of Cholera outbreak in Lagos."));
        assert!(!report.contains("High risk of Measles"));
        assert!(report.contains("- Oyo / ebola (insufficient_history)"));
        assert!(report.contains("- Cluster 0"));
        assert!(report.contains("- Week of 2024-03-18: 43 cases across 2 entities"));
    }

    #[test]
    fn empty_inputs_render_placeholders() {
        let series = aggregate(&[], Granularity::Weekly);
        let run = ForecastRun::default();
        let clustering = run_clustering(&series, &PipelineConfig::default());
        let report = build_report(Some("Lagos"), &series, &clustering, &run, &[]);
        assert!(report.contains("Generated for Lagos (0 series, weekly periods)"));
        assert!(report.contains("Clustering unavailable"));
        assert!(report.contains("No forecast period exceeds its alert threshold."));
        assert!(report.contains("Every selected series was forecast."));
    }

    #[test]
    fn trends_count_active_entities() {
        let series = aggregate(&records(), Granularity::Weekly);
        let trends = case_trends(&series);
        assert_eq!(trends.len(), 12);
        assert_eq!(trends[0].case_count, 5);
        assert_eq!(trends[0].entity_count, 2);
    }
}
