use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use chrono::{Duration, NaiveDate};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::ingest::{self, CaseRow};
use crate::models::{CaseRecord, CaseTrend, ClusterAssignment};
use crate::pipeline::{alert_records, cluster_records, ForecastRun};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Two years of weekly reports for three states, with a yearly cycle.
pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let series = [
        ("Lagos", "cholera", 18.0),
        ("Lagos", "malaria", 60.0),
        ("Kano", "measles", 25.0),
        ("Kano", "meningitis", 8.0),
        ("Rivers", "cholera", 6.0),
        ("Rivers", "malaria", 45.0),
    ];
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).context("invalid seed start date")?;
    let mut inserted = 0usize;

    for (idx, (entity, disease, base)) in series.iter().enumerate() {
        for week in 0..104i64 {
            let phase = 2.0 * std::f64::consts::PI * (week % 52) as f64 / 52.0;
            let jitter = ((week * 7 + idx as i64 * 13) % 5) as f64;
            let cases = (base * (1.0 + 0.6 * phase.sin()) + jitter).round().max(0.0) as i32;
            let report_date = start + Duration::days(7 * week + 2);
            let source_key = format!("seed-{entity}-{disease}-{report_date}");

            let result = sqlx::query(
                r#"
                INSERT INTO outbreak_early_warning.case_reports
                (id, entity, disease, report_date, cases, source_key)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (source_key) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(*entity)
            .bind(*disease)
            .bind(report_date)
            .bind(cases)
            .bind(source_key)
            .execute(pool)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }
    }

    Ok(inserted)
}

pub async fn import_csv(pool: &PgPool, csv_path: &Path) -> anyhow::Result<usize> {
    let rows = ingest::read_case_rows(csv_path)?;
    let file_label = csv_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    let keys = source_keys(&file_label, &rows);
    let mut inserted = 0usize;

    for (row, source_key) in rows.into_iter().zip(keys) {
        let cases = i32::try_from(row.cases)
            .with_context(|| format!("case count {} out of range", row.cases))?;

        let result = sqlx::query(
            r#"
            INSERT INTO outbreak_early_warning.case_reports
            (id, entity, disease, report_date, cases, source_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.entity)
        .bind(&row.disease)
        .bind(row.report_date)
        .bind(cases)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Dedup keys for imported rows. Rows without an explicit key are keyed by
/// file, content and the number of identical rows before them in the file.
fn source_keys(file_label: &str, rows: &[CaseRow]) -> Vec<String> {
    let mut seen: HashMap<(&str, &str, NaiveDate, u32), usize> = HashMap::new();
    rows.iter()
        .map(|row| {
            if let Some(key) = &row.source_key {
                if !key.trim().is_empty() {
                    return key.trim().to_string();
                }
            }
            let occurrence = seen
                .entry((row.entity.as_str(), row.disease.as_str(), row.report_date, row.cases))
                .or_insert(0);
            let key = format!(
                "import-{file_label}-{}-{}-{}-{}-{}",
                row.entity, row.disease, row.report_date, row.cases, occurrence
            );
            *occurrence += 1;
            key
        })
        .collect()
}

pub async fn fetch_case_records(
    pool: &PgPool,
    since_date: Option<NaiveDate>,
) -> anyhow::Result<Vec<CaseRecord>> {
    let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT entity, disease, report_date, cases \
         FROM outbreak_early_warning.case_reports WHERE TRUE",
    );
    if let Some(since) = since_date {
        query.push(" AND report_date >= ").push_bind(since);
    }
    query.push(" ORDER BY entity, disease, report_date");

    let rows = query.build().fetch_all(pool).await?;
    let mut records = Vec::with_capacity(rows.len());

    for row in rows {
        let cases: i32 = row.get("cases");
        records.push(CaseRecord {
            entity: row.get("entity"),
            disease: row.get("disease"),
            report_date: row.get("report_date"),
            count: u32::try_from(cases).context("negative case count in database")?,
        });
    }

    Ok(records)
}

pub async fn fetch_weekly_trends(
    pool: &PgPool,
    since_date: Option<NaiveDate>,
    entity: Option<&str>,
    disease: Option<&str>,
) -> anyhow::Result<Vec<CaseTrend>> {
    let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT date_trunc('week', report_date)::date AS week_start, \
         SUM(cases)::BIGINT AS case_count, \
         COUNT(DISTINCT entity) FILTER (WHERE cases > 0)::BIGINT AS entity_count \
         FROM outbreak_early_warning.case_reports WHERE TRUE",
    );
    if let Some(since) = since_date {
        query.push(" AND report_date >= ").push_bind(since);
    }
    if let Some(value) = entity {
        query.push(" AND entity = ").push_bind(value);
    }
    if let Some(value) = disease {
        query.push(" AND disease = ").push_bind(value);
    }
    query.push(" GROUP BY 1 ORDER BY 1");

    let rows = query.build().fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|row| CaseTrend {
            week_start: row.get("week_start"),
            case_count: row.get("case_count"),
            entity_count: row.get("entity_count"),
        })
        .collect())
}

/// Stores one pipeline run and returns its id.
pub async fn save_run(
    pool: &PgPool,
    config: &PipelineConfig,
    clustering: Option<&ClusterAssignment>,
    run: &ForecastRun,
) -> anyhow::Result<Uuid> {
    let run_id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO outbreak_early_warning.pipeline_runs
        (id, strategy, config, pair_count, triggered_count)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(run_id)
    .bind(config.strategy.to_string())
    .bind(serde_json::to_string(config)?)
    .bind(i32::try_from(run.outcomes.len() + run.failures.len())?)
    .bind(i32::try_from(run.triggered_count())?)
    .execute(&mut *tx)
    .await?;

    for record in alert_records(run) {
        sqlx::query(
            r#"
            INSERT INTO outbreak_early_warning.run_alerts
            (run_id, entity, disease, period_start, predicted_cases,
             lower_bound, upper_bound, threshold, triggered, action_text)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(run_id)
        .bind(&record.entity)
        .bind(&record.disease)
        .bind(record.period_start)
        .bind(record.predicted_cases)
        .bind(record.lower_bound)
        .bind(record.upper_bound)
        .bind(record.threshold)
        .bind(record.triggered)
        .bind(&record.action_text)
        .execute(&mut *tx)
        .await?;
    }

    if let Some(assignment) = clustering {
        for record in cluster_records(assignment) {
            sqlx::query(
                r#"
                INSERT INTO outbreak_early_warning.run_clusters (run_id, entity, cluster_id)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(run_id)
            .bind(&record.entity)
            .bind(i32::try_from(record.cluster_id)?)
            .execute(&mut *tx)
            .await?;
        }
    }

    for failure in &run.failures {
        sqlx::query(
            r#"
            INSERT INTO outbreak_early_warning.run_failures (run_id, entity, disease, kind, message)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(run_id)
        .bind(&failure.entity)
        .bind(&failure.disease)
        .bind(failure.kind.as_str())
        .bind(&failure.message)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::info!(%run_id, "stored pipeline run");
    Ok(run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(entity: &str, cases: u32, source_key: Option<&str>) -> CaseRow {
        CaseRow {
            entity: entity.to_string(),
            disease: "cholera".to_string(),
            report_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            cases,
            source_key: source_key.map(str::to_string),
        }
    }

    #[test]
    fn identical_rows_get_distinct_keys() {
        let rows = vec![row("Lagos", 1, None), row("Lagos", 1, None)];
        let keys = source_keys("clinic_a", &rows);
        assert_eq!(
            keys,
            vec![
                "import-clinic_a-Lagos-cholera-2024-01-01-1-0".to_string(),
                "import-clinic_a-Lagos-cholera-2024-01-01-1-1".to_string(),
            ]
        );
    }

    #[test]
    fn keys_are_stable_across_reimports() {
        let rows = vec![row("Lagos", 1, None), row("Kano", 4, None), row("Lagos", 1, None)];
        assert_eq!(source_keys("cases", &rows), source_keys("cases", &rows));
        assert_ne!(source_keys("cases", &rows), source_keys("other", &rows));
    }

    #[test]
    fn explicit_keys_are_kept() {
        let rows = vec![row("Lagos", 1, Some(" ng-001 ")), row("Lagos", 1, Some(""))];
        let keys = source_keys("cases", &rows);
        assert_eq!(keys[0], "ng-001");
        assert_eq!(keys[1], "import-cases-Lagos-cholera-2024-01-01-1-0");
    }
}
