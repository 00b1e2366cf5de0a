use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use outbreak_early_warning::aggregate::aggregate;
use outbreak_early_warning::config::{ForecastStrategy, ShortHistoryPolicy};
use outbreak_early_warning::models::{CaseRecord, Granularity};
use outbreak_early_warning::recommend::display_name;
use outbreak_early_warning::{db, export, ingest, pipeline, report, PipelineConfig};

#[derive(Parser)]
#[command(name = "outbreak-early-warning")]
#[command(about = "Disease outbreak forecasting and early warning alerts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load two years of synthetic weekly case reports
    Seed,
    /// Import case reports from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Group entities by their disease burden
    Cluster {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },
    /// Forecast each series and flag periods above the alert threshold
    Forecast {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long)]
        entity: Option<String>,
        #[arg(long)]
        disease: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
        /// Store the run in Postgres
        #[arg(long)]
        save: bool,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long)]
        entity: Option<String>,
        #[arg(long)]
        disease: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long)]
        save: bool,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Read case reports from a CSV file instead of Postgres
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Ignore reports dated before this day (YYYY-MM-DD)
    #[arg(long)]
    since: Option<NaiveDate>,
}

#[derive(Args)]
struct ModelArgs {
    /// JSON file with pipeline settings; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    clusters: Option<usize>,
    #[arg(long)]
    horizon: Option<usize>,
    /// Standard deviations above the historical mean that trigger an alert
    #[arg(long)]
    z: Option<f64>,
    #[arg(long)]
    strategy: Option<ForecastStrategy>,
    #[arg(long)]
    granularity: Option<Granularity>,
    /// Fit a non-seasonal model for series shorter than the minimum history
    #[arg(long)]
    fallback: bool,
}

impl ModelArgs {
    fn resolve(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(clusters) = self.clusters {
            config.clusters = clusters;
        }
        if let Some(horizon) = self.horizon {
            config.horizon = horizon;
        }
        if let Some(z) = self.z {
            config.alert_z = z;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        if let Some(granularity) = self.granularity {
            config.granularity = granularity;
        }
        if self.fallback {
            config.short_history = ShortHistoryPolicy::Fallback;
        }
        config.validate().context("invalid pipeline configuration")?;
        Ok(config)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

fn write_rows<T: Serialize>(path: &Path, format: OutputFormat, rows: &[T]) -> anyhow::Result<()> {
    match format {
        OutputFormat::Csv => export::write_csv(path, rows),
        OutputFormat::Json => export::write_json(path, rows),
    }
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

/// Case records from the CSV file if one was given, otherwise from Postgres.
/// The pool is returned when it was opened.
async fn load_records(source: &SourceArgs) -> anyhow::Result<(Vec<CaseRecord>, Option<PgPool>)> {
    match &source.csv {
        Some(path) => {
            let mut records = ingest::read_case_records(path)?;
            if let Some(since) = source.since {
                records.retain(|record| record.report_date >= since);
            }
            Ok((records, None))
        }
        None => {
            let pool = connect().await?;
            let records = db::fetch_case_records(&pool, source.since).await?;
            Ok((records, Some(pool)))
        }
    }
}

async fn ensure_pool(pool: Option<PgPool>) -> anyhow::Result<PgPool> {
    match pool {
        Some(pool) => Ok(pool),
        None => connect().await,
    }
}

fn normalize_disease(disease: Option<String>) -> Option<String> {
    disease.map(|d| d.trim().to_ascii_lowercase())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("outbreak_early_warning=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            let inserted = db::seed(&pool).await?;
            println!("Inserted {inserted} seed case reports.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} case reports from {}.", csv.display());
        }
        Commands::Cluster {
            source,
            model,
            out,
            format,
        } => {
            let config = model.resolve()?;
            let (records, _) = load_records(&source).await?;
            let series = aggregate(&records, config.granularity);

            let assignment = tokio::task::spawn_blocking(move || {
                pipeline::run_clustering(&series, &config)
            })
            .await??;

            println!(
                "Clustered {} entities into {} groups (inertia {:.3}):",
                assignment.labels.len(),
                assignment.k,
                assignment.inertia
            );
            for cluster_id in 0..assignment.k {
                println!("- Cluster {}: {}", cluster_id, assignment.members(cluster_id).join(", "));
            }

            if let Some(out) = out {
                write_rows(&out, format, &pipeline::cluster_records(&assignment))?;
                println!("Cluster assignments written to {}.", out.display());
            }
        }
        Commands::Forecast {
            source,
            model,
            entity,
            disease,
            out,
            format,
            save,
            limit,
        } => {
            let config = model.resolve()?;
            let disease = normalize_disease(disease);
            let (records, pool) = load_records(&source).await?;
            let series = aggregate(&records, config.granularity);
            let pairs = pipeline::select_pairs(&series, entity.as_deref(), disease.as_deref());

            if pairs.is_empty() {
                println!("No series match this selection.");
                return Ok(());
            }

            let run_config = config.clone();
            let run = tokio::task::spawn_blocking(move || {
                pipeline::run_forecasts(&series, &pairs, &run_config)
            })
            .await??;

            let rows = pipeline::alert_records(&run);
            let triggered: Vec<_> = rows.iter().filter(|row| row.triggered).collect();
            println!(
                "Forecast {} series ({} skipped), {} periods above threshold.",
                run.outcomes.len(),
                run.failures.len(),
                triggered.len()
            );
            for row in triggered.iter().take(limit) {
                println!(
                    "- {} in {} week of {}: forecast {:.2} vs threshold {:.2}",
                    display_name(&row.disease),
                    row.entity,
                    row.period_start,
                    row.predicted_cases,
                    row.threshold
                );
            }
            for failure in run.failures.iter() {
                println!(
                    "- skipped {} / {} ({})",
                    failure.entity,
                    failure.disease,
                    failure.kind.as_str()
                );
            }

            if let Some(out) = out {
                write_rows(&out, format, &rows)?;
                println!("Alerts written to {}.", out.display());
                if !run.failures.is_empty() {
                    let skipped = export::sibling_path(&out, "skipped");
                    write_rows(&skipped, format, &run.failures)?;
                    println!("Skipped series written to {}.", skipped.display());
                }
            }

            if save {
                let pool = ensure_pool(pool).await?;
                let run_id = db::save_run(&pool, &config, None, &run).await?;
                println!("Run saved as {run_id}.");
            }
        }
        Commands::Report {
            source,
            model,
            entity,
            disease,
            out,
            save,
        } => {
            let config = model.resolve()?;
            let disease = normalize_disease(disease);
            let (records, pool) = load_records(&source).await?;

            let trends = match &pool {
                Some(pool) => {
                    db::fetch_weekly_trends(
                        pool,
                        source.since,
                        entity.as_deref(),
                        disease.as_deref(),
                    )
                    .await?
                }
                None => {
                    let scoped: Vec<CaseRecord> = records
                        .iter()
                        .filter(|r| entity.as_deref().map_or(true, |e| r.entity == e))
                        .filter(|r| disease.as_deref().map_or(true, |d| r.disease == d))
                        .cloned()
                        .collect();
                    report::case_trends(&aggregate(&scoped, Granularity::Weekly))
                }
            };

            let series = aggregate(&records, config.granularity);
            let pairs = pipeline::select_pairs(&series, entity.as_deref(), disease.as_deref());
            let run_config = config.clone();
            let (series, output) = tokio::task::spawn_blocking(move || {
                let output = pipeline::run(&series, &pairs, &run_config);
                (series, output)
            })
            .await?;
            let output = output?;

            let scope = entity.as_deref().or(disease.as_deref());
            let body = report::build_report(
                scope,
                &series,
                &output.clustering,
                &output.forecasts,
                &trends,
            );
            std::fs::write(&out, body)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());

            if save {
                let pool = ensure_pool(pool).await?;
                let clustering = output.clustering.as_ref().ok();
                let run_id = db::save_run(&pool, &config, clustering, &output.forecasts).await?;
                println!("Run saved as {run_id}.");
            }
        }
    }

    Ok(())
}
