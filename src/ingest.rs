use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::models::CaseRecord;

/// One row of a long-form case report CSV:
/// `entity,disease,report_date,cases[,source_key]`.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseRow {
    pub entity: String,
    pub disease: String,
    pub report_date: NaiveDate,
    pub cases: u32,
    #[serde(default)]
    pub source_key: Option<String>,
}

impl CaseRow {
    pub fn into_record(self) -> CaseRecord {
        CaseRecord {
            entity: self.entity,
            disease: self.disease,
            report_date: self.report_date,
            count: self.cases,
        }
    }
}

pub fn read_case_rows(csv_path: &Path) -> anyhow::Result<Vec<CaseRow>> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut rows = Vec::new();

    for (idx, result) in reader.deserialize::<CaseRow>().enumerate() {
        let line = idx + 2;
        let mut row = result.with_context(|| format!("invalid case row on line {line}"))?;
        row.entity = row.entity.trim().to_string();
        row.disease = row.disease.trim().to_ascii_lowercase();
        if row.entity.is_empty() || row.disease.is_empty() {
            anyhow::bail!("line {line}: entity and disease must not be empty");
        }
        rows.push(row);
    }

    Ok(rows)
}

pub fn read_case_records(csv_path: &Path) -> anyhow::Result<Vec<CaseRecord>> {
    let rows = read_case_rows(csv_path)?;
    tracing::debug!(rows = rows.len(), path = %csv_path.display(), "read case CSV");
    Ok(rows.into_iter().map(CaseRow::into_record).collect())
}
