use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{PipelineError, Result};
use crate::models::{BucketedSeries, EntityProfile};

/// Sums each entity's bucketed counts per disease, in `diseases` order.
///
/// A disease that no series reports becomes an all-zero column. Series for
/// diseases outside the ordering are not tracked and do not contribute.
pub fn build_profiles(series: &BucketedSeries, diseases: &[String]) -> Result<EntityProfile> {
    if diseases.is_empty() {
        return Err(PipelineError::Configuration(
            "disease ordering is empty".to_string(),
        ));
    }
    let unique: BTreeSet<&str> = diseases.iter().map(String::as_str).collect();
    if unique.len() != diseases.len() {
        return Err(PipelineError::Configuration(
            "disease ordering contains duplicates".to_string(),
        ));
    }

    let column: HashMap<&str, usize> = diseases
        .iter()
        .enumerate()
        .map(|(idx, disease)| (disease.as_str(), idx))
        .collect();

    let mut vectors: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (key, values) in series.iter() {
        let row = vectors
            .entry(key.entity.clone())
            .or_insert_with(|| vec![0.0; diseases.len()]);
        if let Some(&idx) = column.get(key.disease.as_str()) {
            row[idx] += values.iter().map(|v| v.count as f64).sum::<f64>();
        }
    }

    if vectors.is_empty() {
        return Err(PipelineError::InsufficientData {
            required: 1,
            actual: 0,
        });
    }

    let missing: Vec<&str> = diseases
        .iter()
        .filter(|disease| !series.keys().any(|key| &key.disease == *disease))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        tracing::debug!(?missing, "diseases with no reports are profiled as zero");
    }

    Ok(EntityProfile {
        diseases: diseases.to_vec(),
        vectors,
    })
}
