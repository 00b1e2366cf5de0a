//! K-means clustering of entity disease-burden profiles.
//!
//! Profiles are standardized per disease (zero mean, unit population variance)
//! before Lloyd's iterations, so high-volume diseases do not dominate the
//! distance. Initialization is k-means++ from a seeded ChaCha stream and the
//! best of several restarts is kept, which makes every run reproducible.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{PipelineError, Result};
use crate::models::{ClusterAssignment, EntityProfile};
use crate::stats;

#[derive(Debug, Clone)]
pub struct Clusterer {
    k: usize,
    seed: u64,
    max_iterations: usize,
    restarts: usize,
}

struct LloydRun {
    labels: Vec<usize>,
    centroids: Vec<Vec<f64>>,
    inertia: f64,
    iterations: usize,
}

impl Clusterer {
    pub fn new(k: usize, seed: u64, max_iterations: usize, restarts: usize) -> Result<Self> {
        if k == 0 {
            return Err(PipelineError::Configuration(
                "cluster count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            k,
            seed,
            max_iterations: max_iterations.max(1),
            restarts: restarts.max(1),
        })
    }

    pub fn cluster(&self, profile: &EntityProfile) -> Result<ClusterAssignment> {
        let n = profile.len();
        if n == 0 || n < self.k {
            return Err(PipelineError::InsufficientData {
                required: self.k.max(1),
                actual: n,
            });
        }

        let entities: Vec<&String> = profile.vectors.keys().collect();
        let rows: Vec<&Vec<f64>> = profile.vectors.values().collect();
        let points = standardize(&rows, profile.diseases.len());

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut best: Option<LloydRun> = None;
        for restart in 0..self.restarts {
            let initial = kmeans_plus_plus(&points, self.k, &mut rng);
            let run = self.lloyd(&points, initial);
            tracing::debug!(
                restart,
                inertia = run.inertia,
                iterations = run.iterations,
                "k-means restart finished"
            );
            if best.as_ref().map_or(true, |b| run.inertia < b.inertia) {
                best = Some(run);
            }
        }

        let best = best.ok_or_else(|| PipelineError::InsufficientData {
            required: self.k,
            actual: n,
        })?;

        let labels = entities
            .into_iter()
            .cloned()
            .zip(best.labels.iter().copied())
            .collect();

        Ok(ClusterAssignment {
            k: self.k,
            labels,
            centroids: best.centroids,
            inertia: best.inertia,
            iterations: best.iterations,
        })
    }

    fn lloyd(&self, points: &[Vec<f64>], mut centroids: Vec<Vec<f64>>) -> LloydRun {
        let mut labels = assign(points, &centroids);
        let mut iterations = 0;
        let mut stable = false;

        for _ in 0..self.max_iterations {
            iterations += 1;
            centroids = update_centroids(points, &labels, &centroids);
            let next = assign(points, &centroids);
            if next == labels {
                stable = true;
                break;
            }
            labels = next;
        }
        if !stable {
            // Budget ran out after a reassignment; centroids must match the final labels.
            centroids = update_centroids(points, &labels, &centroids);
        }

        let inertia = points
            .iter()
            .zip(&labels)
            .map(|(point, &label)| squared_distance(point, &centroids[label]))
            .sum();

        LloydRun {
            labels,
            centroids,
            inertia,
            iterations,
        }
    }
}

/// Column-wise z-scores; zero-variance columns stay at zero.
fn standardize(rows: &[&Vec<f64>], dims: usize) -> Vec<Vec<f64>> {
    let mut points = vec![vec![0.0; dims]; rows.len()];
    for dim in 0..dims {
        let column: Vec<f64> = rows.iter().map(|row| row[dim]).collect();
        let mean = stats::mean(&column);
        let std = stats::population_stddev(&column);
        if std <= f64::EPSILON {
            continue;
        }
        for (point, value) in points.iter_mut().zip(&column) {
            point[dim] = (value - mean) / std;
        }
    }
    points
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Nearest centroid per point; ties go to the lowest centroid index.
fn assign(points: &[Vec<f64>], centroids: &[Vec<f64>]) -> Vec<usize> {
    points
        .iter()
        .map(|point| {
            let mut best = 0;
            let mut best_distance = f64::INFINITY;
            for (idx, centroid) in centroids.iter().enumerate() {
                let distance = squared_distance(point, centroid);
                if distance < best_distance {
                    best = idx;
                    best_distance = distance;
                }
            }
            best
        })
        .collect()
}

fn update_centroids(
    points: &[Vec<f64>],
    labels: &[usize],
    previous: &[Vec<f64>],
) -> Vec<Vec<f64>> {
    let k = previous.len();
    let dims = points.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0; dims]; k];
    let mut counts = vec![0usize; k];

    for (point, &label) in points.iter().zip(labels) {
        counts[label] += 1;
        for (sum, value) in sums[label].iter_mut().zip(point) {
            *sum += value;
        }
    }

    let mut relocated: Vec<usize> = Vec::new();
    let mut centroids = Vec::with_capacity(k);
    for (cluster, (sum, count)) in sums.into_iter().zip(&counts).enumerate() {
        if *count > 0 {
            centroids.push(sum.into_iter().map(|s| s / *count as f64).collect());
            continue;
        }
        // Empty cluster: move it onto the point worst served by its centroid.
        let farthest = points
            .iter()
            .zip(labels)
            .enumerate()
            .filter(|(idx, _)| !relocated.contains(idx))
            .map(|(idx, (point, &label))| (idx, squared_distance(point, &previous[label])))
            .fold(None, |best: Option<(usize, f64)>, (idx, distance)| match best {
                Some((_, best_distance)) if best_distance >= distance => best,
                _ => Some((idx, distance)),
            });
        match farthest {
            Some((idx, _)) => {
                relocated.push(idx);
                centroids.push(points[idx].clone());
            }
            None => centroids.push(previous[cluster].clone()),
        }
    }
    centroids
}

/// k-means++ seeding: each new centroid is drawn with probability
/// proportional to its squared distance from the nearest chosen centroid.
fn kmeans_plus_plus(points: &[Vec<f64>], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut chosen = vec![rng.gen_range(0..n)];

    while chosen.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|point| {
                chosen
                    .iter()
                    .map(|&c| squared_distance(point, &points[c]))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = weights.iter().sum();

        let next = if total > 0.0 {
            weighted_pick(&weights, rng.gen::<f64>() * total)
        } else {
            // Every remaining point coincides with a centroid.
            (0..n).find(|idx| !chosen.contains(idx)).unwrap_or(0)
        };
        chosen.push(next);
    }

    chosen.into_iter().map(|idx| points[idx].clone()).collect()
}

/// First index whose running weight exceeds `target`. Rounding can leave the
/// running total short of `target`; the last positively weighted index is
/// used then, so an existing centroid (weight zero) is never picked.
fn weighted_pick(weights: &[f64], target: f64) -> usize {
    let mut cumulative = 0.0;
    for (idx, weight) in weights.iter().enumerate() {
        cumulative += weight;
        if cumulative > target && *weight > 0.0 {
            return idx;
        }
    }
    weights
        .iter()
        .rposition(|weight| *weight > 0.0)
        .unwrap_or(weights.len().saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn profile(rows: &[(&str, Vec<f64>)]) -> EntityProfile {
        let dims = rows.first().map_or(0, |(_, v)| v.len());
        EntityProfile {
            diseases: (0..dims).map(|d| format!("disease_{d}")).collect(),
            vectors: rows
                .iter()
                .map(|(entity, values)| (entity.to_string(), values.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn clusterer(k: usize) -> Clusterer {
        Clusterer::new(k, 42, 300, 10).unwrap()
    }

    #[test]
    fn pure_profiles_do_not_share_a_cluster() {
        let data = profile(&[
            ("Entity1", vec![100.0, 0.0, 0.0]),
            ("Entity2", vec![0.0, 100.0, 0.0]),
            ("Mixed", vec![50.0, 50.0, 0.0]),
        ]);
        let assignment = clusterer(2).cluster(&data).unwrap();
        assert_ne!(
            assignment.cluster_of("Entity1"),
            assignment.cluster_of("Entity2")
        );
    }

    #[test]
    fn separates_well_spaced_groups() {
        let data = profile(&[
            ("A1", vec![100.0, 1.0]),
            ("A2", vec![98.0, 2.0]),
            ("A3", vec![103.0, 0.0]),
            ("B1", vec![1.0, 90.0]),
            ("B2", vec![0.0, 95.0]),
            ("B3", vec![2.0, 88.0]),
        ]);
        let assignment = clusterer(2).cluster(&data).unwrap();
        let a = assignment.cluster_of("A1");
        assert_eq!(assignment.cluster_of("A2"), a);
        assert_eq!(assignment.cluster_of("A3"), a);
        let b = assignment.cluster_of("B1");
        assert_ne!(a, b);
        assert_eq!(assignment.cluster_of("B2"), b);
        assert_eq!(assignment.cluster_of("B3"), b);
        assert_eq!(assignment.members(a.unwrap()).len(), 3);
    }

    #[test]
    fn fewer_entities_than_clusters_fails() {
        let data = profile(&[("Lagos", vec![1.0]), ("Kano", vec![2.0])]);
        let err = clusterer(3).cluster(&data).unwrap_err();
        assert_eq!(
            err,
            PipelineError::InsufficientData {
                required: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn zero_clusters_is_a_configuration_error() {
        assert!(matches!(
            Clusterer::new(0, 42, 10, 1),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn zero_variance_dimensions_do_not_produce_nan() {
        let data = profile(&[
            ("Lagos", vec![5.0, 0.0]),
            ("Kano", vec![5.0, 0.0]),
            ("Oyo", vec![5.0, 0.0]),
        ]);
        let assignment = clusterer(2).cluster(&data).unwrap();
        assert!(assignment.inertia.is_finite());
        assert_eq!(assignment.labels.len(), 3);
        for centroid in &assignment.centroids {
            assert!(centroid.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn single_cluster_holds_everyone() {
        let data = profile(&[("Lagos", vec![5.0]), ("Kano", vec![9.0])]);
        let assignment = clusterer(1).cluster(&data).unwrap();
        assert!(assignment.labels.values().all(|&label| label == 0));
    }

    #[test]
    fn does_not_mutate_input() {
        let data = profile(&[
            ("Lagos", vec![5.0, 1.0]),
            ("Kano", vec![9.0, 3.0]),
            ("Oyo", vec![1.0, 7.0]),
        ]);
        let before = data.clone();
        let _ = clusterer(2).cluster(&data).unwrap();
        assert_eq!(data, before);
    }

    fn arb_profile() -> impl Strategy<Value = (EntityProfile, usize)> {
        (3usize..16, 1usize..4).prop_flat_map(|(n, dims)| {
            (
                prop::collection::vec(prop::collection::vec(0.0f64..500.0, dims), n),
                1usize..=3,
            )
                .prop_map(move |(rows, k)| {
                    let vectors = rows
                        .into_iter()
                        .enumerate()
                        .map(|(idx, row)| (format!("entity_{idx:02}"), row))
                        .collect();
                    let profile = EntityProfile {
                        diseases: (0..dims).map(|d| format!("disease_{d}")).collect(),
                        vectors,
                    };
                    (profile, k)
                })
        })
    }

    proptest! {
        #[test]
        fn every_entity_gets_exactly_one_valid_label((data, k) in arb_profile()) {
            let assignment = clusterer(k).cluster(&data).unwrap();
            prop_assert_eq!(assignment.labels.len(), data.len());
            for entity in data.vectors.keys() {
                let label = assignment.cluster_of(entity);
                prop_assert!(label.is_some());
                prop_assert!(label.unwrap() < k);
            }
        }

        #[test]
        fn repeated_runs_are_identical((data, k) in arb_profile()) {
            let first = clusterer(k).cluster(&data).unwrap();
            let second = clusterer(k).cluster(&data).unwrap();
            prop_assert_eq!(first, second);
        }
    }

    #[test]
    fn exhausted_budget_reports_centroids_of_final_labels() {
        let points: Vec<Vec<f64>> = [0.0, 1.0, 2.0, 10.0, 11.0, 12.0]
            .iter()
            .map(|v| vec![*v])
            .collect();
        let run = Clusterer::new(2, 42, 1, 1)
            .unwrap()
            .lloyd(&points, vec![vec![0.0], vec![1.0]]);

        assert_eq!(run.iterations, 1);
        assert_eq!(run.labels, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(run.centroids, vec![vec![1.0], vec![11.0]]);
        assert_eq!(run.inertia, 4.0);
    }

    #[test]
    fn weighted_pick_never_returns_a_zero_weight_point() {
        let weights = [1.0, 2.0, 0.0];
        assert_eq!(weighted_pick(&weights, 0.5), 0);
        assert_eq!(weighted_pick(&weights, 1.5), 1);
        // Target at or past the total, as float rounding can produce.
        assert_eq!(weighted_pick(&weights, 3.0), 1);
        assert_eq!(weighted_pick(&[0.0, 4.0, 0.0, 0.0], 9.0), 1);
    }
}
