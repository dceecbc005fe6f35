//! Trajectories and per-example bucket analysis.
//!
//! A trajectory is one scored execution of (program, example, sampling
//! config). The analyzer groups a step's trajectories by example, sorts each
//! group descending by score, and computes spread statistics that the
//! strategy engine uses to find the most actionable examples.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::program::{FieldMap, SamplingConfig};

/// One executed trial. Failed trials carry `score = 0.0`, `success = false`,
/// and the captured error.
#[derive(Debug, Clone)]
pub struct Trajectory {
    /// Pool index of the program that produced this trial.
    pub program_index: usize,
    /// Trainset index of the example.
    pub example_index: usize,
    /// Inputs handed to the executor.
    pub inputs: FieldMap,
    /// Outputs produced on success; empty on failure.
    pub outputs: FieldMap,
    /// Metric score; `0.0` on any failure.
    pub score: f64,
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
    /// Sampling parameters used for this trial.
    pub sampling: SamplingConfig,
}

/// All trajectories for one example within a step, with spread statistics.
///
/// Gap metrics are meaningful only with at least two trajectories; singleton
/// buckets report zero gaps and never pass strategy filtering.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub example_index: usize,
    /// Trajectories sorted descending by score.
    pub trajectories: Vec<Trajectory>,
    pub max_score: f64,
    pub min_score: f64,
    pub avg_score: f64,
    pub max_to_min_gap: f64,
    pub max_to_avg_gap: f64,
}

impl Bucket {
    fn from_trajectories(example_index: usize, mut trajectories: Vec<Trajectory>) -> Self {
        trajectories.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.program_index.cmp(&b.program_index))
        });

        let n = trajectories.len() as f64;
        let max_score = trajectories.first().map(|t| t.score).unwrap_or(0.0);
        let min_score = trajectories.last().map(|t| t.score).unwrap_or(0.0);
        let avg_score = trajectories.iter().map(|t| t.score).sum::<f64>() / n.max(1.0);

        let (max_to_min_gap, max_to_avg_gap) = if trajectories.len() >= 2 {
            (max_score - min_score, max_score - avg_score)
        } else {
            (0.0, 0.0)
        };

        Self {
            example_index,
            trajectories,
            max_score,
            min_score,
            avg_score,
            max_to_min_gap,
            max_to_avg_gap,
        }
    }
}

/// Group a step's trajectories by example and rank the buckets by
/// `(max_to_min_gap desc, max_score desc)`.
pub fn analyze_buckets(trajectories: Vec<Trajectory>) -> Vec<Bucket> {
    let mut by_example: BTreeMap<usize, Vec<Trajectory>> = BTreeMap::new();
    for trajectory in trajectories {
        by_example
            .entry(trajectory.example_index)
            .or_default()
            .push(trajectory);
    }

    let mut buckets: Vec<Bucket> = by_example
        .into_iter()
        .map(|(example_index, group)| Bucket::from_trajectories(example_index, group))
        .collect();

    buckets.sort_by(|a, b| {
        b.max_to_min_gap
            .partial_cmp(&a.max_to_min_gap)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.max_score
                    .partial_cmp(&a.max_score)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.example_index.cmp(&b.example_index))
    });
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::SamplingConfig;

    fn trajectory(example_index: usize, program_index: usize, score: f64) -> Trajectory {
        Trajectory {
            program_index,
            example_index,
            inputs: FieldMap::new(),
            outputs: FieldMap::new(),
            score,
            success: score > 0.0,
            error: None,
            duration: Duration::from_millis(5),
            sampling: SamplingConfig::default(),
        }
    }

    #[test]
    fn bucket_statistics_are_computed_per_example() {
        let buckets = analyze_buckets(vec![
            trajectory(0, 0, 0.2),
            trajectory(0, 1, 0.8),
            trajectory(0, 2, 0.5),
        ]);

        assert_eq!(buckets.len(), 1);
        let bucket = &buckets[0];
        assert!((bucket.max_score - 0.8).abs() < 1e-12);
        assert!((bucket.min_score - 0.2).abs() < 1e-12);
        assert!((bucket.avg_score - 0.5).abs() < 1e-12);
        assert!((bucket.max_to_min_gap - 0.6).abs() < 1e-12);
        assert!((bucket.max_to_avg_gap - 0.3).abs() < 1e-12);

        let scores: Vec<f64> = bucket.trajectories.iter().map(|t| t.score).collect();
        assert_eq!(scores, vec![0.8, 0.5, 0.2]);
    }

    #[test]
    fn analysis_is_idempotent() {
        let make = || {
            vec![
                trajectory(0, 0, 0.1),
                trajectory(0, 1, 0.9),
                trajectory(1, 0, 0.4),
                trajectory(1, 1, 0.4),
            ]
        };
        let first = analyze_buckets(make());
        let second = analyze_buckets(make());

        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.example_index, b.example_index);
            assert_eq!(a.max_score, b.max_score);
            assert_eq!(a.min_score, b.min_score);
            assert_eq!(a.avg_score, b.avg_score);
            assert_eq!(a.max_to_min_gap, b.max_to_min_gap);
            assert_eq!(a.max_to_avg_gap, b.max_to_avg_gap);
        }
    }

    #[test]
    fn buckets_rank_by_gap_then_max_score() {
        let buckets = analyze_buckets(vec![
            // Example 0: gap 0.2, max 0.9
            trajectory(0, 0, 0.9),
            trajectory(0, 1, 0.7),
            // Example 1: gap 0.6, max 0.6
            trajectory(1, 0, 0.6),
            trajectory(1, 1, 0.0),
            // Example 2: gap 0.2, max 0.4
            trajectory(2, 0, 0.4),
            trajectory(2, 1, 0.2),
        ]);

        let order: Vec<usize> = buckets.iter().map(|b| b.example_index).collect();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn singleton_bucket_reports_zero_gaps() {
        let buckets = analyze_buckets(vec![trajectory(3, 0, 0.7)]);
        let bucket = &buckets[0];
        assert_eq!(bucket.max_to_min_gap, 0.0);
        assert_eq!(bucket.max_to_avg_gap, 0.0);
        assert!((bucket.max_score - 0.7).abs() < 1e-12);
    }
}
