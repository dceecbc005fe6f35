//! Optimizer configuration.
//!
//! Every threshold the search loop consults is an explicit, named field here;
//! nothing is hard-coded at the call sites. All fields carry serde defaults so
//! partial configurations deserialize cleanly.

use serde::{Deserialize, Serialize};

use crate::error::OptimizeError;
use crate::program::SamplingConfig;

/// Hard cap on concurrent execution units.
pub const MAX_CONCURRENCY: usize = 256;

/// Configuration for an optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum optimization steps. Zero returns the baseline unchanged.
    pub max_steps: usize,
    /// Mini-batch size per step.
    pub batch_size: usize,
    /// Maximum candidate programs produced per step.
    pub num_candidates: usize,
    /// Maximum demonstrations held by a program; oldest evicted beyond this.
    pub max_demos: usize,
    /// Pool slice considered for trajectory sourcing (plus the baseline).
    pub top_k: usize,
    /// Pool size cap; pruning keeps the baseline plus the top `pool_cap - 1`.
    pub pool_cap: usize,
    /// Sampling-parameter variants crossed with the mini-batch each step.
    pub sampling_variants: Vec<SamplingConfig>,
    /// Softmax temperature for trajectory source selection over the top-k.
    pub sampling_temperature: f64,
    /// Softmax temperature for mutation source selection over the whole pool.
    pub candidate_temperature: f64,
    /// Buckets need `max_to_min_gap` above this to enter the strategy phase.
    pub gap_threshold: f64,
    /// Buckets need `max_score` above this to enter the strategy phase.
    pub quality_floor: f64,
    /// Score at or above which a trajectory counts as "successful" for the
    /// append-rule partition.
    pub quality_threshold: f64,
    /// Candidate evaluation score above which it enters the winners list.
    pub winner_threshold: f64,
    /// Bound on the winners list; oldest evicted beyond this.
    pub winners_cap: usize,
    /// Average assumed for the baseline before it has any recorded scores.
    /// Untested non-baseline programs score `0.0` instead.
    pub baseline_default_score: f64,
    /// Optional early-stop target for the best pool average.
    pub target_score: Option<f64>,
    /// Minimum improvement that counts as progress for plateau detection, and
    /// the std threshold for the variance stop.
    pub convergence_epsilon: f64,
    /// Consecutive no-progress steps before the plateau stop fires.
    pub plateau_steps: usize,
    /// Window length for the best-score variance stop.
    pub variance_window: usize,
    /// Maximum concurrent execution units.
    pub max_concurrency: usize,
    /// Per-unit execution deadline in milliseconds.
    pub task_timeout_ms: u64,
    /// Optional aggregate deadline per step; outstanding units at expiry are
    /// recorded as failures and the step proceeds with what completed.
    pub step_timeout_ms: Option<u64>,
    /// Seed for every stochastic choice in the run.
    pub rng_seed: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_steps: 12,
            batch_size: 8,
            num_candidates: 4,
            max_demos: 4,
            top_k: 4,
            pool_cap: 16,
            sampling_variants: vec![
                SamplingConfig {
                    temperature: 0.7,
                    top_p: None,
                },
                SamplingConfig {
                    temperature: 1.0,
                    top_p: None,
                },
            ],
            sampling_temperature: 0.2,
            candidate_temperature: 0.2,
            gap_threshold: 0.01,
            quality_floor: 0.1,
            quality_threshold: 0.5,
            winner_threshold: 0.9,
            winners_cap: 8,
            baseline_default_score: 0.05,
            target_score: None,
            convergence_epsilon: 1e-3,
            plateau_steps: 5,
            variance_window: 5,
            max_concurrency: 16,
            task_timeout_ms: 60_000,
            step_timeout_ms: None,
            rng_seed: 1337,
        }
    }
}

impl OptimizerConfig {
    /// Validate the configuration against a trainset of `trainset_len`
    /// examples. Called before the first step; failures are fatal.
    pub fn validate(&self, trainset_len: usize) -> Result<(), OptimizeError> {
        if trainset_len == 0 {
            return Err(OptimizeError::InvalidConfig(
                "trainset must not be empty".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(OptimizeError::InvalidConfig(
                "batch_size must be >= 1".into(),
            ));
        }
        if self.num_candidates == 0 {
            return Err(OptimizeError::InvalidConfig(
                "num_candidates must be >= 1".into(),
            ));
        }
        if self.max_demos == 0 {
            return Err(OptimizeError::InvalidConfig(
                "max_demos must be >= 1".into(),
            ));
        }
        if self.top_k == 0 {
            return Err(OptimizeError::InvalidConfig("top_k must be >= 1".into()));
        }
        if self.pool_cap < 2 {
            return Err(OptimizeError::InvalidConfig(
                "pool_cap must be >= 2 (baseline plus at least one candidate)".into(),
            ));
        }
        if self.sampling_variants.is_empty() {
            return Err(OptimizeError::InvalidConfig(
                "sampling_variants must not be empty".into(),
            ));
        }
        for (idx, variant) in self.sampling_variants.iter().enumerate() {
            if !variant.temperature.is_finite() || variant.temperature < 0.0 {
                return Err(OptimizeError::InvalidConfig(format!(
                    "sampling_variants[{idx}].temperature must be finite and >= 0"
                )));
            }
        }
        for (name, value) in [
            ("sampling_temperature", self.sampling_temperature),
            ("candidate_temperature", self.candidate_temperature),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(OptimizeError::InvalidConfig(format!(
                    "{name} must be finite and >= 0"
                )));
            }
        }
        for (name, value) in [
            ("gap_threshold", self.gap_threshold),
            ("quality_floor", self.quality_floor),
            ("quality_threshold", self.quality_threshold),
            ("winner_threshold", self.winner_threshold),
        ] {
            if !value.is_finite() {
                return Err(OptimizeError::InvalidConfig(format!(
                    "{name} must be finite"
                )));
            }
        }
        if !(self.baseline_default_score.is_finite() && self.baseline_default_score > 0.0) {
            return Err(OptimizeError::InvalidConfig(
                "baseline_default_score must be finite and > 0".into(),
            ));
        }
        if !(self.convergence_epsilon.is_finite() && self.convergence_epsilon > 0.0) {
            return Err(OptimizeError::InvalidConfig(
                "convergence_epsilon must be finite and > 0".into(),
            ));
        }
        if self.plateau_steps == 0 {
            return Err(OptimizeError::InvalidConfig(
                "plateau_steps must be >= 1".into(),
            ));
        }
        if self.variance_window < 2 {
            return Err(OptimizeError::InvalidConfig(
                "variance_window must be >= 2".into(),
            ));
        }
        if self.winners_cap == 0 {
            return Err(OptimizeError::InvalidConfig(
                "winners_cap must be >= 1".into(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(OptimizeError::InvalidConfig(
                "max_concurrency must be >= 1".into(),
            ));
        }
        if self.max_concurrency > MAX_CONCURRENCY {
            return Err(OptimizeError::InvalidConfig(format!(
                "max_concurrency must be <= {MAX_CONCURRENCY}"
            )));
        }
        if self.task_timeout_ms == 0 {
            return Err(OptimizeError::InvalidConfig(
                "task_timeout_ms must be >= 1".into(),
            ));
        }
        if matches!(self.step_timeout_ms, Some(0)) {
            return Err(OptimizeError::InvalidConfig(
                "step_timeout_ms must be >= 1 when set".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        OptimizerConfig::default().validate(10).unwrap();
    }

    #[test]
    fn rejects_empty_trainset() {
        let err = OptimizerConfig::default().validate(0).unwrap_err();
        assert!(matches!(err, OptimizeError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let cfg = OptimizerConfig {
            batch_size: 0,
            ..OptimizerConfig::default()
        };
        assert!(cfg.validate(10).is_err());
    }

    #[test]
    fn rejects_empty_sampling_variants() {
        let cfg = OptimizerConfig {
            sampling_variants: Vec::new(),
            ..OptimizerConfig::default()
        };
        assert!(cfg.validate(10).is_err());
    }

    #[test]
    fn rejects_pool_cap_below_two() {
        let cfg = OptimizerConfig {
            pool_cap: 1,
            ..OptimizerConfig::default()
        };
        assert!(cfg.validate(10).is_err());
    }

    #[test]
    fn rejects_concurrency_above_cap() {
        let cfg = OptimizerConfig {
            max_concurrency: MAX_CONCURRENCY + 1,
            ..OptimizerConfig::default()
        };
        assert!(cfg.validate(10).is_err());
    }

    #[test]
    fn rejects_negative_sampling_temperature() {
        let cfg = OptimizerConfig {
            sampling_temperature: -0.1,
            ..OptimizerConfig::default()
        };
        assert!(cfg.validate(10).is_err());
    }

    #[test]
    fn rejects_zero_step_timeout() {
        let cfg = OptimizerConfig {
            step_timeout_ms: Some(0),
            ..OptimizerConfig::default()
        };
        assert!(cfg.validate(10).is_err());
    }

    #[test]
    fn partial_config_deserializes_with_defaults() {
        let cfg: OptimizerConfig = serde_json::from_str(r#"{"max_steps": 3}"#).unwrap();
        assert_eq!(cfg.max_steps, 3);
        assert_eq!(cfg.batch_size, OptimizerConfig::default().batch_size);
    }
}
