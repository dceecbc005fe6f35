//! Convergence detection over the best-score history.
//!
//! Tracks the pool's best average score per step and fires on any of:
//! plateau (no improvement greater than epsilon for `plateau_steps`
//! consecutive steps), a configured target score, or the standard deviation
//! of the last `variance_window` entries falling below epsilon. Insufficient
//! history always means "continue" — never a false convergence.

use crate::config::OptimizerConfig;

#[derive(Debug, Clone)]
pub struct ConvergenceDetector {
    epsilon: f64,
    plateau_steps: usize,
    variance_window: usize,
    target_score: Option<f64>,
    history: Vec<f64>,
}

impl ConvergenceDetector {
    pub fn new(config: &OptimizerConfig) -> Self {
        Self {
            epsilon: config.convergence_epsilon,
            plateau_steps: config.plateau_steps,
            variance_window: config.variance_window,
            target_score: config.target_score,
            history: Vec::new(),
        }
    }

    /// Record the best pool average after a step.
    pub fn record(&mut self, best_score: f64) {
        self.history.push(best_score);
    }

    /// Latest recorded best score, if any.
    pub fn best(&self) -> Option<f64> {
        self.history.last().copied()
    }

    pub fn converged(&self) -> bool {
        self.target_reached() || self.plateaued() || self.variance_collapsed()
    }

    fn target_reached(&self) -> bool {
        match (self.target_score, self.history.last()) {
            (Some(target), Some(&best)) => best >= target,
            _ => false,
        }
    }

    /// No step-over-step improvement greater than epsilon for
    /// `plateau_steps` consecutive steps.
    fn plateaued(&self) -> bool {
        let n = self.history.len();
        if n < self.plateau_steps + 1 {
            return false;
        }
        self.history[n - self.plateau_steps..]
            .iter()
            .zip(&self.history[n - self.plateau_steps - 1..])
            .all(|(current, previous)| current - previous <= self.epsilon)
    }

    fn variance_collapsed(&self) -> bool {
        let n = self.history.len();
        if n < self.variance_window {
            return false;
        }
        let window = &self.history[n - self.variance_window..];
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let variance = window
            .iter()
            .map(|score| {
                let d = score - mean;
                d * d
            })
            .sum::<f64>()
            / window.len() as f64;
        variance.sqrt() < self.epsilon
    }
}
