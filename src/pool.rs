//! Program pool: score histories, stochastic selection, pruning, winners.
//!
//! Index 0 is the immutable baseline reference and is never evicted. All
//! selection is score-driven: `softmax_sample` consumes real per-program
//! score-history averages, with a small positive default for the untested
//! baseline so it is never starved out of sourcing.

use std::cmp::Ordering;
use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::Rng;

use crate::program::Program;

/// Pool index of the baseline program.
pub const BASELINE_INDEX: usize = 0;

// =============================================================================
// Softmax sampling
// =============================================================================

/// Temperature-weighted stochastic selection over `(indices, scores)` pairs.
///
/// At `temperature = 0` this is deterministic greedy: the argmax index, with
/// ties broken by the lowest index. At `temperature > 0` it samples from
/// `softmax(score / temperature)`.
pub fn softmax_sample(
    indices: &[usize],
    scores: &[f64],
    temperature: f64,
    rng: &mut StdRng,
) -> Option<usize> {
    debug_assert_eq!(indices.len(), scores.len());
    if indices.is_empty() {
        return None;
    }

    if temperature <= 0.0 {
        let mut best_idx = indices[0];
        let mut best_score = scores[0];
        for (&idx, &score) in indices.iter().zip(scores.iter()).skip(1) {
            let better = match score.partial_cmp(&best_score) {
                Some(Ordering::Greater) => true,
                Some(Ordering::Equal) => idx < best_idx,
                _ => false,
            };
            if better {
                best_idx = idx;
                best_score = score;
            }
        }
        return Some(best_idx);
    }

    // Subtract the max before exponentiating for numerical stability.
    let max_score = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = scores
        .iter()
        .map(|&s| ((s - max_score) / temperature).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return Some(indices[0]);
    }

    let mut draw = rng.gen::<f64>() * total;
    for (&idx, &w) in indices.iter().zip(weights.iter()) {
        draw -= w;
        if draw <= 0.0 {
            return Some(idx);
        }
    }
    Some(indices[indices.len() - 1])
}

// =============================================================================
// Pool
// =============================================================================

/// All known program variants plus their append-only score histories.
#[derive(Debug, Clone)]
pub struct ProgramPool {
    programs: Vec<Program>,
    histories: Vec<Vec<f64>>,
    winners: VecDeque<Program>,
    baseline_default_score: f64,
}

impl ProgramPool {
    pub fn new(baseline: Program, baseline_default_score: f64) -> Self {
        Self {
            programs: vec![baseline],
            histories: vec![Vec::new()],
            winners: VecDeque::new(),
            baseline_default_score,
        }
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn program(&self, index: usize) -> &Program {
        &self.programs[index]
    }

    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    pub fn winners(&self) -> impl Iterator<Item = &Program> {
        self.winners.iter()
    }

    /// Add a candidate program with an empty history; returns its index.
    pub fn push_candidate(&mut self, program: Program) -> usize {
        self.programs.push(program);
        self.histories.push(Vec::new());
        self.programs.len() - 1
    }

    /// Append a score to a program's history.
    pub fn record_score(&mut self, index: usize, score: f64) {
        self.histories[index].push(score);
    }

    /// Average historical score for a program. An empty history resolves to
    /// the configured default for the baseline and `0.0` for everything else.
    pub fn average_score(&self, index: usize) -> f64 {
        let history = &self.histories[index];
        if history.is_empty() {
            if index == BASELINE_INDEX {
                self.baseline_default_score
            } else {
                0.0
            }
        } else {
            history.iter().sum::<f64>() / history.len() as f64
        }
    }

    /// Best average score across the pool.
    pub fn best_average(&self) -> f64 {
        (0..self.programs.len())
            .map(|i| self.average_score(i))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Stochastic pick over `indices` using their history averages.
    pub fn softmax_pick(
        &self,
        indices: &[usize],
        temperature: f64,
        rng: &mut StdRng,
    ) -> Option<usize> {
        let scores: Vec<f64> = indices.iter().map(|&i| self.average_score(i)).collect();
        softmax_sample(indices, &scores, temperature, rng)
    }

    /// All pool indices, for sourcing over the full pool.
    pub fn all_indices(&self) -> Vec<usize> {
        (0..self.programs.len()).collect()
    }

    /// Top `k` indices by average score (descending), with the baseline
    /// guaranteed present: if it did not make the cut, it replaces the
    /// lowest-scoring of the selected `k`.
    pub fn top_k_plus_baseline(&self, k: usize) -> Vec<usize> {
        let mut ranked = self.all_indices();
        ranked.sort_by(|&a, &b| {
            self.average_score(b)
                .partial_cmp(&self.average_score(a))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.cmp(&b))
        });
        ranked.truncate(k.max(1));

        if !ranked.contains(&BASELINE_INDEX) {
            // `ranked` is sorted descending; the last slot is the weakest.
            let last = ranked.len() - 1;
            ranked[last] = BASELINE_INDEX;
        }
        ranked
    }

    /// Prune to `cap` programs: the baseline plus the top `cap - 1` others by
    /// average score, reindexed consistently with histories remapped.
    pub fn prune(&mut self, cap: usize) {
        if self.programs.len() <= cap {
            return;
        }

        let mut others: Vec<usize> = (1..self.programs.len()).collect();
        others.sort_by(|&a, &b| {
            self.average_score(b)
                .partial_cmp(&self.average_score(a))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.cmp(&b))
        });
        others.truncate(cap.saturating_sub(1));
        // Preserve relative pool order so reindexing stays stable.
        others.sort_unstable();

        let mut keep = Vec::with_capacity(cap);
        keep.push(BASELINE_INDEX);
        keep.extend(others);

        let mut programs = Vec::with_capacity(keep.len());
        let mut histories = Vec::with_capacity(keep.len());
        for &old_index in &keep {
            programs.push(self.programs[old_index].clone());
            histories.push(std::mem::take(&mut self.histories[old_index]));
        }
        self.programs = programs;
        self.histories = histories;
    }

    /// Prepend a winner, evicting the oldest beyond `cap`.
    pub fn record_winner(&mut self, program: Program, cap: usize) {
        self.winners.push_front(program);
        self.winners.truncate(cap);
    }
}
