//! External collaborator seams.
//!
//! The optimizer stays transport-agnostic. Callers inject:
//! - The program executor (prompt formatting + LLM call)
//! - The scoring metric
//! - An instruction generator for the append-rule strategy
//! - An optional per-step observer for progress reporting
//!
//! Collaborator errors never abort the run: executor and metric failures are
//! folded into zero-scored trajectories, generator failures skip the bucket,
//! and observer errors are logged and swallowed.

use crate::program::{Example, FieldMap, Program, SamplingConfig};

// =============================================================================
// Program executor
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("{0}")]
    Message(String),
}

/// Executes one program against one set of inputs.
///
/// Must be safe to invoke concurrently on clones of the same logical program.
#[async_trait::async_trait]
pub trait ProgramExecutor: Send + Sync {
    async fn execute(
        &self,
        program: &Program,
        inputs: &FieldMap,
        sampling: &SamplingConfig,
    ) -> Result<FieldMap, ExecuteError>;
}

// =============================================================================
// Metric
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MetricError {
    #[error("{0}")]
    Message(String),
}

/// Caller-supplied scoring function.
///
/// Errors are caught by the executor/evaluator and treated as score `0.0`.
pub trait Metric: Send + Sync {
    fn score(&self, example: &Example, outputs: &FieldMap) -> Result<f64, MetricError>;
}

impl<F> Metric for F
where
    F: Fn(&Example, &FieldMap) -> Result<f64, MetricError> + Send + Sync,
{
    fn score(&self, example: &Example, outputs: &FieldMap) -> Result<f64, MetricError> {
        self(example, outputs)
    }
}

// =============================================================================
// Instruction generator
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum InstructionError {
    #[error("{0}")]
    Message(String),
}

/// Abstracts the external text-generation call used by the append-rule
/// strategy to synthesize instruction improvements.
#[async_trait::async_trait]
pub trait InstructionGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, InstructionError>;
}

// =============================================================================
// Step observer
// =============================================================================

/// Progress snapshot delivered once per completed step.
#[derive(Debug, Clone, Copy)]
pub struct StepUpdate {
    /// Zero-based step that just completed.
    pub step: usize,
    /// Best pool average score after the update phase.
    pub best_score: f64,
    /// Pool size after pruning.
    pub pool_size: usize,
    /// Candidates produced by the strategy engine this step.
    pub candidates_produced: usize,
    /// Whether a convergence criterion has fired.
    pub converged: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("{0}")]
    Message(String),
}

/// Optional progress callback. Errors must not abort the run.
#[async_trait::async_trait]
pub trait StepObserver: Send + Sync {
    async fn on_step(&self, update: StepUpdate) -> Result<(), ObserverError>;
}
