#![forbid(unsafe_code)]

//! # promptune
//!
//! An iterative configuration optimizer for LLM-driven programs: given a base
//! program, a pool of training examples, and a scoring metric, it searches a
//! space of program variants (added demonstrations, rewritten instructions,
//! alternate sampling parameters) to maximize measured quality.
//!
//! Each step samples a mini-batch over a fixed shuffled permutation, runs the
//! (example × sampling-variant) cross-product concurrently against
//! stochastically selected pool programs, buckets the scored trajectories by
//! example, mutates the buckets with the largest performance spread into new
//! candidate programs, evaluates the candidates, and folds everything back
//! into the pool. The run ends on convergence, the step limit, or external
//! cancellation, and a final full-trainset evaluation selects the artifact.
//!
//! Transport, prompt formatting, and persistence stay behind the traits in
//! [`hooks`]; the optimizer only ever sees scores.

pub mod config;
pub mod convergence;
pub mod driver;
pub mod error;
mod executor;
pub mod hooks;
pub mod pool;
pub mod program;
pub mod sampler;
mod strategy;
pub mod trajectory;

pub use config::OptimizerConfig;
pub use driver::Optimizer;
pub use error::OptimizeError;
pub use hooks::{
    ExecuteError, InstructionError, InstructionGenerator, Metric, MetricError, ObserverError,
    ProgramExecutor, StepObserver, StepUpdate,
};
pub use pool::{softmax_sample, ProgramPool, BASELINE_INDEX};
pub use program::{
    Demo, Example, FieldMap, OptimizedProgram, Program, RunMetadata, RunStats, SamplingConfig,
    StopReason,
};
pub use sampler::MiniBatchSampler;
pub use trajectory::{analyze_buckets, Bucket, Trajectory};
