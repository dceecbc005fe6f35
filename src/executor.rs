//! Concurrent trajectory execution and candidate evaluation.
//!
//! Both phases fan out independent units over a bounded worker pool
//! (`buffer_unordered`) and fold immutable results back on the driver thread.
//! A unit is one `(program, example, sampling)` trial: executor errors,
//! per-task timeouts, and metric errors are all isolated into zero-scored
//! failures; an expired step deadline records the outstanding units as
//! failures and lets the step proceed with whatever completed.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::config::OptimizerConfig;
use crate::hooks::{Metric, ProgramExecutor};
use crate::pool::ProgramPool;
use crate::program::{Example, FieldMap, Program, SamplingConfig};
use crate::trajectory::Trajectory;

/// Error string recorded when the per-task deadline expires.
const TASK_TIMEOUT_ERROR: &str = "task deadline exceeded";
/// Error string recorded when the aggregate step deadline expires.
const STEP_TIMEOUT_ERROR: &str = "step deadline exceeded";

// =============================================================================
// Unit execution
// =============================================================================

#[derive(Debug)]
struct UnitResult {
    outputs: FieldMap,
    score: f64,
    success: bool,
    error: Option<String>,
    duration: Duration,
    timed_out: bool,
}

/// Run one trial: execute under the per-task deadline, then score.
async fn run_unit(
    executor: Arc<dyn ProgramExecutor>,
    metric: Arc<dyn Metric>,
    program: Program,
    example: Example,
    sampling: SamplingConfig,
    task_timeout: Duration,
) -> UnitResult {
    let started = Instant::now();
    let outcome = tokio::time::timeout(
        task_timeout,
        executor.execute(&program, &example.inputs, &sampling),
    )
    .await;
    let duration = started.elapsed();

    match outcome {
        Ok(Ok(outputs)) => match metric.score(&example, &outputs) {
            Ok(score) => UnitResult {
                outputs,
                score,
                success: true,
                error: None,
                duration,
                timed_out: false,
            },
            Err(err) => UnitResult {
                outputs,
                score: 0.0,
                success: false,
                error: Some(format!("metric error: {err}")),
                duration,
                timed_out: false,
            },
        },
        Ok(Err(err)) => UnitResult {
            outputs: FieldMap::new(),
            score: 0.0,
            success: false,
            error: Some(err.to_string()),
            duration,
            timed_out: false,
        },
        Err(_) => UnitResult {
            outputs: FieldMap::new(),
            score: 0.0,
            success: false,
            error: Some(TASK_TIMEOUT_ERROR.to_string()),
            duration,
            timed_out: true,
        },
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ExecCounters {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl ExecCounters {
    fn tally(&mut self, success: bool, timed_out: bool) {
        if success {
            self.succeeded += 1;
        } else if timed_out {
            self.timed_out += 1;
        } else {
            self.failed += 1;
        }
    }
}

// =============================================================================
// Trajectory phase
// =============================================================================

pub(crate) struct TrajectoryReport {
    pub trajectories: Vec<Trajectory>,
    pub counters: ExecCounters,
}

/// Execute the cross-product of (mini-batch example × sampling variant).
///
/// The source program for each unit is drawn by softmax over the current
/// top-k pool slice at the sampling temperature; all draws happen on the
/// driver thread before fan-out, so randomness stays reproducible.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_trajectories(
    executor: Arc<dyn ProgramExecutor>,
    metric: Arc<dyn Metric>,
    pool: &ProgramPool,
    trainset: &[Example],
    batch: &[usize],
    top_k: &[usize],
    config: &OptimizerConfig,
    deadline: Option<Instant>,
    rng: &mut rand::rngs::StdRng,
) -> TrajectoryReport {
    struct TaskMeta {
        program_index: usize,
        example_index: usize,
        sampling: SamplingConfig,
    }

    let mut meta: Vec<TaskMeta> = Vec::with_capacity(batch.len() * config.sampling_variants.len());
    for &example_index in batch {
        for sampling in &config.sampling_variants {
            let Some(program_index) =
                pool.softmax_pick(top_k, config.sampling_temperature, rng)
            else {
                continue;
            };
            meta.push(TaskMeta {
                program_index,
                example_index,
                sampling: sampling.clone(),
            });
        }
    }

    let task_timeout = Duration::from_millis(config.task_timeout_ms);
    let futures_iter = meta.iter().enumerate().map(|(task_id, task)| {
        let executor = executor.clone();
        let metric = metric.clone();
        let program = pool.program(task.program_index).clone();
        let example = trainset[task.example_index].clone();
        let sampling = task.sampling.clone();
        let program_index = task.program_index;
        let example_index = task.example_index;
        async move {
            let unit = run_unit(executor, metric, program, example.clone(), sampling.clone(), task_timeout).await;
            let trajectory = Trajectory {
                program_index,
                example_index,
                inputs: example.inputs,
                outputs: unit.outputs,
                score: unit.score,
                success: unit.success,
                error: unit.error,
                duration: unit.duration,
                sampling,
            };
            (task_id, trajectory, unit.timed_out)
        }
    });

    let mut counters = ExecCounters {
        attempted: meta.len(),
        ..ExecCounters::default()
    };
    let mut completed: Vec<Option<Trajectory>> = (0..meta.len()).map(|_| None).collect();

    let mut in_flight = stream::iter(futures_iter).buffer_unordered(config.max_concurrency);
    loop {
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, in_flight.next()).await {
                Ok(item) => item,
                Err(_) => break,
            },
            None => in_flight.next().await,
        };
        match next {
            Some((task_id, trajectory, timed_out)) => {
                counters.tally(trajectory.success, timed_out);
                if !trajectory.success {
                    tracing::debug!(
                        program_index = trajectory.program_index,
                        example_index = trajectory.example_index,
                        error = trajectory.error.as_deref().unwrap_or("unknown"),
                        "trajectory failed"
                    );
                }
                completed[task_id] = Some(trajectory);
            }
            None => break,
        }
    }
    drop(in_flight);

    // Units still outstanding at the step deadline become failed trajectories.
    let mut trajectories = Vec::with_capacity(meta.len());
    for (task_id, slot) in completed.into_iter().enumerate() {
        match slot {
            Some(trajectory) => trajectories.push(trajectory),
            None => {
                let task = &meta[task_id];
                counters.timed_out += 1;
                trajectories.push(Trajectory {
                    program_index: task.program_index,
                    example_index: task.example_index,
                    inputs: trainset[task.example_index].inputs.clone(),
                    outputs: FieldMap::new(),
                    score: 0.0,
                    success: false,
                    error: Some(STEP_TIMEOUT_ERROR.to_string()),
                    duration: task_timeout,
                    sampling: task.sampling.clone(),
                });
            }
        }
    }

    TrajectoryReport {
        trajectories,
        counters,
    }
}

// =============================================================================
// Evaluation phase
// =============================================================================

pub(crate) struct EvaluationReport {
    /// One average score per evaluated program, aligned with the input slice.
    pub scores: Vec<f64>,
    pub counters: ExecCounters,
}

/// Score each program on every example in `batch` concurrently; failures
/// contribute `0.0` to that program's average.
pub(crate) async fn evaluate_programs(
    executor: Arc<dyn ProgramExecutor>,
    metric: Arc<dyn Metric>,
    programs: &[Program],
    trainset: &[Example],
    batch: &[usize],
    config: &OptimizerConfig,
    deadline: Option<Instant>,
) -> EvaluationReport {
    if programs.is_empty() || batch.is_empty() {
        return EvaluationReport {
            scores: vec![0.0; programs.len()],
            counters: ExecCounters::default(),
        };
    }

    let sampling = SamplingConfig::default();
    let task_timeout = Duration::from_millis(config.task_timeout_ms);

    let futures_iter = programs.iter().enumerate().flat_map(|(program_id, program)| {
        batch.iter().map(move |&example_index| (program_id, program, example_index))
    });
    let futures_iter = futures_iter.map(|(program_id, program, example_index)| {
        let executor = executor.clone();
        let metric = metric.clone();
        let program = program.clone();
        let example = trainset[example_index].clone();
        let sampling = sampling.clone();
        async move {
            let unit = run_unit(executor, metric, program, example, sampling, task_timeout).await;
            (program_id, unit.score, unit.success, unit.timed_out)
        }
    });

    let total_units = programs.len() * batch.len();
    let mut counters = ExecCounters {
        attempted: total_units,
        ..ExecCounters::default()
    };
    let mut sums = vec![0.0f64; programs.len()];
    let mut finished_units = 0usize;

    let mut in_flight = stream::iter(futures_iter).buffer_unordered(config.max_concurrency);
    loop {
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, in_flight.next()).await {
                Ok(item) => item,
                Err(_) => break,
            },
            None => in_flight.next().await,
        };
        match next {
            Some((program_id, score, success, timed_out)) => {
                counters.tally(success, timed_out);
                sums[program_id] += score;
                finished_units += 1;
            }
            None => break,
        }
    }
    drop(in_flight);

    // Outstanding units at the step deadline contribute 0.0 to their average.
    counters.timed_out += total_units - finished_units;

    let scores = sums
        .into_iter()
        .map(|sum| sum / batch.len() as f64)
        .collect();
    EvaluationReport { scores, counters }
}
