//! Optimization driver: the step-loop state machine.
//!
//! One driver task orchestrates each step through the phases
//! `Sampling → Executing → Analyzing → Mutating → Evaluating → Updating`;
//! concurrent workers return immutable results and the driver alone folds
//! them into the pool, histories, and winners after the phase joins. On
//! completion (converged, step limit, or cancellation) a final full-trainset
//! evaluation over the surviving pool selects the artifact.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::OptimizerConfig;
use crate::convergence::ConvergenceDetector;
use crate::error::OptimizeError;
use crate::executor::{evaluate_programs, run_trajectories, ExecCounters};
use crate::hooks::{InstructionGenerator, Metric, ProgramExecutor, StepObserver, StepUpdate};
use crate::pool::{ProgramPool, BASELINE_INDEX};
use crate::program::{
    Example, OptimizedProgram, Program, RunMetadata, RunStats, StopReason,
};
use crate::sampler::MiniBatchSampler;
use crate::strategy::propose_candidates;
use crate::trajectory::analyze_buckets;

/// Method identifier recorded in the artifact metadata.
const METHOD: &str = "stochastic-minibatch-ascent";

/// Driver phase, for structured logging of state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initializing,
    Sampling,
    Executing,
    Analyzing,
    Mutating,
    Evaluating,
    Updating,
    FinalSelection,
    Finished,
}

/// The optimization driver. Holds the configuration and the injected
/// collaborators; `run` executes one full optimization.
pub struct Optimizer {
    config: OptimizerConfig,
    executor: Arc<dyn ProgramExecutor>,
    metric: Arc<dyn Metric>,
    instruction_generator: Option<Arc<dyn InstructionGenerator>>,
    observer: Option<Arc<dyn StepObserver>>,
    cancel: Arc<AtomicBool>,
}

impl Optimizer {
    pub fn new(
        config: OptimizerConfig,
        executor: Arc<dyn ProgramExecutor>,
        metric: Arc<dyn Metric>,
    ) -> Self {
        Self {
            config,
            executor,
            metric,
            instruction_generator: None,
            observer: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enable the append-rule strategy by injecting a generator.
    pub fn with_instruction_generator(mut self, generator: Arc<dyn InstructionGenerator>) -> Self {
        self.instruction_generator = Some(generator);
        self
    }

    /// Register a per-step progress observer.
    pub fn with_observer(mut self, observer: Arc<dyn StepObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Handle for external cancellation: setting the flag makes the driver
    /// finish the in-flight step and jump to final selection.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run the optimization loop and return the best-effort optimized
    /// program. Only configuration errors are fatal.
    pub async fn run(
        &self,
        baseline: Program,
        trainset: &[Example],
    ) -> Result<OptimizedProgram, OptimizeError> {
        let mut phase = Phase::Initializing;
        tracing::debug!(?phase, "run starting");
        self.config.validate(trainset.len())?;

        let mut rng = StdRng::seed_from_u64(self.config.rng_seed);
        let sampler = MiniBatchSampler::new(trainset.len(), self.config.batch_size, &mut rng);
        let mut pool = ProgramPool::new(baseline, self.config.baseline_default_score);
        let mut detector = ConvergenceDetector::new(&self.config);
        let mut stats = RunStats::default();

        let mut step_count = 0usize;
        let mut stop_reason = StopReason::StepLimitReached;

        while step_count < self.config.max_steps {
            if self.cancel.load(AtomicOrdering::Relaxed) {
                stop_reason = StopReason::Cancelled;
                break;
            }
            let step = step_count;
            let step_started = Instant::now();
            let deadline = self
                .config
                .step_timeout_ms
                .map(|ms| step_started + Duration::from_millis(ms));

            phase = Phase::Sampling;
            tracing::debug!(?phase, step);
            let batch = sampler.batch(step);

            phase = Phase::Executing;
            tracing::debug!(?phase, step, batch_len = batch.len());
            let top_k = pool.top_k_plus_baseline(self.config.top_k);
            let trajectory_report = run_trajectories(
                self.executor.clone(),
                self.metric.clone(),
                &pool,
                trainset,
                &batch,
                &top_k,
                &self.config,
                deadline,
                &mut rng,
            )
            .await;
            fold_counters(&mut stats, trajectory_report.counters);
            for trajectory in &trajectory_report.trajectories {
                pool.record_score(trajectory.program_index, trajectory.score);
            }

            phase = Phase::Analyzing;
            tracing::debug!(?phase, step);
            let buckets = analyze_buckets(trajectory_report.trajectories);
            let any_data = buckets.iter().any(|b| b.trajectories.iter().any(|t| t.success));

            phase = Phase::Mutating;
            tracing::debug!(?phase, step, buckets = buckets.len(), any_data);
            let strategy_report = if any_data {
                propose_candidates(
                    &pool,
                    &buckets,
                    self.instruction_generator.as_ref(),
                    &self.config,
                    &mut rng,
                )
                .await
            } else {
                // Every trajectory failed: nothing to learn from this step.
                crate::strategy::StrategyReport {
                    candidates: Vec::new(),
                    instruction_failures: 0,
                }
            };
            let candidates_produced = strategy_report.candidates.len();
            stats.candidates_produced += candidates_produced;
            stats.instruction_failures += strategy_report.instruction_failures;

            phase = Phase::Evaluating;
            tracing::debug!(?phase, step, candidates = candidates_produced);
            let evaluation = evaluate_programs(
                self.executor.clone(),
                self.metric.clone(),
                &strategy_report.candidates,
                trainset,
                &batch,
                &self.config,
                deadline,
            )
            .await;
            fold_counters(&mut stats, evaluation.counters);

            phase = Phase::Updating;
            tracing::debug!(?phase, step);
            for (candidate, &score) in strategy_report
                .candidates
                .into_iter()
                .zip(evaluation.scores.iter())
            {
                let index = pool.push_candidate(candidate.clone());
                pool.record_score(index, score);
                if score > self.config.winner_threshold {
                    pool.record_winner(candidate, self.config.winners_cap);
                    stats.winners_recorded += 1;
                }
            }
            pool.prune(self.config.pool_cap);

            let best_score = pool.best_average();
            detector.record(best_score);
            let converged = detector.converged();
            stats.total_step_ms += step_started.elapsed().as_millis();
            step_count += 1;

            if let Some(observer) = &self.observer {
                let update = StepUpdate {
                    step,
                    best_score,
                    pool_size: pool.len(),
                    candidates_produced,
                    converged,
                };
                if let Err(err) = observer.on_step(update).await {
                    tracing::warn!(step, error = %err, "step observer failed; continuing");
                }
            }

            if converged {
                stop_reason = StopReason::Converged;
                break;
            }
        }

        phase = Phase::FinalSelection;
        tracing::debug!(?phase, step_count, ?stop_reason);
        let (program, score) = self.final_selection(&pool, trainset).await;

        phase = Phase::Finished;
        tracing::debug!(?phase, score);
        Ok(OptimizedProgram {
            program,
            meta: RunMetadata {
                method: METHOD.to_string(),
                run_id: Uuid::new_v4(),
                score,
                step_count,
                stop_reason,
                stats,
            },
        })
    }

    /// Re-evaluate the surviving pool on the full trainset and pick the
    /// single best program; ties resolve to the lowest pool index, so the
    /// baseline wins an exact tie.
    async fn final_selection(&self, pool: &ProgramPool, trainset: &[Example]) -> (Program, f64) {
        let full: Vec<usize> = (0..trainset.len()).collect();
        let evaluation = evaluate_programs(
            self.executor.clone(),
            self.metric.clone(),
            pool.programs(),
            trainset,
            &full,
            &self.config,
            None,
        )
        .await;

        let mut best_index = BASELINE_INDEX;
        let mut best_score = evaluation
            .scores
            .first()
            .copied()
            .unwrap_or(0.0);
        for (index, &score) in evaluation.scores.iter().enumerate().skip(1) {
            if score > best_score {
                best_index = index;
                best_score = score;
            }
        }
        (pool.program(best_index).clone(), best_score)
    }
}

fn fold_counters(stats: &mut RunStats, counters: ExecCounters) {
    stats.executions_attempted += counters.attempted;
    stats.executions_succeeded += counters.succeeded;
    stats.executions_failed += counters.failed;
    stats.executions_timed_out += counters.timed_out;
}
