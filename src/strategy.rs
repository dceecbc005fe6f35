//! Mutation strategies: append-demo and append-rule.
//!
//! For each selected bucket the engine picks a source program by softmax over
//! the whole pool, then applies the first applicable strategy from the
//! ordered list. A strategy is applicable only when its preconditions hold
//! (capability flags, a usable trajectory, both partitions non-empty); when
//! none apply the bucket is skipped without error, and an instruction
//! generator failure skips the bucket too.

use std::fmt::Write as _;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;

use crate::config::OptimizerConfig;
use crate::hooks::InstructionGenerator;
use crate::pool::ProgramPool;
use crate::program::{Demo, Program};
use crate::trajectory::Bucket;

/// Mean of the Poisson bias used for the demo pick: mass concentrated on the
/// best trajectory with a thinning tail over the runners-up.
const DEMO_PICK_LAMBDA: f64 = 1.0;

pub(crate) struct StrategyReport {
    pub candidates: Vec<Program>,
    pub instruction_failures: usize,
}

/// Produce up to `num_candidates` candidate programs from the ranked buckets.
pub(crate) async fn propose_candidates(
    pool: &ProgramPool,
    buckets: &[Bucket],
    generator: Option<&Arc<dyn InstructionGenerator>>,
    config: &OptimizerConfig,
    rng: &mut StdRng,
) -> StrategyReport {
    let mut report = StrategyReport {
        candidates: Vec::new(),
        instruction_failures: 0,
    };
    let all_indices = pool.all_indices();

    for bucket in buckets {
        if report.candidates.len() >= config.num_candidates {
            break;
        }
        if bucket.max_to_min_gap <= config.gap_threshold
            || bucket.max_score <= config.quality_floor
        {
            continue;
        }

        let Some(source_index) =
            pool.softmax_pick(&all_indices, config.candidate_temperature, rng)
        else {
            continue;
        };
        let source = pool.program(source_index);

        if let Some(candidate) = append_demo(source, bucket, config, rng) {
            report.candidates.push(candidate);
            continue;
        }
        match append_rule(source, bucket, generator, config).await {
            RuleOutcome::Candidate(candidate) => report.candidates.push(candidate),
            RuleOutcome::GeneratorFailed => report.instruction_failures += 1,
            RuleOutcome::NotApplicable => {
                tracing::debug!(
                    example_index = bucket.example_index,
                    "no applicable strategy; bucket skipped"
                );
            }
        }
    }

    report
}

// =============================================================================
// Append-demo
// =============================================================================

/// Poisson sample (Knuth's multiplicative method) for the biased top pick.
fn poisson_sample(lambda: f64, rng: &mut StdRng) -> usize {
    let threshold = (-lambda).exp();
    let mut k = 0usize;
    let mut p = 1.0f64;
    loop {
        p *= rng.gen::<f64>();
        if p <= threshold {
            return k;
        }
        k += 1;
    }
}

/// Copy the source program and append a high-scoring trajectory from the
/// bucket as a demonstration, evicting the oldest demo beyond `max_demos`.
///
/// Applicable only when the source supports demos and the bucket holds at
/// least one successful trajectory.
fn append_demo(
    source: &Program,
    bucket: &Bucket,
    config: &OptimizerConfig,
    rng: &mut StdRng,
) -> Option<Program> {
    if !source.supports_demos {
        return None;
    }
    // Bucket trajectories are sorted descending, so the good prefix keeps
    // that order. Zero-scored trials are not demo material.
    let good: Vec<_> = bucket
        .trajectories
        .iter()
        .filter(|t| t.success && t.score > 0.0)
        .collect();
    if good.is_empty() {
        return None;
    }

    let pick = poisson_sample(DEMO_PICK_LAMBDA, rng).min(good.len() - 1);
    let chosen = good[pick];

    let mut candidate = source.clone();
    candidate.push_demo(
        Demo {
            inputs: chosen.inputs.clone(),
            outputs: chosen.outputs.clone(),
        },
        config.max_demos,
    );
    Some(candidate)
}

// =============================================================================
// Append-rule
// =============================================================================

enum RuleOutcome {
    Candidate(Program),
    GeneratorFailed,
    NotApplicable,
}

/// Render the instruction-improvement prompt from the bucket's successful and
/// unsuccessful trajectories.
fn render_rule_prompt(bucket: &Bucket, quality_threshold: f64) -> String {
    let mut prompt = String::from(
        "Several attempts at the same task scored very differently. \
         Study the contrast and state one concise, generalizable rule the \
         program should follow to produce answers like the successful \
         attempts. Reply with the rule text only.\n",
    );
    let _ = writeln!(prompt, "\nTask inputs:");
    if let Some(first) = bucket.trajectories.first() {
        for (key, value) in &first.inputs {
            let _ = writeln!(prompt, "  {key}: {value}");
        }
    }
    for (label, keep) in [("Successful attempts", true), ("Unsuccessful attempts", false)] {
        let _ = writeln!(prompt, "\n{label}:");
        for trajectory in bucket
            .trajectories
            .iter()
            .filter(|t| (t.score >= quality_threshold) == keep)
        {
            let _ = writeln!(prompt, "- score {:.2}:", trajectory.score);
            for (key, value) in &trajectory.outputs {
                let _ = writeln!(prompt, "    {key}: {value}");
            }
        }
    }
    prompt
}

/// Copy the source program and append a synthesized instruction improvement.
///
/// Applicable only when the source supports instructions, a generator was
/// injected, and the bucket partitions into non-empty successful and
/// unsuccessful halves at the quality threshold.
async fn append_rule(
    source: &Program,
    bucket: &Bucket,
    generator: Option<&Arc<dyn InstructionGenerator>>,
    config: &OptimizerConfig,
) -> RuleOutcome {
    if !source.supports_instruction {
        return RuleOutcome::NotApplicable;
    }
    let Some(generator) = generator else {
        return RuleOutcome::NotApplicable;
    };
    let successful = bucket
        .trajectories
        .iter()
        .filter(|t| t.score >= config.quality_threshold)
        .count();
    if successful == 0 || successful == bucket.trajectories.len() {
        return RuleOutcome::NotApplicable;
    }

    let prompt = render_rule_prompt(bucket, config.quality_threshold);
    match generator.generate(&prompt).await {
        Ok(rule) => {
            let mut candidate = source.clone();
            candidate.append_instruction(rule.trim());
            RuleOutcome::Candidate(candidate)
        }
        Err(err) => {
            tracing::warn!(
                example_index = bucket.example_index,
                error = %err,
                "instruction generation failed; bucket skipped"
            );
            RuleOutcome::GeneratorFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::InstructionError;
    use crate::program::{FieldMap, SamplingConfig};
    use crate::trajectory::{analyze_buckets, Trajectory};
    use rand::SeedableRng;
    use serde_json::json;
    use std::time::Duration;

    fn trajectory(example_index: usize, score: f64, success: bool) -> Trajectory {
        let mut inputs = FieldMap::new();
        inputs.insert("q".into(), json!("what is 2+2"));
        let mut outputs = FieldMap::new();
        outputs.insert("a".into(), json!(format!("answer scored {score}")));
        Trajectory {
            program_index: 0,
            example_index,
            inputs,
            outputs,
            score,
            success,
            error: None,
            duration: Duration::from_millis(1),
            sampling: SamplingConfig::default(),
        }
    }

    fn pool() -> ProgramPool {
        let mut pool = ProgramPool::new(Program::default(), 0.05);
        pool.record_score(0, 0.4);
        pool
    }

    struct FixedGenerator;

    #[async_trait::async_trait]
    impl InstructionGenerator for FixedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, InstructionError> {
            Ok("show your working".to_string())
        }
    }

    struct BrokenGenerator;

    #[async_trait::async_trait]
    impl InstructionGenerator for BrokenGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, InstructionError> {
            Err(InstructionError::Message("generator offline".into()))
        }
    }

    #[tokio::test]
    async fn zero_gap_bucket_produces_no_candidate() {
        let buckets = analyze_buckets(vec![
            trajectory(0, 0.9, true),
            trajectory(0, 0.9, true),
            trajectory(0, 0.9, true),
        ]);
        let mut rng = StdRng::seed_from_u64(5);
        let report = propose_candidates(
            &pool(),
            &buckets,
            None,
            &OptimizerConfig::default(),
            &mut rng,
        )
        .await;
        assert!(report.candidates.is_empty());
    }

    #[tokio::test]
    async fn spread_bucket_yields_demo_candidate() {
        let buckets = analyze_buckets(vec![trajectory(0, 0.9, true), trajectory(0, 0.1, true)]);
        let mut rng = StdRng::seed_from_u64(5);
        let report = propose_candidates(
            &pool(),
            &buckets,
            None,
            &OptimizerConfig::default(),
            &mut rng,
        )
        .await;

        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].demos.len(), 1);
    }

    #[tokio::test]
    async fn demo_disabled_falls_through_to_append_rule() {
        let mut baseline = Program::default();
        baseline.supports_demos = false;
        let pool = ProgramPool::new(baseline, 0.05);

        let buckets = analyze_buckets(vec![trajectory(0, 0.9, true), trajectory(0, 0.1, true)]);
        let generator: Arc<dyn InstructionGenerator> = Arc::new(FixedGenerator);
        let mut rng = StdRng::seed_from_u64(5);
        let report = propose_candidates(
            &pool,
            &buckets,
            Some(&generator),
            &OptimizerConfig::default(),
            &mut rng,
        )
        .await;

        assert_eq!(report.candidates.len(), 1);
        assert_eq!(
            report.candidates[0].instruction.as_deref(),
            Some("show your working")
        );
    }

    #[tokio::test]
    async fn generator_failure_skips_bucket() {
        let mut baseline = Program::default();
        baseline.supports_demos = false;
        let pool = ProgramPool::new(baseline, 0.05);

        let buckets = analyze_buckets(vec![trajectory(0, 0.9, true), trajectory(0, 0.1, true)]);
        let generator: Arc<dyn InstructionGenerator> = Arc::new(BrokenGenerator);
        let mut rng = StdRng::seed_from_u64(5);
        let report = propose_candidates(
            &pool,
            &buckets,
            Some(&generator),
            &OptimizerConfig::default(),
            &mut rng,
        )
        .await;

        assert!(report.candidates.is_empty());
        assert_eq!(report.instruction_failures, 1);
    }

    #[tokio::test]
    async fn append_rule_requires_both_partitions() {
        let mut baseline = Program::default();
        baseline.supports_demos = false;
        let pool = ProgramPool::new(baseline, 0.05);

        // All trajectories above the quality threshold: no contrast to learn from.
        let buckets = analyze_buckets(vec![trajectory(0, 0.9, true), trajectory(0, 0.6, true)]);
        let generator: Arc<dyn InstructionGenerator> = Arc::new(FixedGenerator);
        let mut rng = StdRng::seed_from_u64(5);
        let report = propose_candidates(
            &pool,
            &buckets,
            Some(&generator),
            &OptimizerConfig::default(),
            &mut rng,
        )
        .await;

        assert!(report.candidates.is_empty());
        assert_eq!(report.instruction_failures, 0);
    }

    #[tokio::test]
    async fn candidate_count_is_bounded() {
        let mut trajectories = Vec::new();
        for example in 0..10 {
            trajectories.push(trajectory(example, 0.9, true));
            trajectories.push(trajectory(example, 0.1, true));
        }
        let buckets = analyze_buckets(trajectories);
        let config = OptimizerConfig {
            num_candidates: 3,
            ..OptimizerConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(5);
        let report = propose_candidates(&pool(), &buckets, None, &config, &mut rng).await;
        assert_eq!(report.candidates.len(), 3);
    }

    #[test]
    fn poisson_pick_is_biased_toward_zero() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut zeros = 0usize;
        for _ in 0..1000 {
            if poisson_sample(DEMO_PICK_LAMBDA, &mut rng) == 0 {
                zeros += 1;
            }
        }
        // P(0) = e^-1 ≈ 0.368 at lambda 1; allow generous slack.
        assert!(zeros > 250 && zeros < 480, "zeros = {zeros}");
    }

    #[test]
    fn rule_prompt_contains_both_partitions() {
        let buckets = analyze_buckets(vec![trajectory(0, 0.9, true), trajectory(0, 0.1, true)]);
        let prompt = render_rule_prompt(&buckets[0], 0.5);
        assert!(prompt.contains("Successful attempts"));
        assert!(prompt.contains("Unsuccessful attempts"));
        assert!(prompt.contains("what is 2+2"));
    }
}
