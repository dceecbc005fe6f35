//! Program, example, and artifact types.
//!
//! A [`Program`] is an executable configuration: an ordered, bounded list of
//! demonstrations plus an optional instruction text. The optimizer never
//! looks inside the prompt formatting or transport — that lives behind the
//! [`crate::hooks::ProgramExecutor`] seam — it only mutates demonstrations
//! and instructions on copies of the baseline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Named field map used for example inputs, labels, and program outputs.
pub type FieldMap = BTreeMap<String, Value>;

// =============================================================================
// Training data
// =============================================================================

/// One training datum. Immutable after load.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Example {
    /// Input fields handed to the program executor.
    pub inputs: FieldMap,
    /// Expected/label fields consumed by the metric.
    pub labels: FieldMap,
}

impl Example {
    pub fn new(inputs: FieldMap, labels: FieldMap) -> Self {
        Self { inputs, labels }
    }
}

// =============================================================================
// Programs
// =============================================================================

/// A stored demonstration: one (input, output) pair attached to a program.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Demo {
    pub inputs: FieldMap,
    pub outputs: FieldMap,
}

/// An executable program configuration.
///
/// Capability flags tell the strategy engine which mutations apply; strategies
/// query them explicitly instead of inspecting the program shape at runtime.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Program {
    /// Ordered demonstrations, oldest first.
    #[serde(default)]
    pub demos: Vec<Demo>,
    /// Optional instruction text prepended by the executor.
    #[serde(default)]
    pub instruction: Option<String>,
    /// Whether appending demonstrations is meaningful for this program.
    #[serde(default = "default_true")]
    pub supports_demos: bool,
    /// Whether instruction rewriting is meaningful for this program.
    #[serde(default = "default_true")]
    pub supports_instruction: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Program {
    fn default() -> Self {
        Self {
            demos: Vec::new(),
            instruction: None,
            supports_demos: true,
            supports_instruction: true,
        }
    }
}

impl Program {
    /// Append a demonstration, evicting the oldest beyond `max_demos`.
    pub fn push_demo(&mut self, demo: Demo, max_demos: usize) {
        self.demos.push(demo);
        while self.demos.len() > max_demos {
            self.demos.remove(0);
        }
    }

    /// Attach or append a line to the instruction text.
    pub fn append_instruction(&mut self, text: &str) {
        match &mut self.instruction {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(text);
            }
            None => self.instruction = Some(text.to_string()),
        }
    }
}

// =============================================================================
// Sampling configuration
// =============================================================================

/// Sampling parameters for one trajectory variant.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SamplingConfig {
    /// Generation temperature.
    pub temperature: f64,
    /// Optional nucleus-sampling parameter.
    #[serde(default)]
    pub top_p: Option<f64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: None,
        }
    }
}

// =============================================================================
// Final artifact
// =============================================================================

/// Why the optimization loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A convergence criterion fired.
    Converged,
    /// `max_steps` steps completed.
    StepLimitReached,
    /// Caller requested a stop; the in-flight step finished first.
    Cancelled,
}

/// Counters accumulated over a run and exposed in the artifact metadata.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Execution units attempted (trajectories + candidate evaluations).
    pub executions_attempted: usize,
    /// Units that produced an output and a metric score.
    pub executions_succeeded: usize,
    /// Units that failed (executor error or metric error).
    pub executions_failed: usize,
    /// Units cancelled by a per-task or step deadline.
    pub executions_timed_out: usize,
    /// Candidate programs produced by the strategy engine.
    pub candidates_produced: usize,
    /// Candidates whose evaluation score crossed the winner threshold.
    pub winners_recorded: usize,
    /// Instruction-generator calls that failed (bucket skipped).
    pub instruction_failures: usize,
    /// Wall-clock time spent inside steps.
    pub total_step_ms: u128,
}

/// Run metadata attached to the final artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Optimization method identifier.
    pub method: String,
    /// Unique id for this run.
    pub run_id: Uuid,
    /// Final full-trainset score of the selected program.
    pub score: f64,
    /// Number of completed optimization steps.
    pub step_count: usize,
    /// Why the loop stopped.
    pub stop_reason: StopReason,
    /// Execution counters.
    pub stats: RunStats,
}

/// The immutable result of a run: the winning program plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedProgram {
    pub program: Program,
    pub meta: RunMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo(tag: &str) -> Demo {
        let mut inputs = FieldMap::new();
        inputs.insert("q".into(), Value::String(tag.into()));
        Demo {
            inputs,
            outputs: FieldMap::new(),
        }
    }

    #[test]
    fn push_demo_evicts_oldest_at_cap() {
        let mut program = Program::default();
        program.push_demo(demo("a"), 3);
        program.push_demo(demo("b"), 3);
        program.push_demo(demo("c"), 3);
        program.push_demo(demo("d"), 3);

        assert_eq!(program.demos.len(), 3);
        let tags: Vec<&str> = program
            .demos
            .iter()
            .map(|d| d.inputs["q"].as_str().unwrap())
            .collect();
        assert_eq!(tags, vec!["b", "c", "d"]);
    }

    #[test]
    fn append_instruction_attaches_then_appends() {
        let mut program = Program::default();
        program.append_instruction("be terse");
        assert_eq!(program.instruction.as_deref(), Some("be terse"));

        program.append_instruction("cite sources");
        assert_eq!(
            program.instruction.as_deref(),
            Some("be terse\ncite sources")
        );
    }
}
