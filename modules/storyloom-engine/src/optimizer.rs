//! Outer optimization loop.
//!
//! Each iteration generates a candidate population, keeps the best, and
//! mutates the story spec and config from the winner's report. The loop
//! ends at `max_iters`, on a plateau, or when cancelled.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use storyloom_common::{Candidate, GenerationConfig, OptimizerHistoryEntry, StorySpec};
use storyloom_eval::{select_best, Evaluator, Guard, GuardThresholds};

use crate::artifacts::ArtifactStore;
use crate::assembler::CandidatePlan;
use crate::events::{DecisionKind, DecisionLog, DecisionSink, TracingDecisionSink};
use crate::gateway::{CompletionGateway, UsageTotals};
use crate::generation::{Generator, IterationContext};
use crate::prompts::PromptRegistry;
use crate::tuning::{mutate_config, mutate_spec, Mutation};

/// Non-improving iterations tolerated before a plateau stops the loop.
pub const PLATEAU_PATIENCE: u32 = 2;

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative stop signal. Checked between iterations and before each
/// candidate starts; work already in flight finishes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Plateau tracking
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Gain over the previous best; infinite on the first observation.
    pub improvement: f64,
    pub improved: bool,
    pub no_improvement: u32,
    pub stop: bool,
}

/// Running best plus the count of iterations that failed to beat it by
/// `delta`.
#[derive(Debug, Clone)]
pub struct PlateauTracker {
    delta: f64,
    best: Option<f64>,
    no_improvement: u32,
}

impl PlateauTracker {
    pub fn new(delta: f64) -> Self {
        Self {
            delta,
            best: None,
            no_improvement: 0,
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn observe(&mut self, score: f64) -> Observation {
        let improvement = match self.best {
            Some(best) => score - best,
            None => f64::INFINITY,
        };
        let improved = improvement > 0.0;
        if improved {
            self.best = Some(score);
        }
        if improvement >= self.delta {
            self.no_improvement = 0;
        } else {
            self.no_improvement += 1;
        }
        Observation {
            improvement,
            improved,
            no_improvement: self.no_improvement,
            stop: improvement < self.delta && self.no_improvement >= PLATEAU_PATIENCE,
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    EarlyStop,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Completed => "completed",
            StopReason::EarlyStop => "early_stop",
            StopReason::Cancelled => "cancelled",
        })
    }
}

/// Best candidate across all iterations, with the inputs that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestCandidate {
    pub iteration: usize,
    pub spec: StorySpec,
    pub config: GenerationConfig,
    pub candidate: Candidate,
}

#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub run_id: String,
    pub best: Option<BestCandidate>,
    pub history: Vec<OptimizerHistoryEntry>,
    pub stop_reason: StopReason,
    pub iterations: usize,
    pub usage: UsageTotals,
}

impl OptimizationOutcome {
    pub fn summary(&self) -> OptimizationSummary {
        OptimizationSummary {
            run_id: self.run_id.clone(),
            stop_reason: self.stop_reason,
            iterations: self.iterations,
            best_score: self.best.as_ref().map(|b| b.candidate.overall()),
            best_candidate: self.best.as_ref().map(|b| b.candidate.id.clone()),
            best_iteration: self.best.as_ref().map(|b| b.iteration),
            pass_fail: self
                .best
                .as_ref()
                .is_some_and(|b| b.candidate.report.pass_fail),
            history: self.history.clone(),
            usage: self.usage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSummary {
    pub run_id: String,
    pub stop_reason: StopReason,
    pub iterations: usize,
    pub best_score: Option<f64>,
    pub best_candidate: Option<String>,
    pub best_iteration: Option<usize>,
    pub pass_fail: bool,
    pub history: Vec<OptimizerHistoryEntry>,
    pub usage: UsageTotals,
}

impl fmt::Display for OptimizationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} ({})", self.run_id, self.stop_reason)?;
        writeln!(f, "  Iterations:  {}", self.iterations)?;
        match (&self.best_candidate, self.best_score) {
            (Some(id), Some(score)) => writeln!(
                f,
                "  Best:        {id} score={score:.3} pass={}",
                self.pass_fail
            )?,
            _ => writeln!(f, "  Best:        none")?,
        }
        for entry in &self.history {
            writeln!(
                f,
                "  iter {:>2}  best={:.3}  running={:.3}  {}",
                entry.iteration,
                entry.best_score,
                entry.running_best,
                if entry.improved { "improved" } else { "" }
            )?;
        }
        write!(
            f,
            "  Calls:       {} ({} prompt / {} completion tokens)",
            self.usage.calls, self.usage.prompt_tokens, self.usage.completion_tokens
        )
    }
}

// =============================================================================
// Optimizer
// =============================================================================

#[derive(Debug, Clone, TypedBuilder)]
pub struct OptimizerSettings {
    #[builder(default = 5)]
    pub max_iters: usize,
    #[builder(default = 4)]
    pub max_concurrency: usize,
    #[builder(default, setter(strip_option, into))]
    pub run_id: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub git_commit: Option<String>,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

pub struct Optimizer {
    gateway: Arc<CompletionGateway>,
    prompts: Arc<PromptRegistry>,
    sink: Arc<dyn DecisionSink>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    settings: OptimizerSettings,
    cancel: CancelFlag,
}

impl Optimizer {
    pub fn new(
        gateway: Arc<CompletionGateway>,
        prompts: Arc<PromptRegistry>,
        settings: OptimizerSettings,
    ) -> Self {
        Self {
            gateway,
            prompts,
            sink: Arc::new(TracingDecisionSink),
            artifacts: None,
            settings,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DecisionSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_artifacts(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub async fn run(
        &self,
        spec: &StorySpec,
        config: &GenerationConfig,
        exemplar: Option<&str>,
    ) -> Result<OptimizationOutcome> {
        spec.validate().context("Invalid story spec")?;
        config.validate().context("Invalid generation config")?;

        let run_id = self.settings.run_id.clone().unwrap_or_else(new_run_id);
        let log = DecisionLog::new(self.sink.clone(), run_id.clone());
        let generator = Generator::new(&self.gateway, &self.prompts)
            .with_git_commit(self.settings.git_commit.clone());

        info!(
            run_id = run_id.as_str(),
            max_iters = self.settings.max_iters,
            candidates = config.num_candidates,
            guarded = exemplar.is_some(),
            "Starting optimization"
        );

        let mut current_spec = spec.clone();
        let mut current_config = config.clone();
        let mut tracker = PlateauTracker::new(config.early_stop_delta);
        let mut best: Option<BestCandidate> = None;
        let mut history = Vec::new();
        let mut stop_reason = StopReason::Completed;
        let mut completed = 0;

        for iteration in 1..=self.settings.max_iters {
            let decisions = log.for_iteration(iteration);
            if self.cancel.is_cancelled() {
                decisions.emit(
                    DecisionKind::Cancelled {
                        completed_iterations: completed,
                    },
                    "stop requested before iteration start",
                );
                stop_reason = StopReason::Cancelled;
                break;
            }

            let guard = exemplar.map(|text| {
                Guard::new(
                    text,
                    GuardThresholds::from(&current_spec.constraints.anti_plagiarism),
                )
            });
            let evaluator = Evaluator::new(&current_spec, &current_config, guard.as_ref())?;
            let ctx = IterationContext {
                spec: &current_spec,
                config: &current_config,
                guard: guard.as_ref(),
                evaluator: &evaluator,
                decisions: &decisions,
            };

            let plans = CandidatePlan::plans(&current_config, iteration);
            let candidates = generator
                .batch(ctx, plans, self.settings.max_concurrency, &self.cancel)
                .await;
            if candidates.is_empty() {
                decisions.emit(
                    DecisionKind::Cancelled {
                        completed_iterations: completed,
                    },
                    "stop requested before any candidate started",
                );
                stop_reason = StopReason::Cancelled;
                break;
            }

            let top = select_best(&candidates)?.clone();
            decisions.emit(
                DecisionKind::Selected {
                    candidate: top.id.clone(),
                    overall: top.overall(),
                    pass_fail: top.report.pass_fail,
                },
                format!("best of {} candidates", candidates.len()),
            );

            if let Some(store) = &self.artifacts {
                store
                    .save_iteration(&run_id, iteration, &candidates, &top.id)
                    .await
                    .with_context(|| format!("Failed to save iteration {iteration}"))?;
            }

            let obs = tracker.observe(top.overall());
            if obs.improved {
                best = Some(BestCandidate {
                    iteration,
                    spec: current_spec.clone(),
                    config: current_config.clone(),
                    candidate: top.clone(),
                });
            }
            completed = iteration;

            let running_best = tracker.best().unwrap_or(top.overall());
            history.push(OptimizerHistoryEntry {
                iteration,
                best_score: top.overall(),
                candidate_id: top.id.clone(),
                pass_fail: top.report.pass_fail,
                improved: obs.improved,
                running_best,
                no_improvement: obs.no_improvement,
            });
            let improvement = obs.improvement.is_finite().then_some(obs.improvement);
            decisions.emit(
                DecisionKind::IterationCompleted {
                    best_score: top.overall(),
                    improved: obs.improved,
                    improvement,
                    no_improvement: obs.no_improvement,
                },
                match improvement {
                    Some(gain) => format!("running best {running_best:.3}, gain {gain:+.4}"),
                    None => format!("first iteration, best {running_best:.3}"),
                },
            );
            info!(
                run_id = run_id.as_str(),
                iteration,
                score = top.overall(),
                running_best,
                improved = obs.improved,
                "Iteration complete"
            );

            if obs.stop {
                decisions.emit(
                    DecisionKind::EarlyStop {
                        improvement: obs.improvement,
                        no_improvement: obs.no_improvement,
                    },
                    format!(
                        "gain below {} for {} iterations",
                        tracker.delta, obs.no_improvement
                    ),
                );
                stop_reason = StopReason::EarlyStop;
                break;
            }

            if iteration < self.settings.max_iters {
                let (next_spec, spec_changes) = mutate_spec(&current_spec, &top.report);
                let (next_config, config_changes) = mutate_config(&current_config, &top.report);
                for change in spec_changes.iter().chain(&config_changes) {
                    emit_mutation(&decisions, change);
                }
                match (next_spec.validate(), next_config.validate()) {
                    (Ok(()), Ok(())) => {
                        current_spec = next_spec;
                        current_config = next_config;
                    }
                    (spec_err, config_err) => {
                        let error = spec_err.err().or(config_err.err());
                        warn!(
                            error = ?error,
                            "Mutation produced invalid settings; keeping previous ones"
                        );
                    }
                }
            }
        }

        let outcome = OptimizationOutcome {
            run_id: run_id.clone(),
            best,
            history,
            stop_reason,
            iterations: completed,
            usage: self.gateway.usage(),
        };

        if let (Some(store), Some(best)) = (&self.artifacts, &outcome.best) {
            store
                .save_final(&run_id, best, &outcome.summary())
                .await
                .context("Failed to save final artifacts")?;
        }

        info!(
            run_id = run_id.as_str(),
            stop_reason = %outcome.stop_reason,
            iterations = outcome.iterations,
            best_score = outcome.best.as_ref().map(|b| b.candidate.overall()),
            "Optimization finished"
        );
        Ok(outcome)
    }
}

fn emit_mutation(decisions: &DecisionLog, change: &Mutation) {
    decisions.emit(
        DecisionKind::Mutation {
            param: change.param.clone(),
            from: change.from,
            to: change.to,
        },
        change.reason.clone(),
    );
}

pub fn new_run_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("opt_{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plateau_needs_two_weak_iterations() {
        let mut tracker = PlateauTracker::new(0.01);
        let first = tracker.observe(0.60);
        assert!(first.improved && !first.stop);
        assert!(first.improvement.is_infinite());

        let second = tracker.observe(0.605);
        assert!(second.improved);
        assert_eq!(second.no_improvement, 1);
        assert!(!second.stop);

        let third = tracker.observe(0.606);
        assert_eq!(third.no_improvement, 2);
        assert!(third.stop);
        assert_eq!(tracker.best(), Some(0.606));
    }

    #[test]
    fn real_gain_resets_the_counter() {
        let mut tracker = PlateauTracker::new(0.01);
        tracker.observe(0.5);
        tracker.observe(0.502);
        let jump = tracker.observe(0.6);
        assert_eq!(jump.no_improvement, 0);
        assert!(!jump.stop);
    }

    #[test]
    fn regression_does_not_replace_best() {
        let mut tracker = PlateauTracker::new(0.01);
        tracker.observe(0.7);
        let worse = tracker.observe(0.4);
        assert!(!worse.improved);
        assert_eq!(tracker.best(), Some(0.7));
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn run_ids_are_short_and_prefixed() {
        let id = new_run_id();
        assert!(id.starts_with("opt_"));
        assert_eq!(id.len(), 12);
    }

    #[test]
    fn settings_builder_defaults() {
        let settings = OptimizerSettings::builder().run_id("fixed").build();
        assert_eq!(settings.max_iters, 5);
        assert_eq!(settings.max_concurrency, 4);
        assert_eq!(settings.run_id.as_deref(), Some("fixed"));
        assert!(settings.git_commit.is_none());
    }
}
