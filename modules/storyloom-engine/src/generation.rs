//! One iteration's candidate population.
//!
//! Candidates share nothing mutable except the response cache, so they run
//! concurrently through a bounded pool. Beats inside a candidate stay
//! sequential (see [`crate::assembler`]).

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use ai_client::CompletionRequest;
use storyloom_common::{Candidate, GenerationConfig, Repro, StorySpec};
use storyloom_eval::{EvalInput, Evaluator, Guard};

use crate::adapters::parse_score;
use crate::assembler::{CandidateAssembler, CandidatePlan};
use crate::events::{DecisionKind, DecisionLog};
use crate::gateway::CompletionGateway;
use crate::optimizer::CancelFlag;
use crate::prompts::PromptRegistry;

/// Neutral judge score when the reply has no number in it.
const JUDGE_FALLBACK: f64 = 0.5;

/// Read-only inputs shared by every candidate of an iteration.
#[derive(Clone, Copy)]
pub struct IterationContext<'a> {
    pub spec: &'a StorySpec,
    pub config: &'a GenerationConfig,
    pub guard: Option<&'a Guard>,
    pub evaluator: &'a Evaluator<'a>,
    pub decisions: &'a DecisionLog,
}

pub struct Generator<'a> {
    gateway: &'a CompletionGateway,
    prompts: &'a PromptRegistry,
    git_commit: Option<String>,
}

impl<'a> Generator<'a> {
    pub fn new(gateway: &'a CompletionGateway, prompts: &'a PromptRegistry) -> Self {
        Self {
            gateway,
            prompts,
            git_commit: None,
        }
    }

    pub fn with_git_commit(mut self, git_commit: Option<String>) -> Self {
        self.git_commit = git_commit;
        self
    }

    /// Assemble and evaluate a single candidate.
    pub async fn candidate(&self, ctx: IterationContext<'_>, plan: &CandidatePlan) -> Candidate {
        let assembler = CandidateAssembler::new(self.gateway, self.prompts, ctx.guard, ctx.config);
        let assembly = assembler.assemble(ctx.spec, plan, ctx.decisions).await;

        let llm_stylefit = if ctx.config.llm_stylefit && !assembly.final_text.trim().is_empty() {
            self.judge_style(ctx.spec, &assembly.final_text, plan).await
        } else {
            None
        };

        // Repair rewrites the whole text, so beat boundaries no longer hold.
        let beat_texts = (!assembly.repair_applied).then(|| assembly.beat_texts());

        let report = ctx.evaluator.evaluate(
            &EvalInput::builder()
                .candidate_id(plan.id.as_str())
                .text(assembly.final_text.as_str())
                .beat_texts(beat_texts.as_deref())
                .llm_stylefit(llm_stylefit)
                .repro(Some(Repro {
                    model: self.gateway.model().to_string(),
                    temperature: plan.temperature,
                    git_commit: self.git_commit.clone(),
                }))
                .build(),
        );

        ctx.decisions.emit(
            DecisionKind::CandidateEvaluated {
                candidate: plan.id.clone(),
                overall: report.overall,
                pass_fail: report.pass_fail,
                freshness: report.scores.freshness,
            },
            format!(
                "stylefit {:.3}, formfit {:.3}, coherence {:.3}, cadence {:.3}",
                report.scores.stylefit,
                report.scores.formfit,
                report.scores.coherence,
                report.scores.cadence
            ),
        );

        Candidate {
            id: plan.id.clone(),
            beats: assembly.beats,
            stitched: assembly.stitched,
            stitched_guard: assembly.stitched_guard,
            repair_applied: assembly.repair_applied,
            final_text: assembly.final_text,
            temperature: plan.temperature,
            top_p: plan.top_p,
            report,
        }
    }

    /// Run every plan through a pool of at most `max_concurrency` candidates.
    /// Plans not yet started when `cancel` fires are skipped. Results come
    /// back ordered by candidate id.
    pub async fn batch(
        &self,
        ctx: IterationContext<'_>,
        plans: Vec<CandidatePlan>,
        max_concurrency: usize,
        cancel: &CancelFlag,
    ) -> Vec<Candidate> {
        let requested = plans.len();
        let mut candidates: Vec<Candidate> = stream::iter(plans)
            .map(|plan| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                Some(self.candidate(ctx, &plan).await)
            })
            .buffer_unordered(max_concurrency.max(1))
            .filter_map(|candidate| async move { candidate })
            .collect()
            .await;

        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        info!(
            requested,
            completed = candidates.len(),
            "Candidate batch finished"
        );
        candidates
    }

    /// Model-judged style score, `None` when the call fails.
    async fn judge_style(&self, spec: &StorySpec, text: &str, plan: &CandidatePlan) -> Option<f64> {
        let prompt = self.prompts.stylefit_prompt(spec, text);
        let request = CompletionRequest::new("")
            .temperature(0.0)
            .top_p(1.0)
            .max_tokens(16)
            .seed(plan.seed);
        match self.gateway.complete(&prompt, request).await {
            Ok(reply) => Some(parse_score(&reply, JUDGE_FALLBACK)),
            Err(e) => {
                warn!(candidate = plan.id.as_str(), error = %e, "Style judge call failed");
                None
            }
        }
    }
}
