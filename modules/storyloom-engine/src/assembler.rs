//! Candidate assembly: draft every beat in order, stitch, guard, repair once,
//! mask.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ai_client::CompletionRequest;
use storyloom_common::text::{paragraphs, variance, word_count};
use storyloom_common::{mask_profanity, BeatResult, GenerationConfig, GuardVerdict, StorySpec};
use storyloom_eval::Guard;

use crate::adapters::extract_fenced_text;
use crate::drafter::{BeatDrafter, StoryMemory};
use crate::events::{DecisionKind, DecisionLog};
use crate::gateway::CompletionGateway;
use crate::prompts::PromptRegistry;

pub const BEAT_SEPARATOR: &str = "\n\n";

/// Paragraph-length variance (squared words) above which repair also asks
/// for steadier rhythm.
const RHYTHM_VARIANCE: f64 = 100.0;

/// Sampling settings for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePlan {
    pub id: String,
    pub index: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub seed: u64,
}

impl CandidatePlan {
    /// Candidate `index` of the configured population, sweeping temperature
    /// and top_p across their ranges.
    pub fn sweep(config: &GenerationConfig, iteration: usize, index: usize) -> Self {
        let n = config.num_candidates;
        Self {
            id: format!("iter{iteration}_cand{index:02}"),
            index,
            temperature: config.temperature.at(index, n),
            top_p: config.top_p.at(index, n),
            seed: config.seed.wrapping_add(index as u64),
        }
    }

    pub fn plans(config: &GenerationConfig, iteration: usize) -> Vec<Self> {
        (0..config.num_candidates)
            .map(|i| Self::sweep(config, iteration, i))
            .collect()
    }
}

/// Everything assembly produced for one candidate, before evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assembly {
    pub beats: Vec<BeatResult>,
    pub stitched: String,
    pub stitched_guard: Option<GuardVerdict>,
    pub repair_applied: bool,
    /// Verdict on the repaired text, when repair ran.
    pub repaired_guard: Option<GuardVerdict>,
    pub final_text: String,
}

impl Assembly {
    pub fn beat_texts(&self) -> Vec<String> {
        self.beats.iter().map(|b| b.text.clone()).collect()
    }
}

pub struct CandidateAssembler<'a> {
    gateway: &'a CompletionGateway,
    prompts: &'a PromptRegistry,
    guard: Option<&'a Guard>,
    config: &'a GenerationConfig,
}

impl<'a> CandidateAssembler<'a> {
    pub fn new(
        gateway: &'a CompletionGateway,
        prompts: &'a PromptRegistry,
        guard: Option<&'a Guard>,
        config: &'a GenerationConfig,
    ) -> Self {
        Self {
            gateway,
            prompts,
            guard,
            config,
        }
    }

    pub async fn assemble(
        &self,
        spec: &StorySpec,
        plan: &CandidatePlan,
        decisions: &DecisionLog,
    ) -> Assembly {
        let drafter = BeatDrafter::new(self.gateway, self.prompts, self.guard)
            .with_max_retries(self.config.max_retries)
            .with_max_tokens(self.config.max_tokens);

        // Beats depend on earlier beats, so they run strictly in order.
        let mut memory = StoryMemory::new();
        let mut beats = Vec::with_capacity(spec.form.beats.len());
        for beat in &spec.form.beats {
            let result = drafter.draft(spec, beat, &memory, plan, decisions).await;
            memory.remember(&result);
            beats.push(result);
        }

        let stitched = stitch(&beats);

        let mut repair_applied = false;
        let mut repaired_guard = None;
        let mut text = stitched.clone();

        let stitched_guard = self.guard.map(|guard| {
            let verdict = guard.check(&stitched);
            decisions.emit(
                DecisionKind::GuardChecked {
                    candidate: plan.id.clone(),
                    beat_id: None,
                    passed: verdict.passed,
                    violations: verdict.violations.clone(),
                },
                "stitched text",
            );
            verdict
        });

        if let (Some(guard), Some(verdict)) = (self.guard, stitched_guard.as_ref()) {
            if !verdict.passed {
                match self.repair(spec, &stitched, verdict, plan).await {
                    Some(repaired) => {
                        let after = guard.check(&repaired);
                        decisions.emit(
                            DecisionKind::Repair {
                                candidate: plan.id.clone(),
                                violations: verdict.violation_count(),
                                applied: true,
                                passed_after: Some(after.passed),
                            },
                            if after.passed {
                                "repair cleared the guard"
                            } else {
                                "repair did not clear the guard; reported as is"
                            },
                        );
                        text = repaired;
                        repair_applied = true;
                        repaired_guard = Some(after);
                    }
                    None => decisions.emit(
                        DecisionKind::Repair {
                            candidate: plan.id.clone(),
                            violations: verdict.violation_count(),
                            applied: false,
                            passed_after: None,
                        },
                        if self.config.repair_enabled {
                            "repair call failed; keeping stitched text"
                        } else {
                            "repair disabled"
                        },
                    ),
                }
            }
        }

        let final_text = if spec.voice.profanity.allowed {
            text
        } else {
            mask_profanity(&text, &spec.voice.profanity.substitution).into_owned()
        };

        info!(
            candidate = plan.id.as_str(),
            beats = beats.len(),
            words = word_count(&final_text),
            repair_applied,
            "Candidate assembled"
        );

        Assembly {
            beats,
            stitched,
            stitched_guard,
            repair_applied,
            repaired_guard,
            final_text,
        }
    }

    /// Single repair call. `None` when repair is disabled, the call fails
    /// or the reply is empty.
    async fn repair(
        &self,
        spec: &StorySpec,
        text: &str,
        verdict: &GuardVerdict,
        plan: &CandidatePlan,
    ) -> Option<String> {
        if !self.config.repair_enabled {
            return None;
        }
        let prompt = self
            .prompts
            .repair_prompt(spec, text, &verdict.violations, &repair_notes(text));
        let request = CompletionRequest::new("")
            .temperature(plan.temperature as f32)
            .top_p(plan.top_p as f32)
            .max_tokens(self.config.max_tokens.saturating_mul(4))
            .seed(plan.seed);

        match self.gateway.complete(&prompt, request).await {
            Ok(reply) => {
                let repaired = extract_fenced_text(&reply);
                (!repaired.is_empty()).then_some(repaired)
            }
            Err(e) => {
                warn!(candidate = plan.id.as_str(), error = %e, "Repair call failed");
                None
            }
        }
    }
}

/// Beat texts joined with a blank line; empty beats are skipped.
pub fn stitch(beats: &[BeatResult]) -> String {
    beats
        .iter()
        .map(|b| b.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(BEAT_SEPARATOR)
}

/// Extra repair instructions derived from the text itself.
pub fn repair_notes(text: &str) -> Vec<String> {
    let lengths: Vec<f64> = paragraphs(text)
        .iter()
        .map(|p| word_count(p) as f64)
        .collect();
    let mut notes = Vec::new();
    if lengths.len() > 1 && variance(&lengths) > RHYTHM_VARIANCE {
        notes.push(
            "Paragraph lengths swing widely; even out the rhythm while keeping the breaks"
                .to_string(),
        );
    }
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_common::SamplingRange;

    fn beat(id: &str, text: &str) -> BeatResult {
        BeatResult {
            beat_id: id.into(),
            function: "hook".into(),
            text: text.into(),
            guard_passed: true,
            retries: 0,
            guard: None,
            error: None,
        }
    }

    #[test]
    fn stitch_joins_with_blank_lines() {
        let beats = vec![beat("a", "One.\n"), beat("b", ""), beat("c", "  Two.")];
        assert_eq!(stitch(&beats), "One.\n\nTwo.");
        assert_eq!(stitch(&[]), "");
    }

    #[test]
    fn repair_notes_flag_uneven_paragraphs() {
        let even = format!("{}\n\n{}", vec!["w"; 40].join(" "), vec!["w"; 42].join(" "));
        assert!(repair_notes(&even).is_empty());
        let uneven = format!("{}\n\n{}", vec!["w"; 5].join(" "), vec!["w"; 80].join(" "));
        assert_eq!(repair_notes(&uneven).len(), 1);
    }

    #[test]
    fn plans_sweep_sampling_ranges() {
        let config = GenerationConfig {
            num_candidates: 3,
            temperature: SamplingRange::new(0.6, 1.0),
            seed: 10,
            ..GenerationConfig::default()
        };
        let plans = CandidatePlan::plans(&config, 1);
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].temperature, 0.6);
        assert!((plans[1].temperature - 0.8).abs() < 1e-12);
        assert!((plans[2].temperature - 1.0).abs() < 1e-12);
        assert_eq!(plans[2].seed, 12);
        assert_eq!(plans[0].id, "iter1_cand00");
    }
}
