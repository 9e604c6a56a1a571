//! Beat drafting loop.
//!
//! Each beat runs a small state machine:
//!
//! ```text
//! Drafting --ok--> GuardCheck --pass--> Succeeded
//!    ^  |             |
//!    |  +--error--+   +--fail--+
//!    |            v            v
//!    +------ attempts left? ---+--no--> Exhausted
//! ```
//!
//! Without an exemplar there is nothing to guard against and a successful
//! draft goes straight to `Succeeded`. Both terminal states produce a
//! [`BeatResult`]; `Exhausted` marks it guard-failed.

use tracing::{debug, warn};

use ai_client::CompletionRequest;
use storyloom_common::{mask_profanity, Beat, BeatResult, GuardVerdict, StorySpec};
use storyloom_eval::Guard;

use crate::assembler::CandidatePlan;
use crate::events::{DecisionKind, DecisionLog};
use crate::gateway::CompletionGateway;
use crate::prompts::PromptRegistry;

const SYSTEM_PROMPT: &str =
    "You are a literary fiction writer. You write original prose and never reuse source phrasing.";

/// Words of each earlier beat carried into the next prompt.
const CONTEXT_TAIL_WORDS: usize = 60;
const CONTEXT_BEATS: usize = 3;

// ---------------------------------------------------------------------------
// Story memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    pub beat_id: String,
    pub function: String,
    pub text: String,
}

/// Earlier beats of the same candidate, in order.
#[derive(Debug, Clone, Default)]
pub struct StoryMemory {
    entries: Vec<MemoryEntry>,
}

impl StoryMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&mut self, result: &BeatResult) {
        self.entries.push(MemoryEntry {
            beat_id: result.beat_id.clone(),
            function: result.function.clone(),
            text: result.text.clone(),
        });
    }

    pub fn get(&self, beat_id: &str) -> Option<&MemoryEntry> {
        self.entries.iter().find(|e| e.beat_id == beat_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tails of the most recent beats, oldest first.
    pub fn context(&self) -> String {
        let skip = self.entries.len().saturating_sub(CONTEXT_BEATS);
        self.entries[skip..]
            .iter()
            .filter(|e| !e.text.trim().is_empty())
            .map(|e| {
                let words: Vec<&str> = e.text.split_whitespace().collect();
                let start = words.len().saturating_sub(CONTEXT_TAIL_WORDS);
                let ellipsis = if start > 0 { "... " } else { "" };
                format!(
                    "[{}, {}] {ellipsis}{}",
                    e.beat_id,
                    e.function,
                    words[start..].join(" ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ---------------------------------------------------------------------------
// Drafting state machine
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum DraftState {
    Drafting { attempt: u32, hint: Option<String> },
    GuardCheck { attempt: u32, text: String },
    Succeeded { attempt: u32, text: String, verdict: Option<GuardVerdict> },
    Exhausted { attempt: u32 },
}

/// Instruction added to every retry prompt.
pub fn retry_hint(attempt: u32, violations: &[String]) -> String {
    let mut hint = format!(
        "**Important:** Avoid phrasing from earlier drafts and from the source text. \
         Use fresh wording and different sentence shapes. This is attempt {}.",
        attempt + 1
    );
    if !violations.is_empty() {
        hint.push_str("\nThe previous draft had these problems:");
        for v in violations {
            hint.push_str("\n- ");
            hint.push_str(v);
        }
    }
    hint
}

pub struct BeatDrafter<'a> {
    gateway: &'a CompletionGateway,
    prompts: &'a PromptRegistry,
    guard: Option<&'a Guard>,
    max_retries: u32,
    max_tokens: u32,
}

impl<'a> BeatDrafter<'a> {
    pub fn new(
        gateway: &'a CompletionGateway,
        prompts: &'a PromptRegistry,
        guard: Option<&'a Guard>,
    ) -> Self {
        Self {
            gateway,
            prompts,
            guard,
            max_retries: 2,
            max_tokens: 1024,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub async fn draft(
        &self,
        spec: &StorySpec,
        beat: &Beat,
        memory: &StoryMemory,
        plan: &CandidatePlan,
        decisions: &DecisionLog,
    ) -> BeatResult {
        let context = memory.context();
        let mut last_text = String::new();
        let mut last_verdict: Option<GuardVerdict> = None;
        let mut last_error: Option<String> = None;
        let mut state = DraftState::Drafting {
            attempt: 0,
            hint: None,
        };

        loop {
            state = match state {
                DraftState::Drafting { attempt, hint } => {
                    decisions.emit(
                        DecisionKind::DraftAttempt {
                            candidate: plan.id.clone(),
                            beat_id: beat.id.clone(),
                            attempt,
                            temperature: plan.temperature,
                        },
                        if attempt == 0 {
                            "first draft".to_string()
                        } else {
                            "retry with fresh-phrasing hint".to_string()
                        },
                    );

                    let prompt = self.prompts.beat_prompt(
                        spec,
                        beat,
                        &context,
                        hint.as_deref().unwrap_or(""),
                    );
                    let request = CompletionRequest::new("")
                        .system(SYSTEM_PROMPT)
                        .temperature(plan.temperature as f32)
                        .top_p(plan.top_p as f32)
                        .max_tokens(self.max_tokens)
                        .seed(plan.seed.wrapping_add(u64::from(attempt)));

                    match self.gateway.complete(&prompt, request).await {
                        Ok(raw) => {
                            let text = clean_draft(&raw, spec);
                            if self.guard.is_some() {
                                DraftState::GuardCheck { attempt, text }
                            } else {
                                DraftState::Succeeded {
                                    attempt,
                                    text,
                                    verdict: None,
                                }
                            }
                        }
                        Err(e) => {
                            let retryable = e.is_retryable();
                            warn!(
                                candidate = plan.id.as_str(),
                                beat = beat.id.as_str(),
                                attempt,
                                retryable,
                                error = %e,
                                "Beat completion failed"
                            );
                            decisions.emit(
                                DecisionKind::DraftFailed {
                                    candidate: plan.id.clone(),
                                    beat_id: beat.id.clone(),
                                    attempt,
                                    error: e.to_string(),
                                    retryable,
                                },
                                "completion call failed",
                            );
                            last_error = Some(e.to_string());
                            if attempt < self.max_retries {
                                DraftState::Drafting {
                                    attempt: attempt + 1,
                                    hint: Some(retry_hint(attempt + 1, &[])),
                                }
                            } else {
                                DraftState::Exhausted { attempt }
                            }
                        }
                    }
                }

                DraftState::GuardCheck { attempt, text } => {
                    let verdict = match self.guard {
                        Some(guard) => guard.check(&text),
                        None => GuardVerdict::clear(),
                    };
                    decisions.emit(
                        DecisionKind::GuardChecked {
                            candidate: plan.id.clone(),
                            beat_id: Some(beat.id.clone()),
                            passed: verdict.passed,
                            violations: verdict.violations.clone(),
                        },
                        format!(
                            "max shared run {}, overlap {:.3}, simhash distance {}",
                            verdict.max_shared_ngram,
                            verdict.overlap_pct,
                            verdict.simhash_hamming_distance
                        ),
                    );

                    if verdict.passed {
                        DraftState::Succeeded {
                            attempt,
                            text,
                            verdict: Some(verdict),
                        }
                    } else {
                        let next = if attempt < self.max_retries {
                            DraftState::Drafting {
                                attempt: attempt + 1,
                                hint: Some(retry_hint(attempt + 1, &verdict.violations)),
                            }
                        } else {
                            DraftState::Exhausted { attempt }
                        };
                        last_text = text;
                        last_verdict = Some(verdict);
                        next
                    }
                }

                DraftState::Succeeded {
                    attempt,
                    text,
                    verdict,
                } => {
                    debug!(
                        candidate = plan.id.as_str(),
                        beat = beat.id.as_str(),
                        retries = attempt,
                        words = text.split_whitespace().count(),
                        "Beat drafted"
                    );
                    return BeatResult {
                        beat_id: beat.id.clone(),
                        function: beat.function.clone(),
                        text,
                        guard_passed: true,
                        retries: attempt,
                        guard: verdict,
                        error: None,
                    };
                }

                DraftState::Exhausted { attempt } => {
                    warn!(
                        candidate = plan.id.as_str(),
                        beat = beat.id.as_str(),
                        attempts = attempt + 1,
                        "Beat retry budget exhausted"
                    );
                    decisions.emit(
                        DecisionKind::BeatExhausted {
                            candidate: plan.id.clone(),
                            beat_id: beat.id.clone(),
                            attempts: attempt + 1,
                        },
                        "keeping the last draft, flagged guard-failed",
                    );
                    let error = if last_text.is_empty() {
                        last_error.take()
                    } else {
                        None
                    };
                    return BeatResult {
                        beat_id: beat.id.clone(),
                        function: beat.function.clone(),
                        text: std::mem::take(&mut last_text),
                        guard_passed: false,
                        retries: attempt,
                        guard: last_verdict.take(),
                        error,
                    };
                }
            };
        }
    }
}

/// Trim the reply and mask profanity when the voice disallows it.
fn clean_draft(raw: &str, spec: &StorySpec) -> String {
    let text = ai_client::util::strip_code_fence(raw);
    if spec.voice.profanity.allowed {
        text.to_string()
    } else {
        mask_profanity(text, &spec.voice.profanity.substitution).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, text: &str) -> BeatResult {
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
    fn context_keeps_recent_tails() {
        let mut memory = StoryMemory::new();
        memory.remember(&result("b1", "short opening"));
        let long = vec!["word"; 100].join(" ");
        memory.remember(&result("b2", &long));

        let context = memory.context();
        assert!(context.starts_with("[b1, hook] short opening"));
        assert!(context.contains("[b2, hook] ... word"));
        let tail = context.split("[b2, hook] ... ").nth(1).unwrap();
        assert_eq!(tail.split_whitespace().count(), CONTEXT_TAIL_WORDS);
        assert_eq!(memory.get("b2").map(|e| e.text.len()), Some(long.len()));
    }

    #[test]
    fn context_is_limited_to_recent_beats() {
        let mut memory = StoryMemory::new();
        for i in 0..5 {
            memory.remember(&result(&format!("b{i}"), "text"));
        }
        let context = memory.context();
        assert!(!context.contains("[b1,"));
        assert!(context.contains("[b2,"));
        assert!(context.contains("[b4,"));
    }

    #[test]
    fn retry_hint_lists_violations() {
        let hint = retry_hint(1, &["Overlap 0.2 exceeds threshold 0.03".into()]);
        assert!(hint.contains("Avoid phrasing"));
        assert!(hint.contains("attempt 2"));
        assert!(hint.contains("- Overlap 0.2"));
    }

    #[test]
    fn drafts_are_masked_when_profanity_is_disallowed() {
        let spec = StorySpec::default();
        let cleaned = clean_draft("```\nWell, damn it.\n```", &spec);
        assert_eq!(cleaned, "Well, [bleep] it.");

        let mut allowed = StorySpec::default();
        allowed.voice.profanity.allowed = true;
        assert_eq!(clean_draft("Well, damn it.", &allowed), "Well, damn it.");
    }
}
