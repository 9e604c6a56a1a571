//! Beat drafting loop against scripted completion providers.

use std::sync::Arc;

use ai_client::{AiError, FailingCompletion, MockCompletion};
use storyloom_common::{Beat, GenerationConfig, StorySpec};
use storyloom_engine::{
    BeatDrafter, CandidatePlan, CompletionGateway, DecisionLog, MemoryDecisionSink,
    PromptRegistry, StoryMemory,
};
use storyloom_eval::{Guard, GuardThresholds};

const EXEMPLAR: &str = "When the ferry stopped running that winter, my aunt began rowing \
    the mail across the sound herself, two sacks in the bow and a thermos wedged between \
    her boots, and nobody on the island ever asked her to stop.";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn spec() -> StorySpec {
    let mut spec = StorySpec::default();
    spec.form.beats = vec![Beat::new("b1", "hook", 40), Beat::new("b2", "turn", 40)];
    spec
}

fn plan() -> CandidatePlan {
    CandidatePlan::sweep(&GenerationConfig::default(), 1, 0)
}

fn guard() -> Guard {
    Guard::new(EXEMPLAR, GuardThresholds::default())
}

struct Harness {
    sink: Arc<MemoryDecisionSink>,
    decisions: DecisionLog,
    prompts: PromptRegistry,
}

impl Harness {
    fn new() -> Self {
        let sink = Arc::new(MemoryDecisionSink::new());
        Self {
            decisions: DecisionLog::new(sink.clone(), "test"),
            sink,
            prompts: PromptRegistry::builtin().unwrap(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn original_draft_passes_on_first_attempt() {
    let h = Harness::new();
    let mock = Arc::new(MockCompletion::new());
    let gateway = CompletionGateway::new(mock.clone());
    let guard = guard();
    let spec = spec();

    let result = BeatDrafter::new(&gateway, &h.prompts, Some(&guard))
        .draft(&spec, &spec.form.beats[0], &StoryMemory::new(), &plan(), &h.decisions)
        .await;

    assert!(result.guard_passed);
    assert_eq!(result.retries, 0);
    assert_eq!(result.text.split_whitespace().count(), 40);
    assert!(result.guard.as_ref().is_some_and(|v| v.passed));
    assert_eq!(mock.call_count(), 1);
    assert_eq!(h.sink.count("draft_attempt"), 1);
    assert_eq!(h.sink.count("guard_checked"), 1);
}

#[tokio::test]
async fn copied_draft_is_retried_with_a_hint() {
    let h = Harness::new();
    let mock = Arc::new(MockCompletion::new().then(EXEMPLAR));
    let gateway = CompletionGateway::new(mock.clone());
    let guard = guard();
    let spec = spec();

    let result = BeatDrafter::new(&gateway, &h.prompts, Some(&guard))
        .draft(&spec, &spec.form.beats[0], &StoryMemory::new(), &plan(), &h.decisions)
        .await;

    assert!(result.guard_passed);
    assert_eq!(result.retries, 1);
    assert_ne!(result.text, EXEMPLAR);

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].prompt.contains("Avoid phrasing"));
    assert!(requests[1].prompt.contains("Avoid phrasing"));
    assert!(requests[1].prompt.contains("attempt 2"));
    assert_ne!(requests[0].seed, requests[1].seed);
}

#[tokio::test]
async fn retry_budget_is_three_attempts() {
    let h = Harness::new();
    let mock = Arc::new(
        MockCompletion::new()
            .then(EXEMPLAR)
            .then(EXEMPLAR)
            .then(EXEMPLAR),
    );
    let gateway = CompletionGateway::new(mock.clone());
    let guard = guard();
    let spec = spec();

    let result = BeatDrafter::new(&gateway, &h.prompts, Some(&guard))
        .draft(&spec, &spec.form.beats[0], &StoryMemory::new(), &plan(), &h.decisions)
        .await;

    assert!(!result.guard_passed);
    assert_eq!(result.retries, 2);
    assert_eq!(result.text, EXEMPLAR);
    assert!(result.error.is_none());
    assert!(result.guard.as_ref().is_some_and(|v| !v.violations.is_empty()));
    assert_eq!(mock.call_count(), 3);
    assert_eq!(h.sink.count("beat_exhausted"), 1);
}

#[tokio::test]
async fn failing_provider_exhausts_without_text() {
    let h = Harness::new();
    let gateway = CompletionGateway::new(Arc::new(FailingCompletion::always()));
    let spec = spec();

    let result = BeatDrafter::new(&gateway, &h.prompts, None)
        .draft(&spec, &spec.form.beats[0], &StoryMemory::new(), &plan(), &h.decisions)
        .await;

    assert!(!result.guard_passed);
    assert!(result.text.is_empty());
    assert!(result.error.as_deref().is_some_and(|e| e.contains("Network")));
    assert_eq!(h.sink.count("draft_failed"), 3);
    assert_eq!(gateway.usage().calls, 3);
}

#[tokio::test]
async fn transient_failure_recovers() {
    let h = Harness::new();
    let gateway = CompletionGateway::new(Arc::new(FailingCompletion::times(
        1,
        MockCompletion::new(),
    )));
    let spec = spec();

    let result = BeatDrafter::new(&gateway, &h.prompts, None)
        .draft(&spec, &spec.form.beats[0], &StoryMemory::new(), &plan(), &h.decisions)
        .await;

    assert!(result.guard_passed);
    assert_eq!(result.retries, 1);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn malformed_payload_is_retried() {
    let h = Harness::new();
    let gateway = CompletionGateway::new(Arc::new(
        FailingCompletion::times(1, MockCompletion::new())
            .with_error(|| AiError::Parse("malformed provider json".into())),
    ));
    let spec = spec();

    let result = BeatDrafter::new(&gateway, &h.prompts, None)
        .draft(&spec, &spec.form.beats[0], &StoryMemory::new(), &plan(), &h.decisions)
        .await;

    assert!(result.guard_passed);
    assert!(!result.text.is_empty());
    assert_eq!(result.retries, 1);
    assert!(result.error.is_none());
    assert_eq!(h.sink.count("draft_failed"), 1);
    assert_eq!(gateway.usage().calls, 2);
}

#[tokio::test]
async fn without_exemplar_there_is_no_guard_check() {
    let h = Harness::new();
    let mock = Arc::new(MockCompletion::new().then(EXEMPLAR));
    let gateway = CompletionGateway::new(mock.clone());
    let spec = spec();

    let result = BeatDrafter::new(&gateway, &h.prompts, None)
        .draft(&spec, &spec.form.beats[0], &StoryMemory::new(), &plan(), &h.decisions)
        .await;

    assert!(result.guard_passed);
    assert!(result.guard.is_none());
    assert_eq!(result.text, EXEMPLAR);
    assert_eq!(h.sink.count("guard_checked"), 0);
}

#[tokio::test]
async fn later_beats_see_earlier_text() {
    let h = Harness::new();
    let mock = Arc::new(MockCompletion::new().then("The kettle sang twice before dawn."));
    let gateway = CompletionGateway::new(mock.clone());
    let spec = spec();
    let drafter = BeatDrafter::new(&gateway, &h.prompts, None);

    let mut memory = StoryMemory::new();
    let first = drafter
        .draft(&spec, &spec.form.beats[0], &memory, &plan(), &h.decisions)
        .await;
    memory.remember(&first);
    drafter
        .draft(&spec, &spec.form.beats[1], &memory, &plan(), &h.decisions)
        .await;

    let requests = mock.requests();
    assert!(requests[1].prompt.contains("[b1, hook]"));
    assert!(requests[1].prompt.contains("kettle sang twice"));
}
