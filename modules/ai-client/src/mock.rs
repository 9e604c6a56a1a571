//! Deterministic completion providers for tests and offline runs.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{AiError, AiResult};
use crate::traits::{Completion, CompletionRequest, TextCompletion, Usage};

const VOCABULARY: &[&str] = &[
    "river", "lantern", "morning", "kitchen", "window", "stone", "letter", "orchard", "harbor",
    "coat", "bread", "engine", "salt", "ladder", "bell", "field", "mirror", "smoke", "garden",
    "station", "quiet", "slow", "bright", "narrow", "cold", "open", "heavy", "thin", "late",
    "walked", "carried", "watched", "folded", "waited", "listened", "counted", "kept", "turned",
    "opened", "under", "across", "beside", "toward", "through", "again", "still", "almost",
];

const DEFAULT_TARGET_WORDS: usize = 80;

/// Scripted, deterministic completion provider.
///
/// Resolution order for each call: queued responses (FIFO), then the first
/// rule whose needle appears in the prompt, then generated filler prose whose
/// length follows a `Target words: N` line in the prompt.
pub struct MockCompletion {
    model: String,
    queue: Mutex<VecDeque<String>>,
    rules: Vec<(String, String)>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl Default for MockCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCompletion {
    pub fn new() -> Self {
        Self {
            model: "mock-v1".to_string(),
            queue: Mutex::new(VecDeque::new()),
            rules: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Queue a response for the next unanswered call.
    pub fn then(self, text: impl Into<String>) -> Self {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(text.into());
        }
        self
    }

    /// Answer every prompt containing `needle` with `text`.
    pub fn on_prompt(mut self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.rules.push((needle.into(), text.into()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn respond(&self, request: &CompletionRequest) -> String {
        if let Some(text) = self.queue.lock().ok().and_then(|mut q| q.pop_front()) {
            return text;
        }
        if let Some((_, text)) = self
            .rules
            .iter()
            .find(|(needle, _)| request.prompt.contains(needle.as_str()))
        {
            return text.clone();
        }
        if request.prompt.contains("single number") {
            return "0.7".to_string();
        }
        filler_prose(request)
    }
}

#[async_trait]
impl TextCompletion for MockCompletion {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> AiResult<Completion> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        let text = self.respond(request);
        let prompt_tokens = request.prompt.split_whitespace().count() as u32;
        let completion_tokens = text.split_whitespace().count() as u32;
        Ok(Completion {
            text,
            usage: Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }
}

/// Fails the first `failures` calls with a network error, then delegates.
pub struct FailingCompletion<T = MockCompletion> {
    remaining: AtomicUsize,
    error: fn() -> AiError,
    inner: T,
}

impl FailingCompletion<MockCompletion> {
    pub fn always() -> Self {
        Self::times(usize::MAX, MockCompletion::new())
    }
}

impl<T: TextCompletion> FailingCompletion<T> {
    pub fn times(failures: usize, inner: T) -> Self {
        Self {
            remaining: AtomicUsize::new(failures),
            error: || AiError::Network("connection reset by mock".into()),
            inner,
        }
    }

    /// Fail with a different error kind.
    pub fn with_error(mut self, error: fn() -> AiError) -> Self {
        self.error = error;
        self
    }
}

#[async_trait]
impl<T: TextCompletion> TextCompletion for FailingCompletion<T> {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(&self, request: &CompletionRequest) -> AiResult<Completion> {
        let failed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err((self.error)());
        }
        self.inner.complete(request).await
    }
}

// -----------------------------------------------------------------------------
// Filler prose
// -----------------------------------------------------------------------------

fn target_words(prompt: &str) -> usize {
    prompt
        .lines()
        .find_map(|line| {
            let rest = line.trim().trim_start_matches(['-', '*', ' ']);
            let rest = rest.strip_prefix("Target words:")?;
            rest.trim().trim_start_matches('~').parse::<usize>().ok()
        })
        .or_else(|| {
            // Repair prompts carry the draft in a fence; echo its length.
            let start = prompt.find("```")?;
            let body = &prompt[start + 3..];
            let end = body.find("```")?;
            Some(body[..end].split_whitespace().count())
        })
        .unwrap_or(DEFAULT_TARGET_WORDS)
        .max(1)
}

fn filler_prose(request: &CompletionRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.prompt.as_bytes());
    hasher.update(request.seed.unwrap_or(0).to_le_bytes());
    let digest = hasher.finalize();
    let mut state = u64::from_le_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ]) | 1;

    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    let total = target_words(&request.prompt);
    let mut out = String::new();
    let mut sentence_len = 0usize;
    let mut sentence_target = 6 + (next() % 10) as usize;
    let mut paragraph_words = 0usize;

    for i in 0..total {
        let word = VOCABULARY[(next() % VOCABULARY.len() as u64) as usize];
        if sentence_len == 0 {
            if !out.is_empty() {
                out.push_str(if paragraph_words >= 60 { "\n\n" } else { " " });
                if paragraph_words >= 60 {
                    paragraph_words = 0;
                }
            }
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        } else {
            out.push(' ');
            out.push_str(word);
        }
        sentence_len += 1;
        paragraph_words += 1;
        if sentence_len >= sentence_target || i + 1 == total {
            out.push('.');
            sentence_len = 0;
            sentence_target = 6 + (next() % 10) as usize;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_responses_come_first() {
        let mock = MockCompletion::new()
            .on_prompt("beat", "rule text")
            .then("first")
            .then("second");

        let request = CompletionRequest::new("write the beat");
        assert_eq!(mock.complete(&request).await.unwrap().text, "first");
        assert_eq!(mock.complete(&request).await.unwrap().text, "second");
        assert_eq!(mock.complete(&request).await.unwrap().text, "rule text");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn filler_honours_target_words_and_is_deterministic() {
        let mock = MockCompletion::new();
        let request = CompletionRequest::new("Beat: hook\nTarget words: 42\n").seed(7);

        let a = mock.complete(&request).await.unwrap().text;
        let b = mock.complete(&request).await.unwrap().text;
        assert_eq!(a, b);
        assert_eq!(a.split_whitespace().count(), 42);
        assert!(a.ends_with('.'));
    }

    #[tokio::test]
    async fn different_seeds_give_different_prose() {
        let mock = MockCompletion::new();
        let a = mock
            .complete(&CompletionRequest::new("Target words: 30").seed(1))
            .await
            .unwrap();
        let b = mock
            .complete(&CompletionRequest::new("Target words: 30").seed(2))
            .await
            .unwrap();
        assert_ne!(a.text, b.text);
    }

    #[tokio::test]
    async fn failing_completion_recovers_after_budget() {
        let provider = FailingCompletion::times(2, MockCompletion::new().then("ok"));
        let request = CompletionRequest::new("x");

        assert!(provider.complete(&request).await.is_err());
        assert!(provider.complete(&request).await.is_err());
        assert_eq!(provider.complete(&request).await.unwrap().text, "ok");
    }
}
