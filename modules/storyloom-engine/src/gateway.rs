//! Single choke point for completion calls: timeout, cache and usage.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use ai_client::{AiError, AiResult, CompletionRequest, TextCompletion};

use crate::cache::{CacheKey, ResponseCache};
use crate::prompts::RenderedPrompt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

pub struct CompletionGateway {
    client: Arc<dyn TextCompletion>,
    cache: Option<Arc<ResponseCache>>,
    timeout: Duration,
    calls: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl CompletionGateway {
    pub fn new(client: Arc<dyn TextCompletion>) -> Self {
        Self {
            client,
            cache: None,
            timeout: Duration::from_secs(60),
            calls: AtomicU64::new(0),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn usage(&self) -> UsageTotals {
        UsageTotals {
            calls: self.calls.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
        }
    }

    /// Send a rendered prompt. `request.prompt` is replaced by the rendered
    /// text.
    pub async fn complete(
        &self,
        prompt: &RenderedPrompt,
        request: CompletionRequest,
    ) -> AiResult<String> {
        let request = CompletionRequest {
            prompt: prompt.text.clone(),
            ..request
        };
        match &self.cache {
            Some(cache) => {
                let key = CacheKey::for_request(
                    prompt.component,
                    self.client.model(),
                    &prompt.version,
                    &request,
                );
                cache
                    .memo(key)
                    .get_or(|| self.call(prompt.component, &request))
                    .await
            }
            None => self.call(prompt.component, &request).await,
        }
    }

    async fn call(&self, component: &str, request: &CompletionRequest) -> AiResult<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let completion = tokio::time::timeout(self.timeout, self.client.complete(request))
            .await
            .map_err(|_| {
                warn!(component, timeout_secs = self.timeout.as_secs(), "Completion timed out");
                AiError::Timeout(self.timeout.as_secs())
            })??;

        if let Some(usage) = completion.usage {
            self.prompt_tokens
                .fetch_add(u64::from(usage.prompt_tokens), Ordering::Relaxed);
            self.completion_tokens
                .fetch_add(u64::from(usage.completion_tokens), Ordering::Relaxed);
        }
        debug!(
            component,
            chars = completion.text.len(),
            "Completion received"
        );
        Ok(completion.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_client::{AiResult, Completion, MockCompletion};
    use async_trait::async_trait;

    fn prompt(text: &str) -> RenderedPrompt {
        RenderedPrompt {
            component: "beat_generate",
            version: "v1".into(),
            text: text.into(),
        }
    }

    struct Stalled;

    #[async_trait]
    impl TextCompletion for Stalled {
        fn model(&self) -> &str {
            "stalled"
        }

        async fn complete(&self, _request: &CompletionRequest) -> AiResult<Completion> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Completion::text("late"))
        }
    }

    #[tokio::test]
    async fn cached_prompt_skips_second_call() {
        let mock = Arc::new(MockCompletion::new().then("first").then("second"));
        let gateway = CompletionGateway::new(mock.clone()).with_cache(Arc::new(ResponseCache::new()));

        let request = CompletionRequest::new("").seed(1);
        let a = gateway.complete(&prompt("write"), request.clone()).await.unwrap();
        let b = gateway.complete(&prompt("write"), request).await.unwrap();
        assert_eq!(a, "first");
        assert_eq!(b, "first");
        assert_eq!(mock.call_count(), 1);
        assert_eq!(gateway.usage().calls, 1);
    }

    #[tokio::test]
    async fn different_seed_misses_cache() {
        let mock = Arc::new(MockCompletion::new().then("first").then("second"));
        let gateway = CompletionGateway::new(mock.clone()).with_cache(Arc::new(ResponseCache::new()));

        gateway
            .complete(&prompt("write"), CompletionRequest::new("").seed(1))
            .await
            .unwrap();
        let b = gateway
            .complete(&prompt("write"), CompletionRequest::new("").seed(2))
            .await
            .unwrap();
        assert_eq!(b, "second");
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let gateway =
            CompletionGateway::new(Arc::new(Stalled)).with_timeout(Duration::from_millis(50));
        let err = gateway
            .complete(&prompt("x"), CompletionRequest::new(""))
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn usage_accumulates() {
        let gateway = CompletionGateway::new(Arc::new(MockCompletion::new().then("a b c")));
        gateway
            .complete(&prompt("one two"), CompletionRequest::new(""))
            .await
            .unwrap();
        let usage = gateway.usage();
        assert_eq!(usage.prompt_tokens, 2);
        assert_eq!(usage.completion_tokens, 3);
    }
}
