mod client;
pub(crate) mod types;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{AiError, AiResult};
use crate::traits::{Completion, CompletionRequest, TextCompletion};
use client::OpenAiClient;

// =============================================================================
// OpenAi Provider
// =============================================================================

/// Chat-completions provider. Works against any OpenAI-compatible endpoint
/// via [`OpenAi::with_base_url`].
#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            timeout: None,
        }
    }

    pub fn from_env(model: impl Into<String>) -> AiResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AiError::Config("OPENAI_API_KEY environment variable not set".into()))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Transport-level timeout. The engine applies its own per-call timeout
    /// on top of this.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn client(&self) -> AiResult<OpenAiClient> {
        let client = OpenAiClient::new(&self.api_key, self.timeout)?;
        Ok(match self.base_url {
            Some(ref url) => client.with_base_url(url),
            None => client,
        })
    }

    fn chat_request(&self, request: &CompletionRequest) -> types::ChatRequest {
        let mut chat = types::ChatRequest::new(&self.model);
        if let Some(ref system) = request.system {
            chat = chat.message(types::WireMessage::system(system.clone()));
        }
        chat = chat.message(types::WireMessage::user(request.prompt.clone()));

        if types::uses_max_completion_tokens(&self.model) {
            chat.max_completion_tokens = Some(request.max_tokens);
        } else {
            chat.max_tokens = Some(request.max_tokens);
            chat.temperature = Some(request.temperature);
            chat.top_p = Some(request.top_p);
            chat.seed = request.seed;
        }
        chat
    }
}

#[async_trait]
impl TextCompletion for OpenAi {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> AiResult<Completion> {
        let response = self.client()?.chat(&self.chat_request(request)).await?;
        let usage = response.usage.map(Into::into);

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or(AiError::EmptyResponse)?;

        Ok(Completion { text, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_carries_sampling_hints() {
        let provider = OpenAi::new("sk-test", "gpt-4o-mini");
        let request = CompletionRequest::new("Write a beat.")
            .system("You are a novelist.")
            .temperature(0.75)
            .top_p(0.9)
            .max_tokens(300)
            .seed(140);

        let chat = provider.chat_request(&request);
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.temperature, Some(0.75));
        assert_eq!(chat.max_tokens, Some(300));
        assert_eq!(chat.seed, Some(140));
        assert!(chat.max_completion_tokens.is_none());
    }

    #[test]
    fn reasoning_model_drops_sampling_hints() {
        let provider = OpenAi::new("sk-test", "o3-mini");
        let chat = provider.chat_request(&CompletionRequest::new("x").max_tokens(64));
        assert_eq!(chat.max_completion_tokens, Some(64));
        assert!(chat.temperature.is_none());
        assert!(chat.max_tokens.is_none());
    }
}
