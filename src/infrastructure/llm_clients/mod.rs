pub mod gemini;
pub mod openai_compat;

use crate::domain::error::CompletionError;
use crate::domain::llm_config::{LLMConfig, LLMProvider};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use gemini::GeminiClient;
use openai_compat::OpenAiCompatClient;
use std::time::Duration;

/// Upper bound for a single non-streamed completion used to back the default
/// streaming implementation.
pub const STREAM_FALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

/// Finite, non-restartable sequence of text chunks.
pub type CompletionStream = BoxStream<'static, Result<String, CompletionError>>;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, CompletionError>;

    async fn complete_stream(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<CompletionStream, CompletionError> {
        let text = self
            .complete(system, prompt, STREAM_FALLBACK_TIMEOUT)
            .await?;
        Ok(Box::pin(stream::once(async move { Ok(text) })))
    }
}

pub struct RouterClient {
    provider: LLMProvider,
    openai: OpenAiCompatClient,
    gemini: GeminiClient,
}

impl RouterClient {
    pub fn new(config: LLMConfig) -> Self {
        Self {
            provider: config.provider,
            openai: OpenAiCompatClient::new(config.clone()),
            gemini: GeminiClient::new(config),
        }
    }

    pub fn provider(&self) -> LLMProvider {
        self.provider
    }
}

#[async_trait]
impl CompletionClient for RouterClient {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, CompletionError> {
        match self.provider {
            LLMProvider::Google => self.gemini.complete(system, prompt, timeout).await,
            _ => self.openai.complete(system, prompt, timeout).await,
        }
    }

    async fn complete_stream(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<CompletionStream, CompletionError> {
        match self.provider {
            LLMProvider::Google => self.gemini.complete_stream(system, prompt).await,
            _ => self.openai.complete_stream(system, prompt).await,
        }
    }
}

/// Join `path` onto a base URL regardless of its trailing slash.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

pub(crate) fn transport_error(err: reqwest::Error) -> CompletionError {
    if err.is_timeout() {
        CompletionError::Timeout
    } else {
        CompletionError::Unavailable(format!("Request failed: {}", err))
    }
}
