use crate::domain::error::CompletionError;
use crate::domain::response::{FormattedResponse, SourceTag};
use crate::infrastructure::llm_clients::CompletionClient;
use crate::infrastructure::response::clean_model_output;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const HELP_TEXT: &str = "I can answer questions about hospital operations, for example:\n\
- Patients: \"show patient John\", \"list 5 patients\"\n\
- Rooms: \"room R001 status\", \"which rooms are available\"\n\
- Staff: \"list nurses\", \"doctor on cardiology\"\n\
- Equipment: \"available ventilators\", \"how many ECG machines\"\n\
- Statistics: \"hospital stats\", \"blood inventory\"\n\
- Analysis reports: start the message with @analysis, e.g. \"@analysis staffing levels\"";

const SYSTEM_PROMPT: &str = "You are a concise assistant for hospital staff. \
Answer general questions briefly. You do not have database access in this \
conversation; for patient, room, staff or equipment data, tell the user to ask \
about those directly.";

const ENTITY_TYPE: &str = "general";

/// Handles messages that are neither analysis lookups nor database questions.
pub struct GeneralDelegation {
    client: Option<Arc<dyn CompletionClient>>,
    timeout: Duration,
}

impl GeneralDelegation {
    pub fn new(client: Arc<dyn CompletionClient>, timeout: Duration) -> Self {
        Self {
            client: Some(client),
            timeout,
        }
    }

    /// Always answers with the help text.
    pub fn help_only() -> Self {
        Self {
            client: None,
            timeout: Duration::ZERO,
        }
    }

    pub async fn respond(&self, message: &str, cancel: &CancellationToken) -> FormattedResponse {
        let Some(client) = &self.client else {
            return Self::help();
        };

        let reply = tokio::select! {
            _ = cancel.cancelled() => return Self::help(),
            reply = tokio::time::timeout(
                self.timeout,
                client.complete(SYSTEM_PROMPT, message, self.timeout),
            ) => reply.unwrap_or(Err(CompletionError::Timeout)),
        };

        match reply {
            Ok(text) => {
                let cleaned = clean_model_output(&text);
                if cleaned.is_empty() {
                    Self::help()
                } else {
                    FormattedResponse::new(ENTITY_TYPE, cleaned, SourceTag::General)
                }
            }
            Err(e) => {
                warn!(error = %e, "General completion failed, answering with help text");
                Self::help()
            }
        }
    }

    fn help() -> FormattedResponse {
        FormattedResponse::new(ENTITY_TYPE, HELP_TEXT.to_string(), SourceTag::General)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed(Result<String, CompletionError>);

    #[async_trait]
    impl CompletionClient for Fixed {
        async fn complete(
            &self,
            _system: &str,
            _prompt: &str,
            _timeout: Duration,
        ) -> Result<String, CompletionError> {
            self.0.clone()
        }
    }

    fn delegation(reply: Result<String, CompletionError>) -> GeneralDelegation {
        GeneralDelegation::new(Arc::new(Fixed(reply)), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_reply_is_cleaned() {
        let response = delegation(Ok("<think>greeting</think>Hello there.".to_string()))
            .respond("hello", &CancellationToken::new())
            .await;
        assert_eq!(response.summary_text, "Hello there.");
        assert_eq!(response.source_tag, SourceTag::General);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_help() {
        let response = delegation(Err(CompletionError::Timeout))
            .respond("hello", &CancellationToken::new())
            .await;
        assert_eq!(response.summary_text, HELP_TEXT);
        assert_eq!(response.source_tag, SourceTag::General);
    }

    #[tokio::test]
    async fn test_help_only() {
        let response = GeneralDelegation::help_only()
            .respond("hello", &CancellationToken::new())
            .await;
        assert!(response.summary_text.contains("@analysis"));
    }

    struct Stalled;

    #[async_trait]
    impl CompletionClient for Stalled {
        async fn complete(
            &self,
            _system: &str,
            _prompt: &str,
            _timeout: Duration,
        ) -> Result<String, CompletionError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("too late".to_string())
        }
    }

    #[tokio::test]
    async fn test_slow_client_is_cut_off_by_timeout() {
        let delegation = GeneralDelegation::new(Arc::new(Stalled), Duration::from_millis(50));
        let started = std::time::Instant::now();
        let response = delegation.respond("hello", &CancellationToken::new()).await;
        assert_eq!(response.summary_text, HELP_TEXT);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
