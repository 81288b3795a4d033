//! OpenAI-compatible `/chat/completions` client
//!
//! Covers OpenAI, OpenRouter and local servers (LM Studio, llama.cpp, vLLM)
//! that speak the same wire format.

use super::{endpoint, transport_error, CompletionClient, CompletionStream};
use crate::domain::error::CompletionError;
use crate::domain::llm_config::LLMConfig;
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;

pub struct OpenAiCompatClient {
    client: reqwest::Client,
    config: LLMConfig,
}

impl OpenAiCompatClient {
    pub fn new(config: LLMConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn request_body(&self, system: &str, prompt: &str, stream: bool) -> Value {
        json!({
            "model": self.config.model,
            "messages": [
                {
                    "role": "system",
                    "content": system
                },
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "stream": stream,
        })
    }

    async fn send(
        &self,
        system: &str,
        prompt: &str,
        stream: bool,
    ) -> Result<reqwest::Response, CompletionError> {
        let url = endpoint(&self.config.base_url, "chat/completions");
        let mut request = self.client.post(&url);

        // Local servers usually run without a key
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .json(&self.request_body(system, prompt, stream))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CompletionError::Unavailable(format!(
                "API error ({}): {}",
                status, text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, CompletionError> {
        let call = async {
            let response = self.send(system, prompt, false).await?;
            let json: Value = response.json().await.map_err(|e| {
                CompletionError::Unavailable(format!("Failed to parse JSON: {}", e))
            })?;

            json["choices"][0]["message"]["content"]
                .as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| CompletionError::Unavailable("Invalid response format".to_string()))
        };

        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| CompletionError::Timeout)?
    }

    async fn complete_stream(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<CompletionStream, CompletionError> {
        let response = self.send(system, prompt, true).await?;
        Ok(sse_text_stream(Box::pin(response.bytes_stream())))
    }
}

struct SseState<S> {
    body: S,
    buffer: String,
    pending: VecDeque<String>,
    done: bool,
}

/// Turn a server-sent-events byte stream into the `delta.content` chunks it
/// carries. Ends at `data: [DONE]` or when the body ends.
fn sse_text_stream<S, B>(body: S) -> CompletionStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = SseState {
        body,
        buffer: String::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(chunk) = st.pending.pop_front() {
                return Some((Ok(chunk), st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    st.buffer.push_str(&String::from_utf8_lossy(bytes.as_ref()));
                    let (chunks, done) = drain_sse_lines(&mut st.buffer);
                    st.pending.extend(chunks);
                    st.done = done;
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(transport_error(e)), st));
                }
                None => {
                    // Flush a final event that arrived without a trailing newline
                    st.buffer.push('\n');
                    let (chunks, _) = drain_sse_lines(&mut st.buffer);
                    st.pending.extend(chunks);
                    st.done = true;
                }
            }
        }
    })
    .boxed()
}

/// Consume every complete line in `buffer`, returning the text deltas found
/// and whether the terminator was seen. A partial trailing line stays buffered.
fn drain_sse_lines(buffer: &mut String) -> (Vec<String>, bool) {
    let mut chunks = Vec::new();

    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim_end_matches(['\n', '\r']);

        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            buffer.clear();
            return (chunks, true);
        }

        let Ok(event) = serde_json::from_str::<Value>(payload) else {
            continue;
        };
        if let Some(text) = event["choices"][0]["delta"]["content"].as_str() {
            if !text.is_empty() {
                chunks.push(text.to_string());
            }
        }
    }

    (chunks, false)
}
