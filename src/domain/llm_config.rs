use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LLMProvider {
    Local,
    OpenAI,
    OpenRouter,
    Google,
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
#[serde(default)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    #[validate(length(min = 1))]
    pub base_url: String,
    #[validate(length(min = 1))]
    pub model: String,
    /// Secret reference for the API key (`env:`, `keychain:`, `plain:` or a bare value).
    pub api_key_ref: Option<String>,
    /// Resolved key; never read from config files.
    #[serde(skip)]
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: Option<f32>,
    #[validate(range(min = 100, max = 600000))]
    pub generation_timeout_ms: u64,
    pub enabled: bool,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::Local,
            base_url: "http://localhost:1234/v1".to_string(),
            model: "local-model".to_string(),
            api_key_ref: None,
            api_key: None,
            max_tokens: Some(1500),
            temperature: Some(0.1),
            generation_timeout_ms: 8000,
            enabled: true,
        }
    }
}
