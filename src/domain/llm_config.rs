use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LLMProvider {
    Gemini,
    /// Any OpenAI-compatible chat-completions endpoint (OpenAI, OpenRouter, local servers).
    #[serde(rename = "OpenAI")]
    OpenAi,
}

impl LLMProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LLMProvider::Gemini => "gemini",
            LLMProvider::OpenAi => "openai",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub request_timeout_secs: u64,
}

impl LLMConfig {
    /// Namespace for cached conversions. Switching models must not reuse
    /// names produced by a different model.
    pub fn model_id(&self) -> String {
        format!("{}/{}", self.provider.as_str(), self.model.trim())
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::Gemini,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key: None,
            max_tokens: Some(8192),
            temperature: Some(0.2),
            request_timeout_secs: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_includes_provider() {
        let config = LLMConfig {
            model: " gemini-2.5-flash ".to_string(),
            ..Default::default()
        };
        assert_eq!(config.model_id(), "gemini/gemini-2.5-flash");
    }
}
