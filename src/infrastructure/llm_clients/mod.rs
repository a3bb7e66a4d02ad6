pub mod gemini;
pub mod openrouter;

use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::domain::llm_config::LLMProvider;
use crate::domain::spec_view::SuiteBatch;
use async_trait::async_trait;
use gemini::GeminiClient;
use openrouter::OpenRouterClient;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Raw text-generation transport.
#[async_trait]
pub trait LLMClient {
    async fn generate(&self, config: &LLMConfig, system: &str, user: &str) -> Result<String>;
}

/// Converts the test names of one file into readable descriptions.
///
/// The returned map is keyed by the local index ("1", "2", ...) the tests
/// were numbered with inside `suites`.
#[async_trait]
pub trait SpecProvider: Send + Sync {
    /// Stable identifier of the model behind this provider. Part of the cache
    /// namespace.
    fn model_id(&self) -> String;

    async fn convert_test_names(
        &self,
        cancel: &CancellationToken,
        file_path: &str,
        language: &str,
        suites: &[SuiteBatch],
    ) -> Result<HashMap<String, String>>;
}

pub struct RouterClient {
    openai: OpenRouterClient,
    gemini: GeminiClient,
}

impl RouterClient {
    pub fn new(request_timeout_secs: u64) -> Self {
        Self {
            openai: OpenRouterClient::new(request_timeout_secs),
            gemini: GeminiClient::new(request_timeout_secs),
        }
    }
}

#[async_trait]
impl LLMClient for RouterClient {
    async fn generate(&self, config: &LLMConfig, system: &str, user: &str) -> Result<String> {
        match config.provider {
            LLMProvider::Gemini => self.gemini.generate(config, system, user).await,
            LLMProvider::OpenAi => self.openai.generate(config, system, user).await,
        }
    }
}

pub(crate) fn map_request_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Timeout(format!("Request timed out: {}", err))
    } else {
        AppError::LLMError(format!("Request failed: {}", err))
    }
}

pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(AppError::ApiStatus(status.as_u16(), text))
}
