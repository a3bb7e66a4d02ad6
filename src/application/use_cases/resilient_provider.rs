//! Model provider wrapped with admission control, retries and a circuit breaker.
//!
//! One `convert_test_names` call performs at most one rate-limit admission
//! check and exactly one circuit-breaker update, however many internal
//! retries it takes. Calls rejected up front (open circuit, rate limit) and
//! cancelled calls leave the breaker untouched.

use crate::application::use_cases::circuit_breaker::CircuitBreaker;
use crate::application::use_cases::rate_limiter::RateLimiter;
use crate::application::use_cases::retry::{sleep_or_cancel, RetryConfig};
use crate::application::use_cases::spec_conversion::llm_output::parse_conversion_map;
use crate::application::use_cases::spec_conversion::prompts::{
    build_conversion_system_prompt, build_conversion_user_prompt,
};
use crate::domain::error::{mentions_transient, AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::domain::spec_view::SuiteBatch;
use crate::infrastructure::llm_clients::{LLMClient, SpecProvider};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct ResilientSpecProvider {
    llm_client: Arc<dyn LLMClient + Send + Sync>,
    config: LLMConfig,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
}

impl ResilientSpecProvider {
    pub fn new(
        llm_client: Arc<dyn LLMClient + Send + Sync>,
        config: LLMConfig,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            llm_client,
            config,
            breaker,
            limiter,
            retry,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Rate-limiter key for outbound calls.
    pub fn limiter_key(&self) -> &'static str {
        self.config.provider.as_str()
    }

    async fn generate_with_retry(
        &self,
        cancel: &CancellationToken,
        file_path: &str,
        system: &str,
        user: &str,
    ) -> Result<String> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                outcome = self.llm_client.generate(&self.config, system, user) => outcome,
            };

            match outcome {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        file_path,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient provider error, retrying"
                    );
                    sleep_or_cancel(delay, cancel).await?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Maps a raw provider error onto the conversion error taxonomy.
pub(crate) fn classify_provider_error(err: AppError) -> AppError {
    match err {
        AppError::ApiStatus(429, body) => AppError::RateLimited(body),
        AppError::ApiStatus(status @ (500 | 502 | 503 | 504), body) => {
            AppError::ProviderUnavailable(format!("status {}: {}", status, body))
        }
        AppError::ApiStatus(status, body) if mentions_transient(&body) => {
            classify_by_text(status, body)
        }
        AppError::ApiStatus(status @ (401 | 403), body) => {
            AppError::SecurityError(format!("status {}: {}", status, body))
        }
        AppError::ApiStatus(status @ (400 | 404 | 413 | 422), body) => {
            AppError::InvalidRequest(format!("status {}: {}", status, body))
        }
        AppError::ApiStatus(status, body) => classify_by_text(status, body),
        other => other,
    }
}

fn classify_by_text(status: u16, body: String) -> AppError {
    let lowered = body.to_lowercase();
    if lowered.contains("rate limit") {
        AppError::RateLimited(body)
    } else if lowered.contains("temporarily unavailable") {
        AppError::ProviderUnavailable(body)
    } else if lowered.contains("timeout") {
        AppError::Timeout(body)
    } else {
        AppError::LLMError(format!("status {}: {}", status, body))
    }
}

#[async_trait]
impl SpecProvider for ResilientSpecProvider {
    fn model_id(&self) -> String {
        self.config.model_id()
    }

    async fn convert_test_names(
        &self,
        cancel: &CancellationToken,
        file_path: &str,
        language: &str,
        suites: &[SuiteBatch],
    ) -> Result<HashMap<String, String>> {
        if !self.breaker.allow() {
            return Err(AppError::ProviderUnavailable(
                "circuit breaker is open".to_string(),
            ));
        }

        if !self.limiter.allow(self.limiter_key()) {
            return Err(AppError::RateLimited(format!(
                "outbound limit reached for {}",
                self.limiter_key()
            )));
        }

        let system = build_conversion_system_prompt(language);
        let user = build_conversion_user_prompt(file_path, language, suites);

        let raw = match self.generate_with_retry(cancel, file_path, &system, &user).await {
            Ok(raw) => raw,
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(err) => {
                self.breaker.record_failure();
                return Err(classify_provider_error(err));
            }
        };

        match parse_conversion_map(&raw) {
            Ok(converted) => {
                self.breaker.record_success();
                debug!(file_path, converted = converted.len(), "Provider conversion succeeded");
                Ok(converted)
            }
            Err(err) => {
                self.breaker.record_failure();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedClient {
        async fn generate(&self, _config: &LLMConfig, _system: &str, _user: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Internal("script exhausted".to_string())))
        }
    }

    fn provider_with(
        client: Arc<ScriptedClient>,
        limit: u32,
    ) -> (ResilientSpecProvider, Arc<CircuitBreaker>) {
        let (provider, breaker, _) = provider_with_limiter(client, limit);
        (provider, breaker)
    }

    fn provider_with_limiter(
        client: Arc<ScriptedClient>,
        limit: u32,
    ) -> (ResilientSpecProvider, Arc<CircuitBreaker>, Arc<RateLimiter>) {
        let breaker = Arc::new(CircuitBreaker::new("gemini", &CircuitBreakerConfig::default()));
        let limiter = Arc::new(RateLimiter::with_window(limit, Duration::from_secs(60)));
        let provider = ResilientSpecProvider::new(
            client,
            LLMConfig::default(),
            breaker.clone(),
            limiter.clone(),
            RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 100,
                max_delay_ms: 1_000,
            },
        );
        (provider, breaker, limiter)
    }

    fn suites() -> Vec<SuiteBatch> {
        vec![SuiteBatch {
            hierarchy: "Auth".to_string(),
            tests: vec!["logs in".to_string()],
        }]
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_returns_map() {
        let client = ScriptedClient::new(vec![Ok(r#"{"1":"Logs the user in"}"#.to_string())]);
        let (provider, breaker) = provider_with(client.clone(), 10);

        let result = provider
            .convert_test_names(&CancellationToken::new(), "a.ts", "English", &suites())
            .await
            .unwrap();

        assert_eq!(result["1"], "Logs the user in");
        assert_eq!(client.calls(), 1);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let client = ScriptedClient::new(vec![
            Err(AppError::ApiStatus(503, "overloaded".to_string())),
            Err(AppError::Timeout("slow".to_string())),
            Ok(r#"{"1":"ok"}"#.to_string()),
        ]);
        let (provider, breaker, limiter) = provider_with_limiter(client.clone(), 10);

        let result = provider
            .convert_test_names(&CancellationToken::new(), "a.ts", "English", &suites())
            .await;

        assert!(result.is_ok());
        assert_eq!(client.calls(), 3);
        assert_eq!(limiter.status("gemini").used, 1);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_body_on_bad_request_stays_rate_limited() {
        let reply = || Err(AppError::ApiStatus(400, "Rate limit exceeded for project".to_string()));
        let client = ScriptedClient::new(vec![reply(), reply(), reply()]);
        let (provider, breaker, limiter) = provider_with_limiter(client.clone(), 10);

        let err = provider
            .convert_test_names(&CancellationToken::new(), "a.ts", "English", &suites())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::RateLimited(_)));
        assert_eq!(client.calls(), 3);
        assert_eq!(limiter.status("gemini").used, 1);
        assert_eq!(breaker.snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_record_one_failure() {
        let client = ScriptedClient::new(vec![
            Err(AppError::ApiStatus(503, "down".to_string())),
            Err(AppError::ApiStatus(503, "down".to_string())),
            Err(AppError::ApiStatus(503, "down".to_string())),
        ]);
        let (provider, breaker) = provider_with(client.clone(), 10);

        let err = provider
            .convert_test_names(&CancellationToken::new(), "a.ts", "English", &suites())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ProviderUnavailable(_)));
        assert_eq!(client.calls(), 3);
        assert_eq!(breaker.snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_is_not_retried() {
        let client = ScriptedClient::new(vec![Err(AppError::ApiStatus(
            400,
            "invalid argument".to_string(),
        ))]);
        let (provider, breaker) = provider_with(client.clone(), 10);

        let err = provider
            .convert_test_names(&CancellationToken::new(), "a.ts", "English", &suites())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert_eq!(client.calls(), 1);
        assert_eq!(breaker.snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_network() {
        let client = ScriptedClient::new(vec![]);
        let (provider, breaker) = provider_with(client.clone(), 10);
        for _ in 0..5 {
            breaker.record_failure();
        }

        let err = provider
            .convert_test_names(&CancellationToken::new(), "a.ts", "English", &suites())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ProviderUnavailable(_)));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_is_distinct_and_skips_network() {
        let client = ScriptedClient::new(vec![Ok(r#"{"1":"ok"}"#.to_string())]);
        let (provider, breaker) = provider_with(client.clone(), 1);
        let cancel = CancellationToken::new();

        assert!(provider
            .convert_test_names(&cancel, "a.ts", "English", &suites())
            .await
            .is_ok());
        let err = provider
            .convert_test_names(&cancel, "b.ts", "English", &suites())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::RateLimited(_)));
        assert_eq!(client.calls(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_reply_counts_as_failure() {
        let client = ScriptedClient::new(vec![Ok("Sorry, I cannot help".to_string())]);
        let (provider, breaker) = provider_with(client.clone(), 10);

        let err = provider
            .convert_test_names(&CancellationToken::new(), "a.ts", "English", &suites())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ParseError(_)));
        assert_eq!(breaker.snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let client = ScriptedClient::new(vec![Err(AppError::ApiStatus(
            429,
            "slow down".to_string(),
        ))]);
        let (provider, breaker) = provider_with(client.clone(), 10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = provider
            .convert_test_names(&cancel, "a.ts", "English", &suites())
            .await
            .unwrap_err();

        assert_eq!(err, AppError::Cancelled);
        assert!(client.calls() <= 1);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_classify_provider_error() {
        assert!(matches!(
            classify_provider_error(AppError::ApiStatus(429, String::new())),
            AppError::RateLimited(_)
        ));
        assert!(matches!(
            classify_provider_error(AppError::ApiStatus(401, String::new())),
            AppError::SecurityError(_)
        ));
        assert!(matches!(
            classify_provider_error(AppError::ApiStatus(418, "request timeout".to_string())),
            AppError::Timeout(_)
        ));
        assert!(matches!(
            classify_provider_error(AppError::ApiStatus(418, "teapot".to_string())),
            AppError::LLMError(_)
        ));
        assert!(matches!(
            classify_provider_error(AppError::ApiStatus(422, "gateway timeout".to_string())),
            AppError::Timeout(_)
        ));
        assert!(matches!(
            classify_provider_error(AppError::ApiStatus(400, "invalid argument".to_string())),
            AppError::InvalidRequest(_)
        ));
        assert!(matches!(
            classify_provider_error(AppError::Timeout("t".to_string())),
            AppError::Timeout(_)
        ));
    }
}
