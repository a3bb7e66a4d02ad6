use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AppError {
    Internal(String),
    NotFound(String),
    ValidationError(String),
    ParseError(String),
    /// Generic conversion failure reported by the model provider.
    LLMError(String),
    /// Provider rejected our credentials.
    SecurityError(String),
    DatabaseError(String),
    IoError(String),
    ConfigError(String),
    UnsupportedLanguage(String),
    RateLimited(String),
    ProviderUnavailable(String),
    Timeout(String),
    InvalidRequest(String),
    /// Non-success HTTP response from an upstream API.
    ApiStatus(u16, String),
    Cancelled,
    AnalysisNotFound(String),
    CommitMismatch(String),
}

impl AppError {
    /// Upstream failures that are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::ApiStatus(status, body) => {
                matches!(status, 429 | 500 | 502 | 503 | 504) || mentions_transient(body)
            }
            AppError::Timeout(_) | AppError::RateLimited(_) | AppError::ProviderUnavailable(_) => {
                true
            }
            AppError::LLMError(msg) => mentions_transient(msg),
            _ => false,
        }
    }

    /// Per-file provider failures that are expected under load.
    pub fn is_provider_pressure(&self) -> bool {
        matches!(
            self,
            AppError::RateLimited(_) | AppError::ProviderUnavailable(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal",
            AppError::NotFound(_) => "not_found",
            AppError::ValidationError(_) => "validation",
            AppError::ParseError(_) => "parse",
            AppError::LLMError(_) => "conversion_failed",
            AppError::SecurityError(_) => "auth",
            AppError::DatabaseError(_) => "database",
            AppError::IoError(_) => "io",
            AppError::ConfigError(_) => "config",
            AppError::UnsupportedLanguage(_) => "unsupported_language",
            AppError::RateLimited(_) => "rate_limited",
            AppError::ProviderUnavailable(_) => "provider_unavailable",
            AppError::Timeout(_) => "timeout",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::ApiStatus(_, _) => "api_status",
            AppError::Cancelled => "cancelled",
            AppError::AnalysisNotFound(_) => "analysis_not_found",
            AppError::CommitMismatch(_) => "commit_mismatch",
        }
    }
}

/// Provider bodies that signal load rather than a bad request.
pub(crate) fn mentions_transient(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("rate limit")
        || lowered.contains("timeout")
        || lowered.contains("temporarily unavailable")
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            AppError::LLMError(msg) => write!(f, "Conversion failed: {}", msg),
            AppError::SecurityError(msg) => write!(f, "Security error: {}", msg),
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppError::IoError(msg) => write!(f, "IO error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Config error: {}", msg),
            AppError::UnsupportedLanguage(lang) => write!(f, "Unsupported language: {}", lang),
            AppError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
            AppError::ProviderUnavailable(msg) => write!(f, "Provider unavailable: {}", msg),
            AppError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            AppError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            AppError::ApiStatus(status, body) => write!(f, "API error ({}): {}", status, body),
            AppError::Cancelled => write!(f, "Operation cancelled"),
            AppError::AnalysisNotFound(msg) => write!(f, "Analysis not found: {}", msg),
            AppError::CommitMismatch(msg) => write!(f, "Commit mismatch: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
