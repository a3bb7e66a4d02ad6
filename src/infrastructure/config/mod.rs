use crate::application::use_cases::circuit_breaker::CircuitBreakerConfig;
use crate::application::use_cases::rate_limiter::RateLimitConfig;
use crate::application::use_cases::retry::RetryConfig;
use crate::domain::error::{AppError, Result};
use crate::domain::language::resolve_language;
use crate::domain::llm_config::LLMConfig;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "TESTLENS_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "testlens.toml";
const ENV_PREFIX: &str = "TESTLENS_";

/// Service configuration: defaults, then `testlens.toml`, then `TESTLENS_*` env vars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LLMConfig,
    pub conversion: ConversionConfig,
    /// Outbound calls to the model provider, keyed by provider name.
    pub provider_rate_limit: RateLimitConfig,
    /// Conversion requests, keyed by codebase.
    pub codebase_rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file, or `:memory:`
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    pub max_concurrency: usize,
    pub default_language: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                path: PathBuf::from("data/testlens.db"),
            },
            llm: LLMConfig::default(),
            conversion: ConversionConfig {
                max_concurrency: 10,
                default_language: "English".to_string(),
            },
            provider_rate_limit: RateLimitConfig::default(),
            codebase_rate_limit: RateLimitConfig {
                limit: 10,
                window_secs: 60,
            },
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads from the file named by `TESTLENS_CONFIG` (or `testlens.toml`) and the environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::from_figment(Self::figment(&path))
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| AppError::ConfigError(format!("Failed to load configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }
        if self.database.path.as_os_str().is_empty() {
            errors.push("database.path must not be empty".to_string());
        }
        if self.llm.model.trim().is_empty() {
            errors.push("llm.model must not be empty".to_string());
        }
        if self.llm.base_url.trim().is_empty() {
            errors.push("llm.base_url must not be empty".to_string());
        }
        if self.llm.request_timeout_secs == 0 {
            errors.push("llm.request_timeout_secs must be at least 1".to_string());
        }
        if self.conversion.max_concurrency == 0 {
            errors.push("conversion.max_concurrency must be at least 1".to_string());
        }
        if let Err(e) = resolve_language(Some(&self.conversion.default_language), "English") {
            errors.push(format!("conversion.default_language: {e}"));
        }

        for (name, limit) in [
            ("provider_rate_limit", &self.provider_rate_limit),
            ("codebase_rate_limit", &self.codebase_rate_limit),
        ] {
            if limit.limit == 0 {
                errors.push(format!("{name}.limit must be at least 1"));
            }
            if limit.window_secs == 0 {
                errors.push(format!("{name}.window_secs must be at least 1"));
            }
        }

        if self.circuit_breaker.failure_threshold == 0 {
            errors.push("circuit_breaker.failure_threshold must be at least 1".to_string());
        }
        if self.circuit_breaker.success_threshold == 0 {
            errors.push("circuit_breaker.success_threshold must be at least 1".to_string());
        }
        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            errors.push("retry.initial_delay_ms must not exceed retry.max_delay_ms".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::ConfigError(errors.join("; ")))
        }
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }
}
