use std::sync::Arc;

use actix_web::web;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::application::use_cases::circuit_breaker::CircuitBreaker;
use crate::application::use_cases::rate_limiter::RateLimiter;
use crate::application::use_cases::resilient_provider::ResilientSpecProvider;
use crate::application::SpecConversionUseCase;
use crate::domain::error::Result;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::db::analyses::SqliteAnalysisRepository;
use crate::infrastructure::db::connection::{init_spec_view_db, IN_MEMORY_PATH};
use crate::infrastructure::db::conversion_cache::SqliteConversionCache;
use crate::infrastructure::llm_clients::RouterClient;
use crate::infrastructure::storage::ensure_parent_dir;
use crate::interfaces::http::HttpState;

/// Everything the server needs, wired from one `AppConfig`.
pub struct Services {
    pub state: web::Data<HttpState>,
    pub conversion: Arc<SpecConversionUseCase>,
    sweepers: Vec<JoinHandle<()>>,
}

impl Services {
    /// Waits for the limiter sweepers to stop and for queued cache writes to land.
    ///
    /// The sweepers only exit after the shutdown token passed to `bootstrap` is cancelled.
    pub async fn shutdown(self) {
        for sweeper in self.sweepers {
            if let Err(err) = sweeper.await {
                error!(error = %err, "Rate limiter sweeper ended abnormally");
            }
        }
        self.conversion.flush_pending_writes().await;
    }
}

pub async fn bootstrap(config: &AppConfig, shutdown: CancellationToken) -> Result<Services> {
    if config.database.path.as_os_str() != IN_MEMORY_PATH {
        ensure_parent_dir(&config.database.path).map_err(|err| {
            error!(
                error = %err,
                path = %config.database.path.display(),
                "Failed to create database directory"
            );
            err
        })?;
    }

    let pool = init_spec_view_db(&config.database.path).await?;
    info!(path = %config.database.path.display(), "Spec view database ready");

    let analyses = Arc::new(SqliteAnalysisRepository::new(pool.clone()));
    let cache = Arc::new(SqliteConversionCache::new(pool));

    let breaker = Arc::new(CircuitBreaker::new(
        config.llm.provider.as_str(),
        &config.circuit_breaker,
    ));
    let provider_limiter = Arc::new(RateLimiter::with_config(
        config.provider_rate_limit.clone(),
    ));
    let codebase_limiter = Arc::new(RateLimiter::with_config(
        config.codebase_rate_limit.clone(),
    ));
    let sweepers = vec![
        provider_limiter.spawn_sweeper(shutdown.clone()),
        codebase_limiter.spawn_sweeper(shutdown.clone()),
    ];

    let provider = Arc::new(ResilientSpecProvider::new(
        Arc::new(RouterClient::new(config.llm.request_timeout_secs)),
        config.llm.clone(),
        breaker.clone(),
        provider_limiter.clone(),
        config.retry.clone(),
    ));
    info!(model_id = %config.llm.model_id(), "Spec provider configured");

    let conversion = Arc::new(
        SpecConversionUseCase::new(analyses.clone(), cache, provider, codebase_limiter.clone())
            .with_max_concurrency(config.conversion.max_concurrency)
            .with_default_language(config.conversion.default_language.clone()),
    );

    let state = web::Data::new(HttpState {
        conversion: conversion.clone(),
        analyses,
        breaker,
        provider_limiter,
        codebase_limiter,
        shutdown,
    });

    Ok(Services {
        state,
        conversion,
        sweepers,
    })
}
