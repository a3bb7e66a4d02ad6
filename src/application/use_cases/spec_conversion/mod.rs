//! Converts analyzed test names into readable feature descriptions.
//!
//! One `execute` call looks up every test in the conversion cache, sends the
//! misses to the spec provider one file at a time under a concurrency bound,
//! merges the answers back onto the original tests and writes new
//! conversions back to the cache in the background.

mod assembly;
pub(crate) mod batching;
pub(crate) mod llm_output;
pub(crate) mod prompts;

use crate::application::use_cases::rate_limiter::RateLimiter;
use crate::domain::error::{AppError, Result};
use crate::domain::language::resolve_language;
use crate::domain::spec_view::{CacheEntry, ConversionBatch, ConvertSpecRequest, SpecViewResult};
use crate::infrastructure::db::analyses::AnalysisProvider;
use crate::infrastructure::db::conversion_cache::ConversionCacheStore;
use crate::infrastructure::llm_clients::SpecProvider;
use assembly::assemble_spec_view;
use batching::{build_conversion_batches, collect_test_metas};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

type FileOutcome = (ConversionBatch, Result<HashMap<String, String>>);

pub struct SpecConversionUseCase {
    analysis_provider: Arc<dyn AnalysisProvider>,
    cache_store: Arc<dyn ConversionCacheStore>,
    spec_provider: Arc<dyn SpecProvider>,
    codebase_limiter: Arc<RateLimiter>,
    max_concurrency: usize,
    default_language: String,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl SpecConversionUseCase {
    pub fn new(
        analysis_provider: Arc<dyn AnalysisProvider>,
        cache_store: Arc<dyn ConversionCacheStore>,
        spec_provider: Arc<dyn SpecProvider>,
        codebase_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            analysis_provider,
            cache_store,
            spec_provider,
            codebase_limiter,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            default_language: "English".to_string(),
            pending_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    pub fn model_id(&self) -> String {
        self.spec_provider.model_id()
    }

    pub async fn execute(
        &self,
        request: ConvertSpecRequest,
        cancel: &CancellationToken,
    ) -> Result<SpecViewResult> {
        let run_id = uuid::Uuid::new_v4();
        let span = info_span!(
            "spec_conversion",
            run_id = %run_id,
            owner = %request.owner,
            repo = %request.repo,
            commit_sha = %request.commit_sha
        );
        self.run(request, cancel).instrument(span).await
    }

    /// Waits for every background cache write started so far.
    pub async fn flush_pending_writes(&self) {
        let pending = std::mem::take(&mut *self.lock_pending());
        for handle in pending {
            if let Err(e) = handle.await {
                error!(error = %e, "Cache write-back task failed");
            }
        }
    }

    async fn run(
        &self,
        request: ConvertSpecRequest,
        cancel: &CancellationToken,
    ) -> Result<SpecViewResult> {
        let language = resolve_language(request.language.as_deref(), &self.default_language)?;

        let tree = self
            .analysis_provider
            .get_analysis_for_conversion(&request.owner, &request.repo, &request.commit_sha)
            .await?;

        if !self.codebase_limiter.allow(&tree.codebase_id) {
            let status = self.codebase_limiter.status(&tree.codebase_id);
            warn!(
                codebase_id = %tree.codebase_id,
                retry_after_ms = status.retry_after_ms,
                "Codebase conversion rate limit exceeded"
            );
            let message = match status.retry_after_ms {
                Some(ms) => format!(
                    "Too many conversion requests for this repository, retry in {} ms",
                    ms
                ),
                None => "Too many conversion requests for this repository".to_string(),
            };
            return Err(AppError::RateLimited(message));
        }

        let metas = collect_test_metas(&tree, &language);
        let model_id = self.spec_provider.model_id();

        let cached = if request.force_refresh {
            HashMap::new()
        } else {
            let keys: Vec<_> = metas.iter().map(|meta| meta.cache_key).collect();
            match self.cache_store.get_cached_conversions(&keys, &model_id).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, "Cache lookup failed, converting without cache");
                    HashMap::new()
                }
            }
        };

        let batches = build_conversion_batches(&metas, &cached);
        info!(
            language = %language,
            model_id = %model_id,
            total_tests = metas.len(),
            cached = cached.len(),
            files_to_convert = batches.len(),
            "Starting spec conversion"
        );

        let outcomes = self.dispatch(batches, &language, cancel).await;
        if cancel.is_cancelled() {
            info!("Spec conversion cancelled before merge");
            return Err(AppError::Cancelled);
        }

        let converted = merge_outcomes(outcomes);

        let new_entries: Vec<CacheEntry> = converted
            .iter()
            .map(|(&position, name)| {
                CacheEntry::from_meta(&metas[position], name.clone(), &model_id)
            })
            .collect();
        self.spawn_write_back(new_entries);

        let result = assemble_spec_view(&tree, &metas, &cached, &converted);
        info!(
            cached_count = result.summary.cached_count,
            converted_count = result.summary.converted_count,
            total_tests = result.summary.total_tests,
            "Spec conversion finished"
        );
        Ok(result)
    }

    /// Runs one provider call per file, at most `max_concurrency` at a time,
    /// and returns once every call has finished.
    async fn dispatch(
        &self,
        batches: Vec<ConversionBatch>,
        language: &str,
        cancel: &CancellationToken,
    ) -> Vec<FileOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let file_count = batches.len();

        for batch in batches {
            let provider = Arc::clone(&self.spec_provider);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let language = language.to_string();

            tasks.spawn(
                async move {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return (batch, Err(AppError::Cancelled)),
                        permit = semaphore.acquire_owned() => permit,
                    };
                    let _permit = match permit {
                        Ok(permit) => permit,
                        Err(e) => {
                            return (batch, Err(AppError::Internal(format!("Semaphore closed: {e}"))))
                        }
                    };

                    debug!(file_path = %batch.file_path, tests = batch.test_count(), "Converting file");
                    let outcome = provider
                        .convert_test_names(&cancel, &batch.file_path, &language, &batch.suites)
                        .await;
                    (batch, outcome)
                }
                .in_current_span(),
            );
        }

        let mut outcomes = Vec::with_capacity(file_count);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "File conversion task failed to complete"),
            }
        }
        outcomes
    }

    fn spawn_write_back(&self, entries: Vec<CacheEntry>) {
        if entries.is_empty() {
            return;
        }

        let store = Arc::clone(&self.cache_store);
        let mut pending = self.lock_pending();
        pending.retain(|handle| !handle.is_finished());
        pending.push(tokio::spawn(
            async move {
                let count = entries.len();
                match store.upsert_cached_conversions(&entries).await {
                    Ok(()) => debug!(entries = count, "Cached converted test names"),
                    Err(e) => error!(error = %e, entries = count, "Cache write-back failed"),
                }
            }
            .in_current_span(),
        ));
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending_writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Maps each file's local indices back to positions in the run's meta list.
fn merge_outcomes(outcomes: Vec<FileOutcome>) -> HashMap<usize, String> {
    let mut converted = HashMap::new();

    for (batch, outcome) in outcomes {
        match outcome {
            Ok(names) => {
                for (local_index, name) in names {
                    match batch.index.get(&local_index) {
                        Some(&position) => {
                            converted.insert(position, name);
                        }
                        None => debug!(
                            file_path = %batch.file_path,
                            local_index = %local_index,
                            "Ignoring conversion for unknown index"
                        ),
                    }
                }
            }
            Err(e) if e.is_provider_pressure() => warn!(
                file_path = %batch.file_path,
                error_kind = e.kind(),
                error = %e,
                "Provider unavailable, keeping original names"
            ),
            Err(e) => warn!(
                file_path = %batch.file_path,
                error_kind = e.kind(),
                error = %e,
                "File conversion failed, keeping original names"
            ),
        }
    }

    converted
}
