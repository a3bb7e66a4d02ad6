use crate::application::use_cases::circuit_breaker::{CircuitBreaker, CircuitSnapshot};
use crate::application::use_cases::rate_limiter::RateLimiter;
use crate::application::SpecConversionUseCase;
use crate::domain::error::AppError;
use crate::domain::language::SUPPORTED_LANGUAGES;
use crate::domain::spec_view::{
    AnalysisTree, ConvertSpecRequest, RecordAnalysisRequest, RecordAnalysisResponse,
};
use crate::infrastructure::db::analyses::SqliteAnalysisRepository;
use actix_cors::Cors;
use actix_web::http::StatusCode;
use actix_web::{dev::Server, get, post, web, App, HttpResponse, HttpServer, Responder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use validator::Validate;

pub struct HttpState {
    pub conversion: Arc<SpecConversionUseCase>,
    pub analyses: Arc<SqliteAnalysisRepository>,
    pub breaker: Arc<CircuitBreaker>,
    pub provider_limiter: Arc<RateLimiter>,
    pub codebase_limiter: Arc<RateLimiter>,
    pub shutdown: CancellationToken,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguagesResponse {
    pub languages: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub model_id: String,
    pub circuit: CircuitSnapshot,
    pub provider_limiter_keys: usize,
    pub codebase_limiter_keys: usize,
}

pub fn status_for(error: &AppError) -> StatusCode {
    match error {
        AppError::ValidationError(_)
        | AppError::UnsupportedLanguage(_)
        | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AppError::NotFound(_) | AppError::AnalysisNotFound(_) => StatusCode::NOT_FOUND,
        AppError::CommitMismatch(_) => StatusCode::CONFLICT,
        AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &AppError) -> HttpResponse {
    HttpResponse::build(status_for(error)).json(ErrorBody {
        error: error.kind().to_string(),
        message: error.to_string(),
    })
}

#[post("/spec-view/convert")]
async fn convert_spec_view(
    data: web::Data<HttpState>,
    req: web::Json<ConvertSpecRequest>,
) -> impl Responder {
    let request = req.into_inner();
    if let Err(e) = request.validate() {
        return error_response(&AppError::ValidationError(e.to_string()));
    }

    tracing::info!(
        owner = %request.owner,
        repo = %request.repo,
        commit_sha = %request.commit_sha,
        force_refresh = request.force_refresh,
        "Spec view conversion requested"
    );

    let cancel = data.shutdown.child_token();
    match data.conversion.execute(request, &cancel).await {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(e) => {
            if status_for(&e).is_server_error() {
                tracing::error!(error = %e, "Spec view conversion failed");
            }
            error_response(&e)
        }
    }
}

#[get("/spec-view/languages")]
async fn list_languages() -> impl Responder {
    HttpResponse::Ok().json(LanguagesResponse {
        languages: SUPPORTED_LANGUAGES.iter().map(|l| l.to_string()).collect(),
    })
}

#[post("/analyses")]
async fn record_analysis(
    data: web::Data<HttpState>,
    req: web::Json<RecordAnalysisRequest>,
) -> impl Responder {
    let request = req.into_inner();
    if let Err(e) = request.validate() {
        return error_response(&AppError::ValidationError(e.to_string()));
    }

    match data
        .analyses
        .record_analysis(
            &request.owner,
            &request.repo,
            &request.commit_sha,
            &request.files,
        )
        .await
    {
        Ok(codebase_id) => {
            let total_tests = AnalysisTree {
                codebase_id: codebase_id.clone(),
                files: request.files,
            }
            .total_tests();
            HttpResponse::Created().json(RecordAnalysisResponse {
                codebase_id,
                total_tests,
            })
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to record analysis");
            error_response(&e)
        }
    }
}

#[get("/health")]
async fn health(data: web::Data<HttpState>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        model_id: data.conversion.model_id(),
        circuit: data.breaker.snapshot(),
        provider_limiter_keys: data.provider_limiter.tracked_keys(),
        codebase_limiter_keys: data.codebase_limiter.tracked_keys(),
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(convert_spec_view)
            .service(list_languages)
            .service(record_analysis)
            .service(health),
    );
}

pub fn start_server(state: web::Data<HttpState>, host: &str, port: u16) -> std::io::Result<Server> {
    let server = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((host, port))?
    .disable_signals()
    .run();

    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::domain::error::Result;
    use crate::domain::spec_view::{SpecViewResult, SuiteBatch};
    use crate::infrastructure::db::connection::{init_spec_view_db, IN_MEMORY_PATH};
    use crate::infrastructure::db::conversion_cache::SqliteConversionCache;
    use crate::infrastructure::llm_clients::SpecProvider;
    use actix_web::test;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::Path;
    use std::time::Duration;

    struct UpperCaseProvider;

    #[async_trait]
    impl SpecProvider for UpperCaseProvider {
        fn model_id(&self) -> String {
            "fake/upper".to_string()
        }

        async fn convert_test_names(
            &self,
            _cancel: &CancellationToken,
            _file_path: &str,
            _language: &str,
            suites: &[SuiteBatch],
        ) -> Result<HashMap<String, String>> {
            Ok(suites
                .iter()
                .flat_map(|suite| suite.tests.iter())
                .enumerate()
                .map(|(i, name)| ((i + 1).to_string(), name.to_uppercase()))
                .collect())
        }
    }

    async fn state() -> web::Data<HttpState> {
        let pool = init_spec_view_db(Path::new(IN_MEMORY_PATH)).await.unwrap();
        let analyses = Arc::new(SqliteAnalysisRepository::new(pool.clone()));
        let codebase_limiter = Arc::new(RateLimiter::with_window(10, Duration::from_secs(60)));
        let conversion = Arc::new(SpecConversionUseCase::new(
            analyses.clone(),
            Arc::new(SqliteConversionCache::new(pool)),
            Arc::new(UpperCaseProvider),
            codebase_limiter.clone(),
        ));

        web::Data::new(HttpState {
            conversion,
            analyses,
            breaker: Arc::new(CircuitBreaker::new("fake", &CircuitBreakerConfig::default())),
            provider_limiter: Arc::new(RateLimiter::default()),
            codebase_limiter,
            shutdown: CancellationToken::new(),
        })
    }

    fn analysis_body(commit_sha: &str) -> serde_json::Value {
        json!({
            "owner": "acme",
            "repo": "web",
            "commitSha": commit_sha,
            "files": [{
                "filePath": "src/auth.test.ts",
                "framework": "vitest",
                "suites": [{
                    "hierarchy": "Auth",
                    "tests": [{ "name": "logs in", "line": 3 }]
                }]
            }]
        })
    }

    #[actix_web::test]
    async fn test_status_mapping() {
        assert_eq!(
            status_for(&AppError::UnsupportedLanguage("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&AppError::AnalysisNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&AppError::CommitMismatch("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&AppError::RateLimited("x".into())),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(status_for(&AppError::Cancelled), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&AppError::DatabaseError("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[actix_web::test]
    async fn test_ingest_then_convert() {
        let app = test::init_service(App::new().app_data(state().await).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/analyses")
            .set_json(analysis_body("0123456789"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let recorded: RecordAnalysisResponse = test::read_body_json(resp).await;
        assert_eq!(recorded.total_tests, 1);

        let req = test::TestRequest::post()
            .uri("/api/spec-view/convert")
            .set_json(json!({ "owner": "acme", "repo": "web", "commitSha": "0123456789" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let result: SpecViewResult = test::read_body_json(resp).await;
        assert_eq!(result.files[0].suites[0].tests[0].converted_name, "LOGS IN");
        assert_eq!(result.summary.converted_count, 1);
    }

    #[actix_web::test]
    async fn test_convert_error_statuses() {
        let app = test::init_service(App::new().app_data(state().await).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/spec-view/convert")
            .set_json(json!({ "owner": "acme", "repo": "web", "commitSha": "0123456789" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: ErrorBody = test::read_body_json(resp).await;
        assert_eq!(body.error, "analysis_not_found");

        let req = test::TestRequest::post()
            .uri("/api/analyses")
            .set_json(analysis_body("0123456789"))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/spec-view/convert")
            .set_json(json!({ "owner": "acme", "repo": "web", "commitSha": "fedcba98765" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri("/api/spec-view/convert")
            .set_json(json!({
                "owner": "acme",
                "repo": "web",
                "commitSha": "0123456789",
                "language": "Klingon"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/spec-view/convert")
            .set_json(json!({ "owner": "", "repo": "web", "commitSha": "0123456789" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_languages_and_health() {
        let app = test::init_service(App::new().app_data(state().await).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/spec-view/languages").to_request();
        let languages: LanguagesResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(languages.languages.len(), 24);
        assert!(languages.languages.contains(&"Korean".to_string()));

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let health_body: HealthResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(health_body.model_id, "fake/upper");
        assert_eq!(health_body.circuit.state, CircuitState::Closed);
    }
}
