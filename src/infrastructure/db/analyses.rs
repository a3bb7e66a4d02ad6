use crate::domain::error::{AppError, Result};
use crate::domain::spec_view::{AnalysisTree, AnalyzedFile, AnalyzedSuite, AnalyzedTest};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

const STATUS_COMPLETED: &str = "completed";

/// Source of analyzed test trees.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Latest completed analysis of `owner/repo`, which must be for `commit_sha`.
    async fn get_analysis_for_conversion(
        &self,
        owner: &str,
        repo: &str,
        commit_sha: &str,
    ) -> Result<AnalysisTree>;
}

pub struct SqliteAnalysisRepository {
    pool: SqlitePool,
}

impl SqliteAnalysisRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stores a completed analysis and returns its codebase id.
    pub async fn record_analysis(
        &self,
        owner: &str,
        repo: &str,
        commit_sha: &str,
        files: &[AnalyzedFile],
    ) -> Result<String> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin analysis write: {e}")))?;

        sqlx::query(
            "INSERT INTO codebases (id, owner, repo, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (owner, repo) DO NOTHING",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(owner)
        .bind(repo)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert codebase: {e}")))?;

        let (codebase_id,): (String,) =
            sqlx::query_as("SELECT id FROM codebases WHERE owner = ? AND repo = ?")
                .bind(owner)
                .bind(repo)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to fetch codebase: {e}")))?;

        let analysis_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO analyses (id, codebase_id, commit_sha, status, completed_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&analysis_id)
        .bind(&codebase_id)
        .bind(commit_sha)
        .bind(STATUS_COMPLETED)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert analysis: {e}")))?;

        for (file_position, file) in files.iter().enumerate() {
            let file_id = sqlx::query(
                "INSERT INTO test_files (analysis_id, file_path, framework, position) VALUES (?, ?, ?, ?)",
            )
            .bind(&analysis_id)
            .bind(&file.file_path)
            .bind(&file.framework)
            .bind(file_position as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to insert test file: {e}")))?
            .last_insert_rowid();

            for (suite_position, suite) in file.suites.iter().enumerate() {
                let suite_id = sqlx::query(
                    "INSERT INTO test_suites (file_id, hierarchy, position) VALUES (?, ?, ?)",
                )
                .bind(file_id)
                .bind(&suite.hierarchy)
                .bind(suite_position as i64)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to insert test suite: {e}")))?
                .last_insert_rowid();

                for (test_position, test) in suite.tests.iter().enumerate() {
                    sqlx::query(
                        "INSERT INTO test_cases (suite_id, name, line, status, modifier, position)
                         VALUES (?, ?, ?, ?, ?, ?)",
                    )
                    .bind(suite_id)
                    .bind(&test.name)
                    .bind(test.line)
                    .bind(&test.status)
                    .bind(&test.modifier)
                    .bind(test_position as i64)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        AppError::DatabaseError(format!("Failed to insert test case: {e}"))
                    })?;
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit analysis: {e}")))?;

        tracing::info!(
            codebase_id = %codebase_id,
            analysis_id = %analysis_id,
            files = files.len(),
            "Recorded analysis for {}/{}",
            owner,
            repo
        );

        Ok(codebase_id)
    }

    async fn load_tree(&self, codebase_id: String, analysis_id: &str) -> Result<AnalysisTree> {
        let rows = sqlx::query_as::<_, AnalysisRowEntity>(
            "SELECT f.id AS file_id, f.file_path, f.framework,
                    s.id AS suite_id, s.hierarchy,
                    c.name, c.line, c.status, c.modifier
             FROM test_files f
             LEFT JOIN test_suites s ON s.file_id = f.id
             LEFT JOIN test_cases c ON c.suite_id = s.id
             WHERE f.analysis_id = ?
             ORDER BY f.position, f.id, s.position, s.id, c.position, c.id",
        )
        .bind(analysis_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to load analysis tree: {e}")))?;

        let mut files: Vec<AnalyzedFile> = Vec::new();
        let mut current_file: Option<i64> = None;
        let mut current_suite: Option<i64> = None;

        for row in rows {
            if current_file != Some(row.file_id) {
                current_file = Some(row.file_id);
                current_suite = None;
                files.push(AnalyzedFile {
                    file_path: row.file_path.clone(),
                    framework: row.framework.clone(),
                    suites: Vec::new(),
                });
            }
            let Some(file) = files.last_mut() else {
                continue;
            };

            let (Some(suite_id), Some(hierarchy)) = (row.suite_id, row.hierarchy) else {
                continue;
            };
            if current_suite != Some(suite_id) {
                current_suite = Some(suite_id);
                file.suites.push(AnalyzedSuite {
                    hierarchy,
                    tests: Vec::new(),
                });
            }
            let Some(suite) = file.suites.last_mut() else {
                continue;
            };

            if let Some(name) = row.name {
                suite.tests.push(AnalyzedTest {
                    name,
                    line: row.line.unwrap_or_default(),
                    status: row.status.unwrap_or_default(),
                    modifier: row.modifier.unwrap_or_default(),
                });
            }
        }

        Ok(AnalysisTree { codebase_id, files })
    }
}

#[async_trait]
impl AnalysisProvider for SqliteAnalysisRepository {
    async fn get_analysis_for_conversion(
        &self,
        owner: &str,
        repo: &str,
        commit_sha: &str,
    ) -> Result<AnalysisTree> {
        let latest = sqlx::query_as::<_, LatestAnalysisEntity>(
            "SELECT a.id, a.codebase_id, a.commit_sha
             FROM analyses a
             JOIN codebases cb ON cb.id = a.codebase_id
             WHERE cb.owner = ? AND cb.repo = ? AND a.status = ?
             ORDER BY a.completed_at DESC, a.rowid DESC
             LIMIT 1",
        )
        .bind(owner)
        .bind(repo)
        .bind(STATUS_COMPLETED)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch analysis: {e}")))?;

        let Some(latest) = latest else {
            return Err(AppError::AnalysisNotFound(format!(
                "No completed analysis for {}/{}",
                owner, repo
            )));
        };

        if latest.commit_sha != commit_sha {
            return Err(AppError::CommitMismatch(format!(
                "Latest analysis of {}/{} is for commit {}, not {}",
                owner, repo, latest.commit_sha, commit_sha
            )));
        }

        self.load_tree(latest.codebase_id, &latest.id).await
    }
}

#[derive(sqlx::FromRow)]
struct LatestAnalysisEntity {
    id: String,
    codebase_id: String,
    commit_sha: String,
}

#[derive(sqlx::FromRow)]
struct AnalysisRowEntity {
    file_id: i64,
    file_path: String,
    framework: String,
    suite_id: Option<i64>,
    hierarchy: Option<String>,
    name: Option<String>,
    line: Option<i64>,
    status: Option<String>,
    modifier: Option<String>,
}
