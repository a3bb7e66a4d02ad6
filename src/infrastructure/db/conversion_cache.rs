use crate::domain::error::{AppError, Result};
use crate::domain::spec_view::{CacheEntry, CacheKey};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;

/// Upper bound on bound parameters per lookup statement.
const LOOKUP_CHUNK_SIZE: usize = 500;

/// Persistent store of converted test names.
#[async_trait]
pub trait ConversionCacheStore: Send + Sync {
    /// Returns the cached entries for `keys` under `model_id`, keyed by the hex form of
    /// the cache key. Missing keys are simply absent from the map.
    async fn get_cached_conversions(
        &self,
        keys: &[CacheKey],
        model_id: &str,
    ) -> Result<HashMap<String, CacheEntry>>;

    /// Inserts or replaces entries. Existing rows keep their key and get the new name.
    async fn upsert_cached_conversions(&self, entries: &[CacheEntry]) -> Result<()>;
}

pub struct SqliteConversionCache {
    pool: SqlitePool,
}

impl SqliteConversionCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[cfg(test)]
    pub async fn count_entries(&self, codebase_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM spec_conversion_cache WHERE codebase_id = ?")
                .bind(codebase_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to count cache rows: {e}")))?;
        Ok(count)
    }
}

#[async_trait]
impl ConversionCacheStore for SqliteConversionCache {
    async fn get_cached_conversions(
        &self,
        keys: &[CacheKey],
        model_id: &str,
    ) -> Result<HashMap<String, CacheEntry>> {
        let mut found = HashMap::new();

        for chunk in keys.chunks(LOOKUP_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let query = format!(
                "SELECT cache_key, model_id, codebase_id, file_path, suite_hierarchy, original_name, converted_name, language
                 FROM spec_conversion_cache
                 WHERE model_id = ? AND cache_key IN ({})",
                placeholders
            );

            let mut statement = sqlx::query_as::<_, CacheEntryEntity>(&query).bind(model_id);
            for key in chunk {
                statement = statement.bind(key.as_bytes().to_vec());
            }

            let rows = statement
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to read cache: {e}")))?;

            for row in rows {
                let entry = CacheEntry::try_from(row)?;
                found.insert(entry.cache_key.to_hex(), entry);
            }
        }

        Ok(found)
    }

    async fn upsert_cached_conversions(&self, entries: &[CacheEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let created_at = chrono::Utc::now().timestamp_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin cache write: {e}")))?;

        for entry in entries {
            sqlx::query(
                "INSERT INTO spec_conversion_cache (cache_key, model_id, codebase_id, file_path, suite_hierarchy, original_name, converted_name, language, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (cache_key, model_id) DO UPDATE SET converted_name = excluded.converted_name",
            )
            .bind(entry.cache_key.as_bytes().to_vec())
            .bind(&entry.model_id)
            .bind(&entry.codebase_id)
            .bind(&entry.file_path)
            .bind(&entry.suite_hierarchy)
            .bind(&entry.original_name)
            .bind(&entry.converted_name)
            .bind(&entry.language)
            .bind(created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to write cache row: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit cache write: {e}")))?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CacheEntryEntity {
    cache_key: Vec<u8>,
    model_id: String,
    codebase_id: String,
    file_path: String,
    suite_hierarchy: String,
    original_name: String,
    converted_name: String,
    language: String,
}

impl TryFrom<CacheEntryEntity> for CacheEntry {
    type Error = AppError;

    fn try_from(entity: CacheEntryEntity) -> Result<Self> {
        let cache_key = CacheKey::from_slice(&entity.cache_key).ok_or_else(|| {
            AppError::DatabaseError(format!(
                "Cache key has {} bytes, expected 32",
                entity.cache_key.len()
            ))
        })?;

        Ok(Self {
            cache_key,
            codebase_id: entity.codebase_id,
            file_path: entity.file_path,
            suite_hierarchy: entity.suite_hierarchy,
            original_name: entity.original_name,
            converted_name: entity.converted_name,
            language: entity.language,
            model_id: entity.model_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::cache_key::derive_cache_key;
    use crate::infrastructure::db::connection::{init_spec_view_db, IN_MEMORY_PATH};
    use std::path::Path;

    async fn store() -> SqliteConversionCache {
        let pool = init_spec_view_db(Path::new(IN_MEMORY_PATH)).await.unwrap();
        SqliteConversionCache::new(pool)
    }

    fn entry(test_name: &str, converted: &str, model_id: &str) -> CacheEntry {
        CacheEntry {
            cache_key: derive_cache_key("cb-1", "a.test.ts", "Auth", test_name, "Korean"),
            codebase_id: "cb-1".to_string(),
            file_path: "a.test.ts".to_string(),
            suite_hierarchy: "Auth".to_string(),
            original_name: test_name.to_string(),
            converted_name: converted.to_string(),
            language: "Korean".to_string(),
            model_id: model_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_then_lookup() {
        let store = store().await;
        let first = entry("should login", "로그인한다", "gemini/flash");
        let second = entry("should logout", "로그아웃한다", "gemini/flash");
        store
            .upsert_cached_conversions(&[first.clone(), second.clone()])
            .await
            .unwrap();

        let missing = derive_cache_key("cb-1", "a.test.ts", "Auth", "nope", "Korean");
        let found = store
            .get_cached_conversions(&[first.cache_key, missing], "gemini/flash")
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[&first.cache_key.to_hex()], first);
    }

    #[tokio::test]
    async fn test_lookup_is_scoped_to_model() {
        let store = store().await;
        let cached = entry("should login", "로그인한다", "gemini/flash");
        store
            .upsert_cached_conversions(std::slice::from_ref(&cached))
            .await
            .unwrap();

        let found = store
            .get_cached_conversions(&[cached.cache_key], "openai/gpt-4o-mini")
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_converted_name() {
        let store = store().await;
        store
            .upsert_cached_conversions(&[entry("should login", "old", "m")])
            .await
            .unwrap();
        let updated = entry("should login", "new", "m");
        store
            .upsert_cached_conversions(std::slice::from_ref(&updated))
            .await
            .unwrap();

        let found = store
            .get_cached_conversions(&[updated.cache_key], "m")
            .await
            .unwrap();
        assert_eq!(found[&updated.cache_key.to_hex()].converted_name, "new");
        assert_eq!(store.count_entries("cb-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lookup_spans_multiple_chunks() {
        let store = store().await;
        let entries: Vec<_> = (0..LOOKUP_CHUNK_SIZE + 20)
            .map(|i| entry(&format!("test {i}"), &format!("converted {i}"), "m"))
            .collect();
        store.upsert_cached_conversions(&entries).await.unwrap();

        let keys: Vec<_> = entries.iter().map(|e| e.cache_key).collect();
        let found = store.get_cached_conversions(&keys, "m").await.unwrap();
        assert_eq!(found.len(), entries.len());
    }

    #[tokio::test]
    async fn test_empty_inputs_are_noops() {
        let store = store().await;
        store.upsert_cached_conversions(&[]).await.unwrap();
        assert!(store.get_cached_conversions(&[], "m").await.unwrap().is_empty());
    }
}
