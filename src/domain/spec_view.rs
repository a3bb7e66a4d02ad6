use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use validator::Validate;

/// Separator between nested `describe` blocks in a suite hierarchy.
pub const HIERARCHY_SEPARATOR: &str = " > ";

/// SHA-256 digest identifying one (codebase, file, suite, test, language) tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(pub [u8; 32]);

impl CacheKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ---- analysis tree supplied by the analysis repository ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedTest {
    pub name: String,
    pub line: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub modifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedSuite {
    pub hierarchy: String,
    pub tests: Vec<AnalyzedTest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedFile {
    pub file_path: String,
    pub framework: String,
    pub suites: Vec<AnalyzedSuite>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisTree {
    pub codebase_id: String,
    pub files: Vec<AnalyzedFile>,
}

impl AnalysisTree {
    pub fn total_tests(&self) -> usize {
        self.files
            .iter()
            .flat_map(|file| file.suites.iter())
            .map(|suite| suite.tests.len())
            .sum()
    }
}

// ---- per-run working set ----

/// One test of one conversion run, with its cache identity precomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMeta {
    pub cache_key: CacheKey,
    pub codebase_id: String,
    pub file_path: String,
    pub framework: String,
    pub suite_hierarchy: String,
    pub original_name: String,
    pub line: i64,
    pub status: String,
    pub modifier: String,
    pub language: String,
}

/// Previously converted name, keyed by (cache key, model id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub cache_key: CacheKey,
    pub codebase_id: String,
    pub file_path: String,
    pub suite_hierarchy: String,
    pub original_name: String,
    pub converted_name: String,
    pub language: String,
    pub model_id: String,
}

impl CacheEntry {
    pub fn from_meta(meta: &TestMeta, converted_name: String, model_id: &str) -> Self {
        Self {
            cache_key: meta.cache_key,
            codebase_id: meta.codebase_id.clone(),
            file_path: meta.file_path.clone(),
            suite_hierarchy: meta.suite_hierarchy.clone(),
            original_name: meta.original_name.clone(),
            converted_name,
            language: meta.language.clone(),
            model_id: model_id.to_string(),
        }
    }
}

/// Raw test names of one suite, in source order, as sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuiteBatch {
    pub hierarchy: String,
    pub tests: Vec<String>,
}

/// Uncached tests of a single file.
///
/// `index` maps the local index used in the prompt ("1", "2", ...) back to a
/// position in the run's `TestMeta` list. Numbering restarts at 1 for every
/// file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionBatch {
    pub file_path: String,
    pub suites: Vec<SuiteBatch>,
    pub index: HashMap<String, usize>,
}

impl ConversionBatch {
    pub fn test_count(&self) -> usize {
        self.index.len()
    }
}

// ---- request / response surface ----

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConvertSpecRequest {
    #[validate(length(min = 1, max = 255))]
    pub owner: String,
    #[validate(length(min = 1, max = 255))]
    pub repo: String,
    #[validate(length(min = 7, max = 64))]
    pub commit_sha: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub force_refresh: bool,
}

/// Completed analysis pushed in by an analyzer run.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecordAnalysisRequest {
    #[validate(length(min = 1, max = 255))]
    pub owner: String,
    #[validate(length(min = 1, max = 255))]
    pub repo: String,
    #[validate(length(min = 7, max = 64))]
    pub commit_sha: String,
    #[serde(default)]
    pub files: Vec<AnalyzedFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordAnalysisResponse {
    pub codebase_id: String,
    pub total_tests: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversionSource {
    Cache,
    Converted,
    /// No conversion available; the original name is kept.
    Original,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedTest {
    pub original_name: String,
    pub converted_name: String,
    pub is_from_cache: bool,
    pub source: ConversionSource,
    pub line: i64,
    pub modifier: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedSuite {
    pub hierarchy: String,
    pub name: String,
    pub tests: Vec<ConvertedTest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedFile {
    pub file_path: String,
    pub framework: String,
    pub suites: Vec<ConvertedSuite>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionSummary {
    pub cached_count: usize,
    pub converted_count: usize,
    pub total_tests: usize,
    pub converted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpecViewResult {
    pub files: Vec<ConvertedFile>,
    pub summary: ConversionSummary,
}

/// Display name of a suite: the innermost segment of its hierarchy.
pub fn suite_display_name(hierarchy: &str) -> String {
    hierarchy
        .rsplit(HIERARCHY_SEPARATOR)
        .next()
        .unwrap_or(hierarchy)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_display_name() {
        assert_eq!(suite_display_name("Auth > Login > Session"), "Session");
        assert_eq!(suite_display_name("Auth"), "Auth");
        assert_eq!(suite_display_name(""), "");
    }

    #[test]
    fn test_cache_key_hex_roundtrip() {
        let key = CacheKey([7u8; 32]);
        assert_eq!(key.to_hex().len(), 64);
        assert_eq!(CacheKey::from_slice(key.as_bytes()), Some(key));
        assert_eq!(CacheKey::from_slice(&[1, 2, 3]), None);
    }

    #[test]
    fn test_request_validation() {
        let request = ConvertSpecRequest {
            owner: "acme".to_string(),
            repo: "web".to_string(),
            commit_sha: "abc".to_string(),
            language: None,
            force_refresh: false,
        };
        assert!(request.validate().is_err());

        let request = ConvertSpecRequest {
            commit_sha: "0123456789abcdef".to_string(),
            ..request
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: ConvertSpecRequest =
            serde_json::from_str(r#"{"owner":"acme","repo":"web","commitSha":"0123456"}"#)
                .unwrap();
        assert!(!request.force_refresh);
        assert!(request.language.is_none());
    }
}
