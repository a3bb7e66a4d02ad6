use crate::domain::spec_view::{
    suite_display_name, AnalysisTree, CacheEntry, ConversionSource, ConversionSummary,
    ConvertedFile, ConvertedSuite, ConvertedTest, SpecViewResult, TestMeta,
};
use std::collections::HashMap;

/// Rebuilds the analysis tree with converted names.
///
/// `metas` must come from `collect_test_metas` on the same tree, so the n-th
/// test visited here is `metas[n]`. `converted` is keyed by that position.
pub(super) fn assemble_spec_view(
    tree: &AnalysisTree,
    metas: &[TestMeta],
    cached: &HashMap<String, CacheEntry>,
    converted: &HashMap<usize, String>,
) -> SpecViewResult {
    let mut cached_count = 0;
    let mut converted_count = 0;
    let mut position = 0usize;
    let mut files = Vec::with_capacity(tree.files.len());

    for file in &tree.files {
        let mut suites = Vec::with_capacity(file.suites.len());
        for suite in &file.suites {
            let mut tests = Vec::with_capacity(suite.tests.len());
            for test in &suite.tests {
                let cache_hit = metas
                    .get(position)
                    .and_then(|meta| cached.get(&meta.cache_key.to_hex()));

                let (converted_name, source) = match (cache_hit, converted.get(&position)) {
                    (Some(entry), _) => {
                        cached_count += 1;
                        (entry.converted_name.clone(), ConversionSource::Cache)
                    }
                    (None, Some(name)) => {
                        converted_count += 1;
                        (name.clone(), ConversionSource::Converted)
                    }
                    (None, None) => (test.name.clone(), ConversionSource::Original),
                };

                tests.push(ConvertedTest {
                    original_name: test.name.clone(),
                    converted_name,
                    is_from_cache: source == ConversionSource::Cache,
                    source,
                    line: test.line,
                    modifier: test.modifier.clone(),
                    status: test.status.clone(),
                });
                position += 1;
            }

            suites.push(ConvertedSuite {
                hierarchy: suite.hierarchy.clone(),
                name: suite_display_name(&suite.hierarchy),
                tests,
            });
        }

        files.push(ConvertedFile {
            file_path: file.file_path.clone(),
            framework: file.framework.clone(),
            suites,
        });
    }

    SpecViewResult {
        files,
        summary: ConversionSummary {
            cached_count,
            converted_count,
            total_tests: position,
            converted_at: chrono::Utc::now(),
        },
    }
}
