use crate::application::use_cases::cache_key::derive_cache_key;
use crate::domain::spec_view::{AnalysisTree, CacheEntry, ConversionBatch, SuiteBatch, TestMeta};
use std::collections::HashMap;

/// Flattens the analysis tree into one `TestMeta` per test, in tree order.
pub(crate) fn collect_test_metas(tree: &AnalysisTree, language: &str) -> Vec<TestMeta> {
    let mut metas = Vec::with_capacity(tree.total_tests());
    for file in &tree.files {
        for suite in &file.suites {
            for test in &suite.tests {
                metas.push(TestMeta {
                    cache_key: derive_cache_key(
                        &tree.codebase_id,
                        &file.file_path,
                        &suite.hierarchy,
                        &test.name,
                        language,
                    ),
                    codebase_id: tree.codebase_id.clone(),
                    file_path: file.file_path.clone(),
                    framework: file.framework.clone(),
                    suite_hierarchy: suite.hierarchy.clone(),
                    original_name: test.name.clone(),
                    line: test.line,
                    status: test.status.clone(),
                    modifier: test.modifier.clone(),
                    language: language.to_string(),
                });
            }
        }
    }
    metas
}

/// Groups the uncached tests by file.
///
/// Files and suites keep their first-seen order. Every file gets its own
/// local numbering starting at "1", assigned in the same suite-grouped order
/// the prompt lists the tests in.
pub(crate) fn build_conversion_batches(
    metas: &[TestMeta],
    cached: &HashMap<String, CacheEntry>,
) -> Vec<ConversionBatch> {
    // file path -> (suite hierarchy, meta positions) in first-seen order
    let mut file_order: Vec<&str> = Vec::new();
    let mut files: HashMap<&str, Vec<(&str, Vec<usize>)>> = HashMap::new();

    for (position, meta) in metas.iter().enumerate() {
        if cached.contains_key(&meta.cache_key.to_hex()) {
            continue;
        }

        let suites = files.entry(meta.file_path.as_str()).or_insert_with(|| {
            file_order.push(meta.file_path.as_str());
            Vec::new()
        });

        match suites
            .iter_mut()
            .find(|(hierarchy, _)| *hierarchy == meta.suite_hierarchy)
        {
            Some((_, positions)) => positions.push(position),
            None => suites.push((meta.suite_hierarchy.as_str(), vec![position])),
        }
    }

    file_order
        .into_iter()
        .filter_map(|file_path| {
            let grouped = files.remove(file_path)?;
            let mut index = HashMap::new();
            let mut suites = Vec::with_capacity(grouped.len());
            let mut next_index = 1usize;

            for (hierarchy, positions) in grouped {
                let mut tests = Vec::with_capacity(positions.len());
                for position in positions {
                    tests.push(metas[position].original_name.clone());
                    index.insert(next_index.to_string(), position);
                    next_index += 1;
                }
                suites.push(SuiteBatch {
                    hierarchy: hierarchy.to_string(),
                    tests,
                });
            }

            Some(ConversionBatch {
                file_path: file_path.to_string(),
                suites,
                index,
            })
        })
        .collect()
}
