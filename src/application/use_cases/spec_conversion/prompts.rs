use crate::domain::spec_view::SuiteBatch;

pub(crate) fn build_conversion_system_prompt(language: &str) -> String {
    format!(
        "You are a technical writer who turns automated test names into feature descriptions. \
For every numbered test, write one short, plain sentence in {} describing the behaviour the test verifies, \
as a product owner would read it. Keep identifiers, API names and domain terms untranslated. \
Return only a JSON object whose keys are the test numbers as strings and whose values are the descriptions, \
for example {{\"1\": \"...\", \"2\": \"...\"}}. Include every number exactly once.",
        language
    )
}

/// Lists the tests of one file, numbered from 1 in suite order.
///
/// The numbering here must follow the same order the batch builder uses to
/// assign local indices.
pub(crate) fn build_conversion_user_prompt(
    file_path: &str,
    language: &str,
    suites: &[SuiteBatch],
) -> String {
    let mut body = String::new();
    body.push_str(&format!("Test file: {}\n", file_path));
    body.push_str(&format!("Output language: {}\n", language));

    let mut index = 1usize;
    for suite in suites {
        body.push('\n');
        if suite.hierarchy.trim().is_empty() {
            body.push_str("Suite: (top level)\n");
        } else {
            body.push_str(&format!("Suite: {}\n", suite.hierarchy));
        }
        for test in &suite.tests {
            body.push_str(&format!("{}. {}\n", index, test));
            index += 1;
        }
    }

    body
}
