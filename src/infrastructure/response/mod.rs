use once_cell::sync::Lazy;
use regex::Regex;

static THINK_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<think>[\s\S]*?</think>|<think\s*/>").unwrap());

static REASONING_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<reasoning>[\s\S]*?</reasoning>").unwrap());

static INTERNAL_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<internal>[\s\S]*?</internal>").unwrap());

static CODE_FENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").unwrap());

/// Cleans LLM response by removing reasoning artifacts some models emit
pub fn clean_llm_response(response: &str) -> String {
    let mut cleaned = response.to_string();

    // Remove <think>...</think> and <think/> tags
    cleaned = THINK_TAG_PATTERN.replace_all(&cleaned, "").to_string();

    // Remove <reasoning>...</reasoning> tags (some models use this)
    cleaned = REASONING_TAG_PATTERN.replace_all(&cleaned, "").to_string();

    // Remove <internal>...</internal> tags
    cleaned = INTERNAL_TAG_PATTERN.replace_all(&cleaned, "").to_string();

    cleaned.trim().to_string()
}

/// Returns the JSON object embedded in a model reply.
///
/// Handles Markdown code fences and leading/trailing prose around the object.
pub fn extract_json_object(response: &str) -> String {
    let cleaned = clean_llm_response(response);

    let unfenced = CODE_FENCE_PATTERN
        .captures(&cleaned)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str().to_string())
        .unwrap_or(cleaned);

    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => unfenced[start..=end].to_string(),
        _ => unfenced,
    }
}
