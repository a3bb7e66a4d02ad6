use crate::domain::error::{AppError, Result};
use crate::infrastructure::response::extract_json_object;
use std::collections::HashMap;

/// Parses a model reply of the form `{"1": "...", "2": "..."}`.
///
/// Blank descriptions are dropped so that those tests keep their original
/// names. Any non-string value makes the whole reply invalid.
pub(crate) fn parse_conversion_map(raw: &str) -> Result<HashMap<String, String>> {
    let payload = extract_json_object(raw);
    if payload.trim().is_empty() {
        return Err(AppError::ParseError(
            "Model returned no text content".to_string(),
        ));
    }

    let parsed: HashMap<String, serde_json::Value> = serde_json::from_str(&payload)
        .map_err(|err| {
            AppError::ParseError(format!(
                "Model output is not a JSON object: {} | output_snippet={}",
                err,
                preview_text(&payload, 300)
            ))
        })?;

    let mut converted = HashMap::with_capacity(parsed.len());
    for (index, value) in parsed {
        let text = value.as_str().ok_or_else(|| {
            AppError::ParseError(format!("Value for index {} is not a string", index))
        })?;
        let text = text.trim();
        if !text.is_empty() {
            converted.insert(index.trim().to_string(), text.to_string());
        }
    }

    Ok(converted)
}

fn preview_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let truncated: String = value.chars().take(max_chars).collect();
    format!("{}...", truncated)
}
