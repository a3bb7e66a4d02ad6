use crate::domain::error::{AppError, Result};

/// Output languages the converter accepts.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "English",
    "Korean",
    "Japanese",
    "Chinese",
    "Spanish",
    "French",
    "German",
    "Portuguese",
    "Russian",
    "Italian",
    "Dutch",
    "Polish",
    "Turkish",
    "Vietnamese",
    "Thai",
    "Indonesian",
    "Arabic",
    "Hindi",
    "Swedish",
    "Danish",
    "Norwegian",
    "Finnish",
    "Czech",
    "Ukrainian",
];

/// Resolves a requested language to its canonical spelling.
///
/// `None` or a blank value falls back to `default_language`.
pub fn resolve_language(requested: Option<&str>, default_language: &str) -> Result<String> {
    let candidate = requested
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default_language);

    SUPPORTED_LANGUAGES
        .iter()
        .find(|lang| lang.eq_ignore_ascii_case(candidate))
        .map(|lang| lang.to_string())
        .ok_or_else(|| AppError::UnsupportedLanguage(candidate.to_string()))
}
