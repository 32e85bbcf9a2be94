//! Payload extraction from free-form model output.
//!
//! Models do not reliably honor "JSON only" or "code only" instructions, so
//! every extractor tries a fenced block first and a looser match second.

use once_cell::sync::Lazy;
use regex::Regex;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[ \t]*(?:json|JSON)?[ \t]*\r?\n(.*?)```").expect("valid regex")
});

static BARE_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

static FENCED_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[ \t]*(?:javascript|js|mjs|typescript|ts)?[ \t]*\r?\n(.*?)```")
        .expect("valid regex")
});

/// Which tier produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionTier {
    Fenced,
    Bare,
}

/// Find the JSON object in a model response.
///
/// A fenced block wins when its body looks like an object; otherwise the
/// span from the first `{` to the last `}` is taken.
pub fn extract_json(text: &str) -> Option<(&str, ExtractionTier)> {
    if let Some(body) = FENCED_JSON
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .find(|body| body.starts_with('{'))
    {
        return Some((body, ExtractionTier::Fenced));
    }

    BARE_OBJECT
        .find(text)
        .map(|m| (m.as_str(), ExtractionTier::Bare))
}

/// Find source code in a model response: the longest fenced block, else the
/// whole trimmed response. Returns `None` for an empty response.
pub fn extract_code(text: &str) -> Option<&str> {
    let fenced = FENCED_CODE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|body| !body.is_empty())
        .max_by_key(|body| body.len());

    match fenced {
        Some(body) => Some(body),
        None => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then_some(trimmed)
        }
    }
}

/// Leading slice of `text` holding at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
