//! Output quality rules for a single crawler run.
//!
//! Every rule is checked and every failure reported; nothing here aborts.

use serde_json::{Map, Value};

use super::types::{CrawlerError, JobRecord};

pub const MIN_TITLE_CHARS: usize = 3;
pub const MIN_DETAIL_CHARS: usize = 50;

/// Records a run produced and the rule violations found in them
#[derive(Debug, Clone, Default)]
pub struct ValidatedOutput {
    /// Items returned, parsed or not
    pub item_count: usize,
    pub records: Vec<JobRecord>,
    pub errors: Vec<CrawlerError>,
}

/// Check a crawler's return value.
///
/// Only the first item is inspected field by field: a run collects a
/// single item during testing.
pub fn validate_output(items: &Value) -> ValidatedOutput {
    let mut output = ValidatedOutput::default();

    let Some(array) = items.as_array() else {
        output.errors.push(CrawlerError::validation(format!(
            "crawler returned {} instead of an array",
            type_name(items)
        )));
        return output;
    };

    output.item_count = array.len();
    output.records = array
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect();

    let Some(first) = array.first() else {
        output.errors.push(CrawlerError::validation("crawler returned no items"));
        return output;
    };
    let Some(first) = first.as_object() else {
        output.errors.push(CrawlerError::validation(format!(
            "first item is {} instead of an object",
            type_name(first)
        )));
        return output;
    };

    let title_chars = text(first, "title").chars().count();
    if title_chars < MIN_TITLE_CHARS {
        output.errors.push(CrawlerError::validation(format!(
            "first item title is missing or shorter than {} characters ({})",
            MIN_TITLE_CHARS, title_chars
        )));
    }

    let detail_chars = text(first, "detailContent").chars().count();
    if detail_chars < MIN_DETAIL_CHARS {
        output.errors.push(CrawlerError::validation(format!(
            "first item detailContent is shorter than {} characters ({})",
            MIN_DETAIL_CHARS, detail_chars
        )));
    }

    if text(first, "link").is_empty() {
        output.errors.push(CrawlerError::validation("first item has no link"));
    }

    output
}

fn text<'a>(item: &'a Map<String, Value>, key: &str) -> &'a str {
    item.get(key).and_then(Value::as_str).map(str::trim).unwrap_or("")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
