//! Types for sandbox test runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Stage a crawler error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStep {
    /// Uncaught error inside the crawled page
    PageError,
    /// Output failed a quality rule
    Validation,
    /// Module load, export lookup, crash or timeout
    Execution,
    /// A repair attempt could not produce code
    Correction,
}

impl ErrorStep {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorStep::PageError => "page_error",
            ErrorStep::Validation => "validation",
            ErrorStep::Execution => "execution",
            ErrorStep::Correction => "correction",
        }
    }
}

impl std::fmt::Display for ErrorStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One problem observed while testing a crawler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlerError {
    pub step: ErrorStep,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl CrawlerError {
    pub fn new(step: ErrorStep, error: impl Into<String>) -> Self {
        Self {
            step,
            error: error.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn execution(error: impl Into<String>) -> Self {
        Self::new(ErrorStep::Execution, error)
    }

    pub fn validation(error: impl Into<String>) -> Self {
        Self::new(ErrorStep::Validation, error)
    }
}

impl std::fmt::Display for CrawlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.step, self.error)
    }
}

/// A job posting as returned by a generated crawler.
///
/// Keys the crawler adds beyond the known ones are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub detail_content: String,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of running a crawler once in the sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestExecutionResult {
    /// `errors` is empty and at least one job was collected
    pub success: bool,
    pub jobs_collected: usize,
    pub errors: Vec<CrawlerError>,
    /// Base64 PNG screenshots, in capture order
    pub screenshots: Vec<String>,
    pub execution_time_ms: u64,
    pub logs: Vec<String>,
    /// First collected record, kept for post-mortem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<JobRecord>,
}

impl TestExecutionResult {
    /// The only constructor; `success` is derived, never supplied.
    pub fn new(jobs_collected: usize, errors: Vec<CrawlerError>) -> Self {
        Self {
            success: errors.is_empty() && jobs_collected > 0,
            jobs_collected,
            errors,
            screenshots: Vec::new(),
            execution_time_ms: 0,
            logs: Vec::new(),
            sample: None,
        }
    }

    /// A run that never got as far as producing output
    pub fn failed(error: CrawlerError) -> Self {
        Self::new(0, vec![error])
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_screenshots(mut self, screenshots: Vec<String>) -> Self {
        self.screenshots = screenshots;
        self
    }

    pub fn with_sample(mut self, sample: Option<JobRecord>) -> Self {
        self.sample = sample;
        self
    }

    pub fn with_execution_time_ms(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }
}

/// Accept strings, numbers and null where a string is expected
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}
