//! Self-correction: feed sandbox failures back to the model and retry.
//!
//! The loop is bounded. Each attempt repairs the latest code using the
//! latest errors, re-runs the sandbox, and stops at the first success.
//! Exhausting the budget is a normal outcome reported through
//! [`CorrectionResult`], not an error.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analyzer::BoardAnalysis;
use crate::extract::extract_code;
use crate::sandbox::{CrawlerError, CrawlerExecutor, ErrorStep};
use crate::vlm::{InferenceClient, InferenceRequest};

/// Sampling parameters for repair requests
#[derive(Debug, Clone)]
pub struct RepairSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

/// Inputs to one self-correction run
#[derive(Debug, Clone)]
pub struct CorrectionRequest {
    pub board_name: String,
    pub board_url: String,
    pub analysis: BoardAnalysis,
    pub initial_code: String,
    pub initial_errors: Vec<CrawlerError>,
    pub max_attempts: u32,
    pub repair: RepairSettings,
}

impl CorrectionRequest {
    pub fn new(
        board_name: impl Into<String>,
        board_url: impl Into<String>,
        analysis: BoardAnalysis,
        initial_code: impl Into<String>,
        initial_errors: Vec<CrawlerError>,
    ) -> Self {
        Self {
            board_name: board_name.into(),
            board_url: board_url.into(),
            analysis,
            initial_code: initial_code.into(),
            initial_errors,
            max_attempts: crate::config::DEFAULT_MAX_ATTEMPTS,
            repair: RepairSettings::default(),
        }
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn repair(mut self, repair: RepairSettings) -> Self {
        self.repair = repair;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionResult {
    pub success: bool,
    /// Attempts consumed, 1-indexed; never above the budget
    pub attempt_count: u32,
    /// Errors of the final attempt (empty on success)
    pub errors: Vec<CrawlerError>,
    /// Working code, present only on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_code: Option<String>,
}

/// Repair `request.initial_code` until the sandbox accepts it or the
/// attempt budget runs out.
///
/// The executor is called at most `max_attempts` times. An attempt whose
/// repair request fails still counts; the previous code is kept and a
/// `correction` error is recorded.
pub async fn run_self_correction_loop(
    client: &dyn InferenceClient,
    executor: &dyn CrawlerExecutor,
    request: &CorrectionRequest,
) -> CorrectionResult {
    let mut code = request.initial_code.clone();
    let mut errors = request.initial_errors.clone();
    let mut attempt = 0;

    info!(
        board = %request.board_name,
        max_attempts = request.max_attempts,
        initial_errors = errors.len(),
        "self-correction starting"
    );

    while attempt < request.max_attempts {
        attempt += 1;

        let prompt = build_repair_prompt(request, &code, &errors);
        let inference = InferenceRequest::text(prompt)
            .temperature(request.repair.temperature)
            .max_tokens(request.repair.max_tokens);

        let repaired = match client.complete(&inference).await {
            Ok(response) => match extract_code(&response) {
                Some(new_code) => Ok(new_code.to_string()),
                None => Err("model returned no code".to_string()),
            },
            Err(e) => Err(format!("repair request failed: {}", e)),
        };

        let new_code = match repaired {
            Ok(new_code) => new_code,
            Err(message) => {
                warn!(board = %request.board_name, attempt, "{}", message);
                errors.push(CrawlerError::new(
                    ErrorStep::Correction,
                    format!("attempt {}: {}", attempt, message),
                ));
                continue;
            }
        };

        let result = executor
            .execute(&new_code, &request.board_url, &request.board_name)
            .await;
        if result.success {
            info!(board = %request.board_name, attempt, jobs = result.jobs_collected, "self-correction succeeded");
            return CorrectionResult {
                success: true,
                attempt_count: attempt,
                errors: Vec::new(),
                final_code: Some(new_code),
            };
        }

        info!(
            board = %request.board_name,
            attempt,
            errors = result.errors.len(),
            "repaired crawler still failing"
        );
        code = new_code;
        errors = result.errors;
    }

    warn!(board = %request.board_name, attempts = attempt, "self-correction exhausted its budget");
    CorrectionResult {
        success: false,
        attempt_count: attempt,
        errors,
        final_code: None,
    }
}

/// Repair prompt from the previous code and the errors it produced
pub fn build_repair_prompt(request: &CorrectionRequest, code: &str, errors: &[CrawlerError]) -> String {
    let analysis = serde_json::to_string_pretty(&request.analysis).unwrap_or_default();
    let error_list = if errors.is_empty() {
        "- (no errors recorded; the crawler collected nothing)".to_string()
    } else {
        errors
            .iter()
            .map(|e| format!("- {}", e))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "The following crawler for the job board \"{name}\" ({url}) failed its test run.\n\n\
         ## Structure analysis\n\n```json\n{analysis}\n```\n\n\
         ## Current code\n\n```javascript\n{code}\n```\n\n\
         ## Errors from the last run\n\n{errors}\n\n\
         ## Requirements\n\n\
         - Keep a single export: `export async function crawl(page, config)` using the Playwright `page`.\n\
         - Return an array of objects with `title`, `date`, `link` (absolute URL), `detailContent` and `attachmentUrl`.\n\
         - The first item needs a title of at least 3 characters, a link, and detail content of at least 50 characters.\n\
         - Collect at most `config.crawlBatchSize` items; `config.url` is the list page.\n\
         - Keep the fallback selector lists; fix selectors rather than removing fallbacks.\n\n\
         Respond with the complete corrected module in one ```javascript code block and nothing else.\n",
        name = request.board_name,
        url = request.board_url,
        analysis = analysis,
        code = code,
        errors = error_list,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{
        BoardPattern, DetailPageStructure, LinkExtraction, LinkMethod, ListPageStructure,
        PaginationType,
    };
    use crate::sandbox::TestExecutionResult;
    use crate::vlm::{VlmError, VlmResult};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<VecDeque<VlmResult<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<VlmResult<String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn code(n: usize) -> Vec<VlmResult<String>> {
            (1..=n)
                .map(|i| Ok(format!("```javascript\nexport async function crawl() {{ /* v{} */ }}\n```", i)))
                .collect()
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedClient {
        async fn complete(&self, request: &InferenceRequest) -> VlmResult<String> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(VlmError::InvalidResponse("script exhausted".to_string())))
        }
    }

    struct ScriptedExecutor {
        results: Mutex<VecDeque<TestExecutionResult>>,
        codes: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(results: Vec<TestExecutionResult>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                codes: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.codes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CrawlerExecutor for ScriptedExecutor {
        async fn execute(&self, code: &str, _board_url: &str, _board_name: &str) -> TestExecutionResult {
            self.codes.lock().unwrap().push(code.to_string());
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(short_title)
        }
    }

    fn short_title() -> TestExecutionResult {
        TestExecutionResult::new(
            1,
            vec![CrawlerError::validation(
                "first item title is missing or shorter than 3 characters (2)",
            )],
        )
    }

    fn analysis() -> BoardAnalysis {
        BoardAnalysis {
            most_similar_pattern: BoardPattern::B,
            confidence: 0.9,
            list_page: ListPageStructure {
                container_selector: "table.board-list".to_string(),
                row_selector: "tbody tr".to_string(),
                title_selector: "td.title a".to_string(),
                date_selector: "td.date".to_string(),
                link_extraction: LinkExtraction {
                    method: LinkMethod::DataId,
                    attribute: Some("data-id".to_string()),
                    regex: None,
                },
                pagination_type: PaginationType::Query,
            },
            detail_page: DetailPageStructure::default(),
            reasoning: String::new(),
        }
    }

    fn request(max_attempts: u32) -> CorrectionRequest {
        CorrectionRequest::new(
            "city",
            "https://jobs.example.org/list",
            analysis(),
            "export async function crawl() { /* v0 */ }",
            vec![CrawlerError::validation("first item has no link")],
        )
        .max_attempts(max_attempts)
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let client = ScriptedClient::new(ScriptedClient::code(3));
        let executor = ScriptedExecutor::new(vec![short_title(), TestExecutionResult::new(1, vec![])]);

        let result = run_self_correction_loop(&client, &executor, &request(3)).await;

        assert!(result.success);
        assert_eq!(result.attempt_count, 2);
        assert!(result.errors.is_empty());
        assert!(result.final_code.unwrap().contains("v2"));
        assert_eq!(executor.calls(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries() {
        let client = ScriptedClient::new(ScriptedClient::code(3));
        let executor = ScriptedExecutor::new(vec![short_title(), short_title(), short_title()]);

        let result = run_self_correction_loop(&client, &executor, &request(3)).await;

        assert!(!result.success);
        assert_eq!(result.attempt_count, 3);
        assert_eq!(result.final_code, None);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].error.contains("title"));
        assert_eq!(executor.calls(), 3);
    }

    #[tokio::test]
    async fn test_each_prompt_carries_previous_code_and_errors() {
        let client = ScriptedClient::new(ScriptedClient::code(2));
        let executor = ScriptedExecutor::new(vec![short_title(), short_title()]);

        run_self_correction_loop(&client, &executor, &request(2)).await;

        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("v0"));
        assert!(prompts[0].contains("[validation] first item has no link"));
        assert!(prompts[1].contains("v1"));
        assert!(prompts[1].contains("shorter than 3 characters"));
        assert!(!prompts[1].contains("first item has no link"));
    }

    #[tokio::test]
    async fn test_inference_failure_consumes_attempt() {
        let client = ScriptedClient::new(vec![
            Err(VlmError::ConnectionFailed("refused".to_string())),
            Ok("   ".to_string()),
            Ok("```js\nexport async function crawl() { /* v3 */ }\n```".to_string()),
        ]);
        let executor = ScriptedExecutor::new(vec![TestExecutionResult::new(1, vec![])]);

        let result = run_self_correction_loop(&client, &executor, &request(3)).await;

        assert!(result.success);
        assert_eq!(result.attempt_count, 3);
        assert_eq!(executor.calls(), 1);
        // the failed attempts repaired the original code, not nothing
        assert!(client.prompts.lock().unwrap()[2].contains("v0"));
    }

    #[tokio::test]
    async fn test_all_repairs_fail_reports_correction_errors() {
        let client = ScriptedClient::new(vec![]);
        let executor = ScriptedExecutor::new(vec![]);

        let result = run_self_correction_loop(&client, &executor, &request(2)).await;

        assert!(!result.success);
        assert_eq!(result.attempt_count, 2);
        assert_eq!(executor.calls(), 0);
        let steps: Vec<_> = result.errors.iter().map(|e| e.step).collect();
        assert_eq!(
            steps,
            vec![ErrorStep::Validation, ErrorStep::Correction, ErrorStep::Correction]
        );
    }

    #[tokio::test]
    async fn test_zero_budget() {
        let client = ScriptedClient::new(ScriptedClient::code(1));
        let executor = ScriptedExecutor::new(vec![]);

        let result = run_self_correction_loop(&client, &executor, &request(0)).await;

        assert!(!result.success);
        assert_eq!(result.attempt_count, 0);
        assert_eq!(executor.calls(), 0);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_result_wire_form() {
        let result = CorrectionResult {
            success: false,
            attempt_count: 3,
            errors: vec![],
            final_code: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["attemptCount"], 3);
        assert!(value.get("finalCode").is_none());
    }
}
