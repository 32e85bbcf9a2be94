//! Sandbox executor: test-run a generated crawler in isolation.
//!
//! A run moves through init, write-module, runtime (load, locate export,
//! crawl under a timeout, final screenshot), validate and cleanup. Every
//! failure along the way becomes a [`CrawlerError`] in the returned
//! [`TestExecutionResult`]; nothing here returns `Err` for a bad crawler.

pub mod runtime;
pub mod types;
pub mod validate;
pub mod workspace;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

pub use runtime::{CrawlerRuntime, NodeRuntime, RunRequest, RuntimeError, RuntimeEvent, RuntimeOutput};
pub use types::{CrawlerError, ErrorStep, JobRecord, TestExecutionResult};
pub use validate::{ValidatedOutput, validate_output};
pub use workspace::{SandboxWorkspace, WorkspaceError, cleanup_stale_workspaces};

/// Limits and locations for sandbox runs
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// Parent of the per-run workspaces
    pub root_dir: PathBuf,
    pub node_command: String,
    /// Arguments placed before the harness path
    pub node_args: Vec<String>,
    /// Budget for `crawl()` itself, enforced inside the runtime
    pub crawl_timeout: Duration,
    /// Extra time before the runtime process is killed outright
    pub launch_grace: Duration,
    /// Items a test run asks the crawler for
    pub batch_size: u32,
    pub max_pages: u32,
    pub headless: bool,
    /// Directory containing `node_modules/playwright`, if not resolvable
    /// from the workspace
    pub modules_dir: Option<PathBuf>,
    /// Leave workspaces on disk after the run
    pub keep_workspace: bool,
    /// Replaces the module's built-in `{origin}`/`{id}` detail URL template
    pub detail_url_template: Option<String>,
    /// Selectors tried ahead of the generated chains, by role key
    pub selector_overrides: HashMap<String, String>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            root_dir: crate::config::default_sandbox_dir(),
            node_command: crate::config::DEFAULT_NODE_COMMAND.to_string(),
            node_args: Vec::new(),
            crawl_timeout: Duration::from_secs(crate::config::DEFAULT_CRAWL_TIMEOUT),
            launch_grace: Duration::from_secs(30),
            batch_size: 1,
            max_pages: 1,
            headless: true,
            modules_dir: None,
            keep_workspace: false,
            detail_url_template: None,
            selector_overrides: HashMap::new(),
        }
    }
}

impl SandboxSettings {
    /// The `config` object handed to `crawl(page, config)`
    pub fn crawl_config(&self, board_url: &str, board_name: &str) -> Value {
        let mut config = json!({
            "url": board_url,
            "baseUrl": board_url,
            "name": board_name,
            "crawlBatchSize": self.batch_size,
            "maxPages": self.max_pages,
            "selectors": self.selector_overrides,
        });
        if let Some(template) = &self.detail_url_template {
            config["detailUrlTemplate"] = Value::String(template.clone());
        }
        config
    }
}

/// Anything that can test-run crawler code
#[async_trait]
pub trait CrawlerExecutor: Send + Sync {
    async fn execute(&self, code: &str, board_url: &str, board_name: &str) -> TestExecutionResult;
}

/// Runs crawler modules through a [`CrawlerRuntime`] in fresh workspaces
#[derive(Clone)]
pub struct SandboxExecutor {
    settings: SandboxSettings,
    runtime: Arc<dyn CrawlerRuntime>,
}

impl SandboxExecutor {
    /// Executor backed by `node` as configured in `settings`
    pub fn new(settings: SandboxSettings) -> Self {
        let runtime = NodeRuntime::new(settings.node_command.clone())
            .args(settings.node_args.clone())
            .launch_grace(settings.launch_grace)
            .modules_dir(settings.modules_dir.clone());
        Self::with_runtime(settings, Arc::new(runtime))
    }

    pub fn with_runtime(settings: SandboxSettings, runtime: Arc<dyn CrawlerRuntime>) -> Self {
        Self { settings, runtime }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    async fn run_in_workspace(
        &self,
        workspace: &SandboxWorkspace,
        code: &str,
        board_url: &str,
        board_name: &str,
    ) -> TestExecutionResult {
        let module_path = match workspace.write_module(code) {
            Ok(path) => path,
            Err(e) => return TestExecutionResult::failed(CrawlerError::execution(e.to_string())),
        };

        let request = RunRequest {
            module_path,
            workspace: workspace.path().to_path_buf(),
            config: self.settings.crawl_config(board_url, board_name),
            crawl_timeout: self.settings.crawl_timeout,
            headless: self.settings.headless,
        };

        match self.runtime.run(&request).await {
            Ok(output) => interpret_output(output, self.settings.crawl_timeout + self.settings.launch_grace),
            Err(e) => TestExecutionResult::failed(CrawlerError::execution(e.to_string())),
        }
    }
}

#[async_trait]
impl CrawlerExecutor for SandboxExecutor {
    async fn execute(&self, code: &str, board_url: &str, board_name: &str) -> TestExecutionResult {
        let started = Instant::now();
        info!(board = board_name, runtime = self.runtime.name(), "sandbox run starting");

        let result = match SandboxWorkspace::create(&self.settings.root_dir, board_name) {
            Ok(workspace) => {
                let workspace = workspace.keep(self.settings.keep_workspace);
                let result = self.run_in_workspace(&workspace, code, board_url, board_name).await;
                if let Err(e) = workspace.cleanup() {
                    warn!("sandbox cleanup failed: {}", e);
                }
                if self.settings.keep_workspace {
                    info!(path = %workspace.path().display(), "workspace kept");
                }
                result
            }
            Err(e) => TestExecutionResult::failed(CrawlerError::execution(e.to_string())),
        };
        let result = result.with_execution_time_ms(started.elapsed().as_millis() as u64);

        info!(
            board = board_name,
            success = result.success,
            jobs = result.jobs_collected,
            errors = result.errors.len(),
            elapsed_ms = result.execution_time_ms,
            "sandbox run finished"
        );
        result
    }
}

/// Turn runtime events into a test result
pub fn interpret_output(output: RuntimeOutput, hard_deadline: Duration) -> TestExecutionResult {
    let mut errors = Vec::new();
    let mut logs = Vec::new();
    let mut screenshots = Vec::new();
    let mut items: Option<Value> = None;
    let mut fatal = false;

    for event in output.events {
        match event {
            RuntimeEvent::Console { level, text } => logs.push(format!("[{}] {}", level, text)),
            RuntimeEvent::PageError { message } => {
                errors.push(CrawlerError::new(ErrorStep::PageError, message))
            }
            RuntimeEvent::Fatal { message } => {
                fatal = true;
                errors.push(CrawlerError::execution(message));
            }
            RuntimeEvent::Result { items: value } => items = Some(value),
            RuntimeEvent::Screenshot { data } => screenshots.push(data),
        }
    }

    if output.timed_out {
        errors.push(CrawlerError::execution(format!(
            "crawler process exceeded {}s and was killed",
            hard_deadline.as_secs()
        )));
    } else if items.is_none() && !fatal {
        let mut message = format!(
            "crawler process exited without a result (exit code {})",
            output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            message.push_str(": ");
            message.push_str(stderr);
        }
        errors.push(CrawlerError::execution(message));
    }

    let (jobs_collected, sample) = match &items {
        Some(value) => {
            let validated = validate_output(value);
            errors.extend(validated.errors);
            (validated.item_count, validated.records.into_iter().next())
        }
        None => (0, None),
    };

    TestExecutionResult::new(jobs_collected, errors)
        .with_logs(logs)
        .with_screenshots(screenshots)
        .with_sample(sample)
}

/// Test-run `code` with the process-wide sandbox configuration
pub async fn execute_generated_crawler(code: &str, board_url: &str, board_name: &str) -> TestExecutionResult {
    SandboxExecutor::new(crate::config::get().sandbox_settings())
        .execute(code, board_url, board_name)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Runtime replaying canned events and recording what it was given
    struct Replay {
        output: RuntimeOutput,
        seen: Mutex<Vec<(RunRequest, String, bool)>>,
    }

    impl Replay {
        fn new(events: Vec<RuntimeEvent>) -> Self {
            Self {
                output: RuntimeOutput {
                    events,
                    exit_code: Some(0),
                    ..RuntimeOutput::default()
                },
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CrawlerRuntime for Replay {
        async fn run(&self, request: &RunRequest) -> Result<RuntimeOutput, RuntimeError> {
            let code = std::fs::read_to_string(&request.module_path)?;
            let workspace_exists = request.workspace.exists();
            self.seen
                .lock()
                .unwrap()
                .push((request.clone(), code, workspace_exists));
            Ok(self.output.clone())
        }

        fn name(&self) -> &str {
            "replay"
        }
    }

    fn good_items() -> Value {
        json!([{
            "title": "Social worker",
            "date": "2024-04-01",
            "link": "https://jobs.example.org/board/view?id=3",
            "detailContent": "Full-time position supporting community welfare programs across the district.",
        }])
    }

    fn executor(root: &std::path::Path, runtime: Arc<Replay>) -> SandboxExecutor {
        let settings = SandboxSettings {
            root_dir: root.to_path_buf(),
            ..SandboxSettings::default()
        };
        SandboxExecutor::with_runtime(settings, runtime)
    }

    #[tokio::test]
    async fn test_successful_run() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(Replay::new(vec![
            RuntimeEvent::Console {
                level: "log".to_string(),
                text: "collected 1".to_string(),
            },
            RuntimeEvent::Result { items: good_items() },
            RuntimeEvent::Screenshot {
                data: "iVBORw0KGgo=".to_string(),
            },
        ]));
        let result = executor(root.path(), runtime.clone())
            .execute("export async function crawl() {}", "https://jobs.example.org/list", "city")
            .await;

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.jobs_collected, 1);
        assert_eq!(result.logs, vec!["[log] collected 1".to_string()]);
        assert_eq!(result.screenshots.len(), 1);
        assert_eq!(result.sample.unwrap().title, "Social worker");

        let seen = runtime.seen.lock().unwrap();
        let (request, code, workspace_existed) = &seen[0];
        assert_eq!(code, "export async function crawl() {}");
        assert!(*workspace_existed);
        assert_eq!(request.config["crawlBatchSize"], 1);
        assert_eq!(request.config["url"], "https://jobs.example.org/list");
        assert_eq!(request.config["selectors"], json!({}));
        assert!(request.config.get("detailUrlTemplate").is_none());
        assert_eq!(request.crawl_timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_run_overrides_reach_the_crawler_config() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(Replay::new(vec![RuntimeEvent::Result { items: good_items() }]));
        let mut settings = SandboxSettings {
            root_dir: root.path().to_path_buf(),
            detail_url_template: Some("{origin}/recruit/view.do?seq={id}".to_string()),
            ..SandboxSettings::default()
        };
        settings
            .selector_overrides
            .insert("row".to_string(), "ul.notices > li".to_string());
        SandboxExecutor::with_runtime(settings, runtime.clone())
            .execute("code", "https://jobs.example.org/list", "city")
            .await;

        let seen = runtime.seen.lock().unwrap();
        let config = &seen[0].0.config;
        assert_eq!(config["selectors"]["row"], "ul.notices > li");
        assert_eq!(config["detailUrlTemplate"], "{origin}/recruit/view.do?seq={id}");
    }

    #[tokio::test]
    async fn test_workspace_removed_after_run() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(Replay::new(vec![RuntimeEvent::Result { items: good_items() }]));
        executor(root.path(), runtime.clone())
            .execute("code", "https://jobs.example.org/list", "city")
            .await;

        let workspace = runtime.seen.lock().unwrap()[0].0.workspace.clone();
        assert!(!workspace.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_page_errors_fail_an_otherwise_good_run() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(Replay::new(vec![
            RuntimeEvent::PageError {
                message: "jQuery is not defined".to_string(),
            },
            RuntimeEvent::Result { items: good_items() },
        ]));
        let result = executor(root.path(), runtime)
            .execute("code", "https://jobs.example.org/list", "city")
            .await;

        assert!(!result.success);
        assert_eq!(result.jobs_collected, 1);
        assert_eq!(result.errors[0].step, ErrorStep::PageError);
    }

    #[tokio::test]
    async fn test_missing_export() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(Replay::new(vec![RuntimeEvent::Fatal {
            message: "crawler function not found".to_string(),
        }]));
        let result = executor(root.path(), runtime)
            .execute("export const x = 1;", "https://jobs.example.org/list", "city")
            .await;

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].step, ErrorStep::Execution);
        assert_eq!(result.errors[0].error, "crawler function not found");
    }

    #[test]
    fn test_timeout_is_execution_error() {
        let output = RuntimeOutput {
            events: vec![RuntimeEvent::Console {
                level: "log".to_string(),
                text: "still going".to_string(),
            }],
            timed_out: true,
            ..RuntimeOutput::default()
        };
        let result = interpret_output(output, Duration::from_secs(90));
        assert!(!result.success);
        assert_eq!(result.errors[0].step, ErrorStep::Execution);
        assert!(result.errors[0].error.contains("90s"));
        assert_eq!(result.logs.len(), 1);
    }

    #[test]
    fn test_silent_crash_reports_stderr() {
        let output = RuntimeOutput {
            exit_code: Some(1),
            stderr: "SyntaxError: Unexpected token".to_string(),
            ..RuntimeOutput::default()
        };
        let result = interpret_output(output, Duration::from_secs(90));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].error.contains("exit code 1"));
        assert!(result.errors[0].error.contains("SyntaxError"));
    }

    #[test]
    fn test_empty_result_is_not_success() {
        let output = RuntimeOutput {
            events: vec![RuntimeEvent::Result { items: json!([]) }],
            exit_code: Some(0),
            ..RuntimeOutput::default()
        };
        let result = interpret_output(output, Duration::from_secs(90));
        assert!(!result.success);
        assert_eq!(result.jobs_collected, 0);
        assert_eq!(result.errors[0].step, ErrorStep::Validation);
    }

    #[tokio::test]
    async fn test_unwritable_root_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();

        let runtime = Arc::new(Replay::new(vec![]));
        let result = executor(&file, runtime.clone())
            .execute("code", "https://jobs.example.org/list", "city")
            .await;

        assert!(!result.success);
        assert_eq!(result.errors[0].step, ErrorStep::Execution);
        assert!(runtime.seen.lock().unwrap().is_empty());
    }
}
