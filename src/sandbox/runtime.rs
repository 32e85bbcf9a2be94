//! Out-of-process execution of crawler modules.
//!
//! Generated code never runs inside this process. A [`CrawlerRuntime`]
//! starts a separate process, feeds it the module, and collects the
//! NDJSON events it prints. [`NodeRuntime`] is the production runtime:
//! `node` plus the embedded Playwright harness.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Harness script written next to every module
pub const HARNESS_SOURCE: &str = include_str!("harness.mjs");
pub const HARNESS_FILE: &str = "harness.mjs";

/// Environment variable telling the harness where to find `playwright`
pub const MODULES_ENV: &str = "CRAWLER_SYNTH_MODULES";

const STDERR_TAIL_CHARS: usize = 2000;
const STDERR_DRAIN: Duration = Duration::from_secs(2);

/// One line of harness output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    Console { level: String, text: String },
    PageError { message: String },
    Fatal { message: String },
    Result { items: Value },
    Screenshot { data: String },
}

impl RuntimeEvent {
    /// Parse one stdout line; lines that are not events are kept as logs
    pub fn parse_line(line: &str) -> Self {
        serde_json::from_str(line).unwrap_or_else(|_| RuntimeEvent::Console {
            level: "stdout".to_string(),
            text: line.to_string(),
        })
    }
}

/// What a runtime needs to run one module
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub module_path: PathBuf,
    pub workspace: PathBuf,
    /// The `config` argument handed to `crawl(page, config)`
    pub config: Value,
    pub crawl_timeout: Duration,
    pub headless: bool,
}

/// Everything a finished (or killed) runtime process reported
#[derive(Debug, Clone, Default)]
pub struct RuntimeOutput {
    pub events: Vec<RuntimeEvent>,
    pub exit_code: Option<i32>,
    /// The process outlived its hard deadline and was killed
    pub timed_out: bool,
    /// Tail of stderr, for diagnostics
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes a crawler module in an isolated process
#[async_trait]
pub trait CrawlerRuntime: Send + Sync {
    async fn run(&self, request: &RunRequest) -> Result<RuntimeOutput, RuntimeError>;

    /// Identifier for logs (e.g., "node")
    fn name(&self) -> &str;
}

/// `node harness.mjs <spec>` with a hard kill deadline
#[derive(Debug, Clone)]
pub struct NodeRuntime {
    program: String,
    leading_args: Vec<String>,
    /// Extra time past the crawl timeout for browser launch and teardown
    launch_grace: Duration,
    modules_dir: Option<PathBuf>,
}

impl NodeRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            launch_grace: Duration::from_secs(30),
            modules_dir: None,
        }
    }

    /// Arguments placed before the harness path (e.g., `--no-warnings`)
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn launch_grace(mut self, grace: Duration) -> Self {
        self.launch_grace = grace;
        self
    }

    pub fn modules_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.modules_dir = dir;
        self
    }

    fn run_spec(request: &RunRequest) -> String {
        serde_json::json!({
            "module": request.module_path.to_string_lossy(),
            "config": request.config,
            "timeoutMs": request.crawl_timeout.as_millis() as u64,
            "headless": request.headless,
        })
        .to_string()
    }
}

#[async_trait]
impl CrawlerRuntime for NodeRuntime {
    async fn run(&self, request: &RunRequest) -> Result<RuntimeOutput, RuntimeError> {
        let harness = harness_path(&request.workspace);
        tokio::fs::write(&harness, HARNESS_SOURCE).await?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .arg(&harness)
            .arg(Self::run_spec(request))
            .current_dir(&request.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.modules_dir {
            command.env(MODULES_ENV, dir);
        }

        let mut child = command.spawn().map_err(|source| RuntimeError::Spawn {
            command: self.program.clone(),
            source,
        })?;
        debug!(pid = ?child.id(), module = %request.module_path.display(), "runtime started");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let deadline = request.crawl_timeout + self.launch_grace;
        let mut output = RuntimeOutput::default();

        let finished = tokio::time::timeout(deadline, async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Some(line) = lines.next_line().await? {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let event = RuntimeEvent::parse_line(&line);
                    echo(&event);
                    output.events.push(event);
                }
            }
            child.wait().await
        })
        .await;

        match finished {
            Ok(status) => output.exit_code = status?.code(),
            Err(_) => {
                warn!(
                    after_secs = deadline.as_secs(),
                    "runtime exceeded its deadline, killing it"
                );
                output.timed_out = true;
                let _ = child.kill().await;
            }
        }

        // a killed runtime can leave grandchildren holding the pipe open
        let stderr = match tokio::time::timeout(STDERR_DRAIN, &mut stderr_task).await {
            Ok(Ok(text)) => text,
            _ => {
                stderr_task.abort();
                String::new()
            }
        };
        output.stderr = tail(&stderr, STDERR_TAIL_CHARS).to_string();
        Ok(output)
    }

    fn name(&self) -> &str {
        "node"
    }
}

/// Live echo of crawler console output
fn echo(event: &RuntimeEvent) {
    match event {
        RuntimeEvent::Console { level, text } if level == "error" || level == "warning" => {
            warn!(level = %level, "crawler console: {}", text);
        }
        RuntimeEvent::Console { level, text } => debug!(level = %level, "crawler console: {}", text),
        RuntimeEvent::PageError { message } => warn!("crawler page error: {}", message),
        RuntimeEvent::Fatal { message } => warn!("crawler failed: {}", message),
        RuntimeEvent::Result { .. } | RuntimeEvent::Screenshot { .. } => {}
    }
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Harness path inside a workspace
pub fn harness_path(workspace: &Path) -> PathBuf {
    workspace.join(HARNESS_FILE)
}
