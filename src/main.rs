use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crawler_synth::browser::{ChromeBackend, FixturePage, PageBackend};
use crawler_synth::capture::{CapturedBoardData, capture_board_data};
use crawler_synth::codegen::{CrawlPlan, DEFAULT_DETAIL_URL_TEMPLATE, SelectorRole, generate_crawler_code, slugify};
use crawler_synth::config::{self, Config};
use crawler_synth::pipeline::{PipelineReport, run_pipeline};
use crawler_synth::sandbox::{CrawlerExecutor, SandboxExecutor, SandboxSettings, TestExecutionResult, cleanup_stale_workspaces};
use crawler_synth::vlm::{VlmClient, VlmConfig, VlmProgress, check_health};
use crawler_synth::{BoardAnalysis, analyze_board_structure};

/// crawler-synth - Synthesize and verify job-board crawlers with a vision model
#[derive(Parser, Debug)]
#[command(
    name = "crawler-synth",
    about = "Capture a job board, analyze its structure, generate a crawler and test it in a sandbox",
    after_help = "ENVIRONMENT VARIABLES:\n\
        CRAWLER_SYNTH_VLM_ENDPOINT        Chat completions endpoint URL\n\
        CRAWLER_SYNTH_VLM_MODEL           Model name\n\
        CRAWLER_SYNTH_VLM_API_KEY         Bearer token for the endpoint\n\
        CRAWLER_SYNTH_VLM_TIMEOUT         Streaming activity timeout (s)\n\
        CRAWLER_SYNTH_SANDBOX_DIR         Scratch root for sandbox runs\n\
        CRAWLER_SYNTH_NODE                Runtime for generated crawlers\n\
        CRAWLER_SYNTH_MODULES             Directory containing node_modules/playwright\n\
        CRAWLER_SYNTH_CRAWL_TIMEOUT       Crawl timeout inside the sandbox (s)\n\
        CRAWLER_SYNTH_DETAIL_URL_TEMPLATE Detail URL template for data-id/onclick links\n\
        CRAWLER_SYNTH_MAX_ATTEMPTS        Self-correction attempt budget\n\
        CRAWLER_SYNTH_MIN_CONFIDENCE      Analyses below this are not generated\n\
        CRAWLER_SYNTH_REVIEW_CONFIDENCE   Analyses below this are flagged for review\n\
        CRAWLER_SYNTH_HEADLESS            Run browsers headless\n\
        RUST_LOG                          Log filter (default: info)"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture list and detail pages of a board
    Capture {
        /// Board list page URL
        #[arg(short, long)]
        url: String,

        /// Serve canned HTML instead of launching Chrome, as URL=FILE (repeatable)
        #[arg(long, value_name = "URL=FILE")]
        fixture: Vec<String>,

        /// Write the capture JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Analyze a saved capture with the vision model
    Analyze {
        /// Capture JSON produced by `capture`
        #[arg(short, long)]
        capture: PathBuf,

        /// VLM endpoint URL
        #[arg(long, env = "CRAWLER_SYNTH_VLM_ENDPOINT")]
        vlm_endpoint: Option<String>,

        /// VLM model name
        #[arg(long, env = "CRAWLER_SYNTH_VLM_MODEL")]
        vlm_model: Option<String>,

        /// Write the analysis JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a crawler module from a saved analysis
    Generate {
        /// Analysis JSON produced by `analyze`
        #[arg(short, long)]
        analysis: PathBuf,

        /// Board name (default: derived from --url, else "board")
        #[arg(short, long)]
        name: Option<String>,

        /// Directory the module is written to
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// List page HTML to preview the extraction against
        #[arg(long, requires = "url")]
        preview_html: Option<PathBuf>,

        /// Board URL, used to resolve links in the preview
        #[arg(short, long)]
        url: Option<String>,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Test-run a crawler module in the sandbox
    Test {
        /// Crawler module to run
        #[arg(short, long)]
        code: PathBuf,

        /// Board list page URL
        #[arg(short, long)]
        url: String,

        /// Board name (default: derived from the URL)
        #[arg(short, long)]
        name: Option<String>,

        #[command(flatten)]
        sandbox: SandboxArgs,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Capture, analyze, generate, test and correct a crawler for one board
    Run {
        /// Board list page URL
        #[arg(short, long)]
        url: String,

        /// Board name (default: derived from the URL)
        #[arg(short, long)]
        name: Option<String>,

        /// Serve canned HTML instead of launching Chrome, as URL=FILE (repeatable)
        #[arg(long, value_name = "URL=FILE")]
        fixture: Vec<String>,

        /// Self-correction attempt budget
        #[arg(long, env = "CRAWLER_SYNTH_MAX_ATTEMPTS")]
        max_attempts: Option<u32>,

        /// Analyses below this confidence are not generated
        #[arg(long, env = "CRAWLER_SYNTH_MIN_CONFIDENCE")]
        min_confidence: Option<f64>,

        /// VLM endpoint URL
        #[arg(long, env = "CRAWLER_SYNTH_VLM_ENDPOINT")]
        vlm_endpoint: Option<String>,

        /// VLM model name
        #[arg(long, env = "CRAWLER_SYNTH_VLM_MODEL")]
        vlm_model: Option<String>,

        #[command(flatten)]
        sandbox: SandboxArgs,

        /// Directory for the report and the final crawler module
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check whether the VLM endpoint accepts connections
    Health {
        /// VLM endpoint URL
        #[arg(long, env = "CRAWLER_SYNTH_VLM_ENDPOINT")]
        vlm_endpoint: Option<String>,

        /// Connection timeout in seconds
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },

    /// Remove sandbox workspaces left behind by killed runs
    Clean {
        /// Sandbox root (default: CRAWLER_SYNTH_SANDBOX_DIR or {tmp}/crawler-synth)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Only remove workspaces older than this many hours
        #[arg(long, default_value = "24")]
        max_age_hours: u64,
    },
}

/// Sandbox flags shared by `test` and `run`
#[derive(clap::Args, Debug)]
struct SandboxArgs {
    /// Crawl timeout inside the sandbox (seconds)
    #[arg(long, env = "CRAWLER_SYNTH_CRAWL_TIMEOUT")]
    crawl_timeout: Option<u64>,

    /// Directory containing node_modules/playwright
    #[arg(long, env = "CRAWLER_SYNTH_MODULES")]
    modules_dir: Option<PathBuf>,

    /// Keep sandbox workspaces after the run
    #[arg(long, short = 'k')]
    keep: bool,

    #[command(flatten)]
    overrides: OverrideArgs,
}

impl SandboxArgs {
    fn settings(&self, config: &Config) -> SandboxSettings {
        let mut settings = config.sandbox_settings();
        if let Some(secs) = self.crawl_timeout {
            settings.crawl_timeout = Duration::from_secs(secs);
        }
        settings.modules_dir = self.modules_dir.clone();
        settings.keep_workspace = self.keep;
        settings.detail_url_template = self.overrides.detail_url_template.clone();
        settings.selector_overrides = self.overrides.selectors();
        settings
    }
}

/// Per-run adjustments handed to the crawler through its config
#[derive(clap::Args, Debug)]
struct OverrideArgs {
    /// Detail URL template with {origin} and {id}, for data-id and onclick links
    #[arg(long, env = "CRAWLER_SYNTH_DETAIL_URL_TEMPLATE")]
    detail_url_template: Option<String>,

    /// Selector tried first for a role, as ROLE=SELECTOR (repeatable).
    /// Roles: container, row, title, date, content, attachment, detailTitle
    #[arg(long = "selector", value_name = "ROLE=SELECTOR", value_parser = parse_selector_override)]
    selector: Vec<(String, String)>,
}

impl OverrideArgs {
    fn selectors(&self) -> HashMap<String, String> {
        self.selector.iter().cloned().collect()
    }

    fn template(&self) -> &str {
        self.detail_url_template.as_deref().unwrap_or(DEFAULT_DETAIL_URL_TEMPLATE)
    }
}

fn parse_selector_override(value: &str) -> Result<(String, String), String> {
    let (role, selector) = value
        .split_once('=')
        .ok_or_else(|| format!("'{}' is not ROLE=SELECTOR", value))?;
    let role = SelectorRole::from_key(role.trim()).ok_or_else(|| format!("unknown selector role '{}'", role))?;
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(format!("empty selector for role '{}'", role.key()));
    }
    Ok((role.key().to_string(), selector.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = config::get();

    match args.command {
        Some(Commands::Capture { url, fixture, output }) => {
            let mut page = open_page(&fixture, config).await?;
            let captured = capture_board_data(page.as_mut(), &url, &config.capture_settings()).await;
            close_page(page.as_mut()).await;
            let captured = captured?;

            write_json(&captured, output.as_deref())?;
            if let Some(path) = &output {
                println!("Captured {}: {}", url, path.display());
                println!(
                    "  List HTML: {} bytes, detail HTML: {} bytes",
                    captured.list_page_html.len(),
                    captured.detail_page_html.len()
                );
                if let Some(detail) = &captured.detail_page_url {
                    println!("  Detail page: {}", detail);
                }
            }
        }

        Some(Commands::Analyze {
            capture,
            vlm_endpoint,
            vlm_model,
            output,
        }) => {
            let captured: CapturedBoardData = read_json(&capture)?;
            let client = vlm_client(vlm_config(config, vlm_endpoint, vlm_model))?;
            let analysis = analyze_board_structure(&client, &captured, &config.analyzer_settings()).await?;

            write_json(&analysis, output.as_deref())?;
            if let Some(path) = &output {
                println!(
                    "Analysis saved: {} (pattern {}, confidence {:.2})",
                    path.display(),
                    analysis.most_similar_pattern,
                    analysis.confidence
                );
            }
        }

        Some(Commands::Generate {
            analysis,
            name,
            output,
            preview_html,
            url,
            overrides,
        }) => {
            let analysis: BoardAnalysis = read_json(&analysis)?;
            let name = board_name(name, url.as_deref());
            let generated = generate_crawler_code(&analysis, &name)?;

            std::fs::create_dir_all(&output)?;
            let path = output.join(&generated.filename);
            std::fs::write(&path, &generated.code)?;
            println!("Generated crawler: {}", path.display());

            if let (Some(html_path), Some(url)) = (preview_html, url) {
                let html = std::fs::read_to_string(&html_path)?;
                let base = url::Url::parse(&url)?;
                let plan = CrawlPlan::with_overrides(&analysis, &overrides.selectors())?;
                let rows = plan.preview(&html, &base, overrides.template());
                println!("\nPreview ({} rows):", rows.len());
                for row in rows.iter().take(10) {
                    println!(
                        "  {} | {} | {}",
                        row.title,
                        row.date,
                        row.link.as_deref().unwrap_or("-")
                    );
                }
            }
        }

        Some(Commands::Test {
            code,
            url,
            name,
            sandbox,
            json,
        }) => {
            let source = std::fs::read_to_string(&code)?;
            let name = board_name(name, Some(url.as_str()));
            let executor = SandboxExecutor::new(sandbox.settings(config));
            let result = executor.execute(&source, &url, &name).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_test_result(&result);
            }
            if !result.success {
                return Err(format!("crawler test failed with {} error(s)", result.errors.len()).into());
            }
        }

        Some(Commands::Run {
            url,
            name,
            fixture,
            max_attempts,
            min_confidence,
            vlm_endpoint,
            vlm_model,
            sandbox,
            output,
            json,
        }) => {
            let name = board_name(name, Some(url.as_str()));

            let mut settings = config.pipeline_settings();
            if let Some(attempts) = max_attempts {
                settings.max_attempts = attempts;
            }
            if let Some(minimum) = min_confidence {
                settings.min_confidence = minimum;
            }

            let client = vlm_client(vlm_config(config, vlm_endpoint, vlm_model))?;
            let executor = SandboxExecutor::new(sandbox.settings(config));

            let mut page = open_page(&fixture, config).await?;
            let report = run_pipeline(page.as_mut(), &client, &executor, &url, &name, &settings).await;
            close_page(page.as_mut()).await;
            let report = report?;

            if let Some(dir) = &output {
                save_report(&report, dir)?;
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report, output.as_deref());
            }
            if !report.success {
                return Err(format!("no working crawler for {} (stage: {:?})", name, report.stage).into());
            }
        }

        Some(Commands::Health { vlm_endpoint, timeout }) => {
            let endpoint = vlm_endpoint.unwrap_or_else(|| config.vlm.endpoint.clone());
            match check_health(&endpoint, timeout).await {
                Ok(true) => println!("VLM endpoint responding: {}", endpoint),
                Ok(false) => return Err(format!("VLM endpoint not responding at {}", endpoint).into()),
                Err(e) => return Err(format!("VLM health check failed for {}: {}", endpoint, e).into()),
            }
        }

        Some(Commands::Clean { dir, max_age_hours }) => {
            let dir = dir.unwrap_or_else(config::sandbox_base_dir);
            let removed = cleanup_stale_workspaces(&dir, Duration::from_secs(max_age_hours * 3600))?;
            println!("Removed {} stale workspace(s) from {}", removed, dir.display());
        }

        None => {
            println!("crawler-synth - Synthesize and verify job-board crawlers");
            println!();
            println!("Usage: crawler-synth <COMMAND>");
            println!();
            println!("Commands:");
            println!("  capture   Capture list and detail pages of a board");
            println!("  analyze   Analyze a saved capture with the vision model");
            println!("  generate  Generate a crawler module from a saved analysis");
            println!("  test      Test-run a crawler module in the sandbox");
            println!("  run       Full pipeline with self-correction");
            println!("  health    Check the VLM endpoint");
            println!("  clean     Remove stale sandbox workspaces");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

/// Chrome, or a fixture page when any `URL=FILE` pairs were given
async fn open_page(fixtures: &[String], config: &Config) -> Result<Box<dyn PageBackend>, Box<dyn Error>> {
    if fixtures.is_empty() {
        return Ok(Box::new(ChromeBackend::launch(&config.browser_settings()).await?));
    }

    let mut page = FixturePage::new();
    for pair in fixtures {
        let (url, file) = pair
            .rsplit_once('=')
            .ok_or_else(|| format!("Invalid fixture '{}'. Use URL=FILE", pair))?;
        page = page.with_page(url, std::fs::read_to_string(file)?);
    }
    info!(pages = fixtures.len(), "using fixture pages");
    Ok(Box::new(page))
}

async fn close_page(page: &mut dyn PageBackend) {
    if let Err(e) = page.close().await {
        warn!("closing {} page failed: {}", page.source_type(), e);
    }
}

fn vlm_config(config: &Config, endpoint: Option<String>, model: Option<String>) -> VlmConfig {
    let mut vlm = config.vlm_config();
    if let Some(endpoint) = endpoint {
        vlm.endpoint = endpoint;
    }
    if let Some(model) = model {
        vlm.model = model;
    }
    vlm
}

/// Client that streams inference progress to stderr when it is a terminal
fn vlm_client(config: VlmConfig) -> Result<VlmClient, Box<dyn Error>> {
    let client = VlmClient::new(config)?;
    if std::io::stderr().is_terminal() {
        Ok(client.on_progress(show_progress))
    } else {
        Ok(client)
    }
}

fn show_progress(progress: VlmProgress) {
    match progress {
        VlmProgress::Connected => eprint!("  Waiting for model output..."),
        VlmProgress::Receiving(content) => eprint!("\r  Receiving: {} chars   ", content.chars().count()),
        VlmProgress::Complete(content) => eprintln!("\r  Model response: {} chars   ", content.chars().count()),
        VlmProgress::Error(e) => eprintln!("\r  Model error: {}", e),
    }
}

/// Explicit name, else the URL host, else "board"
fn board_name(name: Option<String>, url: Option<&str>) -> String {
    name.filter(|n| !n.trim().is_empty())
        .or_else(|| {
            url.and_then(|u| url::Url::parse(u).ok())
                .and_then(|u| u.host_str().map(slugify))
        })
        .unwrap_or_else(|| "board".to_string())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e).into())
}

/// Pretty JSON to `output`, or stdout when none is given
fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let text = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => std::fs::write(path, text)?,
        None => println!("{}", text),
    }
    Ok(())
}

fn save_report(report: &PipelineReport, dir: &Path) -> Result<(), Box<dyn Error>> {
    std::fs::create_dir_all(dir)?;
    write_json(report, Some(&dir.join("report.json")))?;
    if let (Some(code), Some(generated)) = (&report.final_code, &report.generated) {
        std::fs::write(dir.join(&generated.filename), code)?;
    }
    Ok(())
}

fn print_test_result(result: &TestExecutionResult) {
    let status = if result.success { "PASS" } else { "FAIL" };
    println!(
        "{}: {} job(s) collected in {} ms",
        status, result.jobs_collected, result.execution_time_ms
    );
    if let Some(sample) = &result.sample {
        println!("  Sample: {}", sample.title);
        if let Some(link) = &sample.link {
            println!("    {}", link);
        }
    }
    for error in &result.errors {
        println!("  {}", error);
    }
}

fn print_report(report: &PipelineReport, output: Option<&Path>) {
    println!(
        "{} ({}): stage {:?}, pattern {} at confidence {:.2}",
        report.board_name,
        report.board_url,
        report.stage,
        report.analysis.most_similar_pattern,
        report.analysis.confidence
    );
    if report.needs_review {
        println!("  Flagged for review: confidence below threshold");
    }
    if let Some(initial) = &report.initial_test {
        print!("  Initial test: ");
        print_test_result(initial);
    }
    if let Some(correction) = &report.correction {
        println!(
            "  Self-correction: {} after {} attempt(s)",
            if correction.success { "succeeded" } else { "exhausted" },
            correction.attempt_count
        );
        for error in &correction.errors {
            println!("    {}", error);
        }
    }
    if let Some(dir) = output {
        println!("\nArtifacts: {}", dir.display());
    }
    println!("Elapsed: {} ms", report.elapsed_ms);
}
