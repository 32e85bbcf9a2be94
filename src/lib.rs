//! crawler-synth - AI-assisted synthesis of job-board crawlers.
//!
//! This crate provides:
//! - Board capture through headless Chrome (or canned fixture pages)
//! - Vision-model analysis of board structure against reference patterns
//! - Deterministic generation of Playwright crawler modules
//! - Out-of-process sandbox runs with output validation
//! - A bounded self-correction loop driven by sandbox errors
//!
//! # Example
//!
//! ```rust,no_run
//! use crawler_synth::{ChromeBackend, PageBackend, SandboxExecutor, VlmClient, config, run_pipeline};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = config::get();
//! let mut page = ChromeBackend::launch(&config.browser_settings()).await?;
//! let client = VlmClient::new(config.vlm_config())?;
//! let executor = SandboxExecutor::new(config.sandbox_settings());
//!
//! let report = run_pipeline(
//!     &mut page,
//!     &client,
//!     &executor,
//!     "https://jobs.example.org/board/list",
//!     "example-jobs",
//!     &config.pipeline_settings(),
//! )
//! .await?;
//! page.close().await?;
//! println!("{:?}: {}", report.stage, report.success);
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod browser;
pub mod capture;
pub mod codegen;
pub mod config;
pub mod correction;
pub mod extract;
pub mod pipeline;
pub mod sandbox;
pub mod vlm;

// Re-export capture types
pub use browser::{BrowserError, BrowserSettings, ChromeBackend, FixturePage, PageBackend};
pub use capture::{CaptureError, CaptureSettings, CapturedBoardData, capture_board_data};

// Re-export analysis types
pub use analyzer::{
    AnalysisError, AnalyzerSettings, BoardAnalysis, BoardPattern, LinkMethod, PaginationType,
    analyze_board_structure,
};

// Re-export generation
pub use codegen::{CrawlPlan, GenerateError, GeneratedCode, generate_crawler_code};

// Re-export sandbox execution
pub use sandbox::{
    CrawlerError, CrawlerExecutor, ErrorStep, JobRecord, SandboxExecutor, SandboxSettings,
    TestExecutionResult, cleanup_stale_workspaces, execute_generated_crawler,
};

// Re-export correction and orchestration
pub use correction::{CorrectionRequest, CorrectionResult, run_self_correction_loop};
pub use pipeline::{PipelineError, PipelineReport, PipelineSettings, PipelineStage, run_pipeline};

// Re-export VLM client
pub use vlm::{InferenceClient, ProgressHandler, VlmClient, VlmConfig, VlmError, VlmProgress, VlmResult, check_health};
