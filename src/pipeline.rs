//! End-to-end synthesis for one board.
//!
//! capture → analyze → gate → generate → test → (on failure) correct.
//! Stages run strictly in order. Failures before a crawler exists are
//! returned as [`PipelineError`]; everything after is reported in the
//! [`PipelineReport`].

use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::analyzer::{self, AnalysisError, AnalyzerSettings, BoardAnalysis};
use crate::browser::PageBackend;
use crate::capture::{self, CaptureError, CaptureSettings};
use crate::codegen::{self, GenerateError, GeneratedCode};
use crate::correction::{self, CorrectionRequest, CorrectionResult};
use crate::sandbox::{CrawlerExecutor, TestExecutionResult};
use crate::vlm::InferenceClient;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub capture: CaptureSettings,
    pub analyzer: AnalyzerSettings,
    /// Self-correction budget; 0 disables repair
    pub max_attempts: u32,
    /// Analyses below this are not turned into crawlers
    pub min_confidence: f64,
    /// Analyses below this are flagged for human review
    pub review_confidence: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            analyzer: AnalyzerSettings::default(),
            max_attempts: crate::config::DEFAULT_MAX_ATTEMPTS,
            min_confidence: crate::config::DEFAULT_MIN_CONFIDENCE,
            review_confidence: crate::config::DEFAULT_REVIEW_CONFIDENCE,
        }
    }
}

/// Where a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Confidence below the configured minimum; nothing generated
    Gated,
    /// The generated crawler passed its first test run
    Tested,
    /// A repaired crawler passed
    Corrected,
    /// Every repair attempt failed
    Exhausted,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Generate(#[from] GenerateError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub board_name: String,
    pub board_url: String,
    pub stage: PipelineStage,
    pub success: bool,
    /// Confidence fell below the review threshold
    pub needs_review: bool,
    pub analysis: BoardAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated: Option<GeneratedCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_test: Option<TestExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correction: Option<CorrectionResult>,
    /// Code that passed the sandbox, when any did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_code: Option<String>,
    pub elapsed_ms: u64,
}

/// Synthesize and verify a crawler for `board_url`.
pub async fn run_pipeline(
    page: &mut dyn PageBackend,
    client: &dyn InferenceClient,
    executor: &dyn CrawlerExecutor,
    board_url: &str,
    board_name: &str,
    settings: &PipelineSettings,
) -> Result<PipelineReport, PipelineError> {
    let started = Instant::now();
    info!(board = board_name, url = board_url, "pipeline starting");

    let captured = capture::capture_board_data(page, board_url, &settings.capture).await?;
    let analysis = analyzer::analyze_board_structure(client, &captured, &settings.analyzer).await?;

    let needs_review = analysis.confidence < settings.review_confidence;
    if needs_review {
        warn!(
            board = board_name,
            confidence = analysis.confidence,
            threshold = settings.review_confidence,
            "low-confidence analysis, flagging for review"
        );
    }

    let mut report = PipelineReport {
        board_name: board_name.to_string(),
        board_url: board_url.to_string(),
        stage: PipelineStage::Gated,
        success: false,
        needs_review,
        analysis,
        generated: None,
        initial_test: None,
        correction: None,
        final_code: None,
        elapsed_ms: 0,
    };

    if report.analysis.confidence < settings.min_confidence {
        warn!(
            board = board_name,
            confidence = report.analysis.confidence,
            minimum = settings.min_confidence,
            "analysis below minimum confidence, not generating"
        );
        return Ok(finish(report, started));
    }

    let generated = codegen::generate_crawler_code(&report.analysis, board_name)?;
    let initial = executor.execute(&generated.code, board_url, board_name).await;

    if initial.success {
        report.stage = PipelineStage::Tested;
        report.success = true;
        report.final_code = Some(generated.code.clone());
    } else {
        let request = CorrectionRequest::new(
            board_name,
            board_url,
            report.analysis.clone(),
            generated.code.clone(),
            initial.errors.clone(),
        )
        .max_attempts(settings.max_attempts);
        let corrected = correction::run_self_correction_loop(client, executor, &request).await;

        report.success = corrected.success;
        report.stage = if corrected.success {
            PipelineStage::Corrected
        } else {
            PipelineStage::Exhausted
        };
        report.final_code = corrected.final_code.clone();
        report.correction = Some(corrected);
    }

    report.generated = Some(generated);
    report.initial_test = Some(initial);
    Ok(finish(report, started))
}

fn finish(mut report: PipelineReport, started: Instant) -> PipelineReport {
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        board = %report.board_name,
        stage = ?report.stage,
        success = report.success,
        needs_review = report.needs_review,
        elapsed_ms = report.elapsed_ms,
        "pipeline finished"
    );
    report
}
