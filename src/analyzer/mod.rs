//! Structure analysis: classify a captured board against the known
//! patterns and infer its selector set with a multimodal model.

pub mod prompt;
pub mod types;

use base64::Engine;
use tracing::{debug, info, warn};

use crate::capture::CapturedBoardData;
use crate::extract::{ExtractionTier, extract_json};
use crate::vlm::{ImageAttachment, InferenceClient, InferenceRequest};

pub use prompt::build_analysis_prompt;
pub use types::{
    AnalysisError, AnalysisErrorKind, BoardAnalysis, BoardPattern, DetailPageStructure,
    LinkExtraction, LinkMethod, ListPageStructure, PaginationType,
};

/// Decoding and sampling parameters for analysis
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Characters of list HTML forwarded to the model
    pub list_html_limit: usize,
    /// Characters of detail HTML forwarded to the model
    pub detail_html_limit: usize,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            temperature: crate::config::DEFAULT_VLM_TEMPERATURE,
            max_tokens: crate::config::DEFAULT_VLM_MAX_TOKENS,
            list_html_limit: 5000,
            detail_html_limit: 3000,
        }
    }
}

/// Ask the model for the board's crawling strategy.
///
/// Never panics on model output; every failure comes back as an
/// [`AnalysisError`] carrying the board URL.
pub async fn analyze_board_structure(
    client: &dyn InferenceClient,
    data: &CapturedBoardData,
    settings: &AnalyzerSettings,
) -> Result<BoardAnalysis, AnalysisError> {
    info!(url = %data.board_url, "analyzing board structure");

    let prompt = build_analysis_prompt(data, settings.list_html_limit, settings.detail_html_limit);
    let mut request = InferenceRequest::text(prompt)
        .temperature(settings.temperature)
        .max_tokens(settings.max_tokens);

    for (label, screenshot) in [
        ("list", &data.list_page_screenshot),
        ("detail", &data.detail_page_screenshot),
    ] {
        match screenshot {
            Some(encoded) if is_base64_image(encoded) => {
                request = request.image(ImageAttachment::png(encoded.clone()));
            }
            Some(_) => warn!("{} screenshot is not valid base64, sending without it", label),
            None => {}
        }
    }
    debug!(
        prompt_chars = request.prompt.len(),
        images = request.images.len(),
        "sending analysis request"
    );

    let response = client
        .complete(&request)
        .await
        .map_err(|e| AnalysisError::new(&data.board_url, e.into()))?;

    let analysis = parse_analysis(&response).map_err(|kind| {
        warn!(url = %data.board_url, "unusable analysis response: {}", kind);
        AnalysisError::new(&data.board_url, kind)
    })?;

    info!(
        url = %data.board_url,
        pattern = %analysis.most_similar_pattern,
        confidence = analysis.confidence,
        link_method = analysis.list_page.link_extraction.method.as_str(),
        pagination = analysis.list_page.pagination_type.as_str(),
        "analysis complete"
    );
    Ok(analysis)
}

/// Parse a raw model response into a normalized analysis
pub fn parse_analysis(response: &str) -> Result<BoardAnalysis, AnalysisErrorKind> {
    let (json, tier) = extract_json(response).ok_or(AnalysisErrorKind::NoJson)?;
    if tier == ExtractionTier::Bare {
        debug!("analysis JSON recovered without a code fence");
    }
    let analysis: BoardAnalysis = serde_json::from_str(json)?;
    Ok(analysis.normalize())
}

fn is_base64_image(encoded: &str) -> bool {
    !encoded.is_empty()
        && base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .is_ok()
}
