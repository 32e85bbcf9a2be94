use serde::{Deserialize, Deserializer, Serialize};

use crate::vlm::VlmError;

/// Reference board archetypes the model classifies against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardPattern {
    /// POST list form, detail id pulled out of an `onclick` handler by regex
    #[serde(alias = "a")]
    A,
    /// GET list, detail id in a `data-id` attribute
    #[serde(alias = "b")]
    B,
    /// GET list, `data-id` attribute with an `href` fallback
    #[serde(alias = "c")]
    C,
}

impl BoardPattern {
    pub const ALL: [BoardPattern; 3] = [BoardPattern::A, BoardPattern::B, BoardPattern::C];

    pub fn label(self) -> &'static str {
        match self {
            BoardPattern::A => "A",
            BoardPattern::B => "B",
            BoardPattern::C => "C",
        }
    }

    /// Distinguishing traits, as shown to the model
    pub fn traits(self) -> &'static str {
        match self {
            BoardPattern::A => {
                "POST-submitted list form; rows open details through an onclick handler \
                 such as goView('123'); the detail id is extracted from onclick with a regex; \
                 pagination re-submits the form with a page field."
            }
            BoardPattern::B => {
                "GET list with page number in the query string; every row carries a data-id \
                 attribute; the detail URL is built from that id."
            }
            BoardPattern::C => {
                "GET list like B, but title anchors also carry a real href; use data-id when \
                 present and fall back to the anchor href."
            }
        }
    }
}

impl std::fmt::Display for BoardPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How a row's detail link is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkMethod {
    #[serde(rename = "data-id", alias = "data_id", alias = "dataId")]
    DataId,
    #[serde(rename = "href")]
    Href,
    #[serde(rename = "onclick", alias = "onClick")]
    Onclick,
}

impl LinkMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkMethod::DataId => "data-id",
            LinkMethod::Href => "href",
            LinkMethod::Onclick => "onclick",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaginationType {
    #[default]
    #[serde(rename = "query", alias = "QUERY", alias = "get", alias = "GET")]
    Query,
    #[serde(rename = "POST", alias = "post")]
    Post,
    #[serde(rename = "button", alias = "BUTTON")]
    Button,
}

impl PaginationType {
    pub fn as_str(self) -> &'static str {
        match self {
            PaginationType::Query => "query",
            PaginationType::Post => "POST",
            PaginationType::Button => "button",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkExtraction {
    pub method: LinkMethod,
    /// Attribute holding the id or URL; defaults per method when absent
    #[serde(default, deserialize_with = "empty_as_none")]
    pub attribute: Option<String>,
    /// Regex with one capture group, for `onclick`
    #[serde(default, deserialize_with = "empty_as_none")]
    pub regex: Option<String>,
}

impl LinkExtraction {
    /// Attribute to read, falling back to the method's natural one
    pub fn effective_attribute(&self) -> &str {
        match (&self.attribute, self.method) {
            (Some(attr), _) => attr,
            (None, LinkMethod::DataId) => "data-id",
            (None, LinkMethod::Href) => "href",
            (None, LinkMethod::Onclick) => "onclick",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPageStructure {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub container_selector: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub row_selector: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title_selector: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub date_selector: String,
    pub link_extraction: LinkExtraction,
    #[serde(default)]
    pub pagination_type: PaginationType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailPageStructure {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content_selector: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub attachment_selector: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title_selector: String,
}

/// The inferred crawling strategy for one board.
///
/// `confidence` is advisory: check it before trusting
/// `most_similar_pattern`. Gating is the pipeline's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardAnalysis {
    pub most_similar_pattern: BoardPattern,
    pub confidence: f64,
    pub list_page: ListPageStructure,
    #[serde(default)]
    pub detail_page: DetailPageStructure,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub reasoning: String,
}

impl BoardAnalysis {
    /// Clamp confidence into [0, 1] and trim selector whitespace
    pub(crate) fn normalize(mut self) -> Self {
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        for selector in [
            &mut self.list_page.container_selector,
            &mut self.list_page.row_selector,
            &mut self.list_page.title_selector,
            &mut self.list_page.date_selector,
            &mut self.detail_page.content_selector,
            &mut self.detail_page.attachment_selector,
            &mut self.detail_page.title_selector,
        ] {
            let trimmed = selector.trim();
            if trimmed.len() != selector.len() {
                *selector = trimmed.to_string();
            }
        }
        self
    }
}

/// Why an analysis failed
#[derive(Debug, thiserror::Error)]
pub enum AnalysisErrorKind {
    #[error("inference failed: {0}")]
    Inference(#[from] VlmError),

    #[error("no JSON found in model response")]
    NoJson,

    #[error("model JSON does not match the analysis schema: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// A failed analysis of one board
#[derive(Debug, thiserror::Error)]
#[error("analysis of {url} failed: {kind}")]
pub struct AnalysisError {
    pub url: String,
    #[source]
    pub kind: AnalysisErrorKind,
}

impl AnalysisError {
    pub fn new(url: impl Into<String>, kind: AnalysisErrorKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}
