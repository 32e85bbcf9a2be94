//! Crawler code generation.
//!
//! Renders a [`BoardAnalysis`] into a standalone ES module exporting
//! `async function crawl(page, config)`. Rendering is deterministic: the
//! same analysis and board name always give the same module.

pub mod plan;
pub mod selectors;
mod template;

use serde_json::json;
use tracing::info;

use crate::analyzer::BoardAnalysis;

pub use plan::{CrawlPlan, DEFAULT_DETAIL_URL_TEMPLATE, PreviewRow, detail_url};
pub use selectors::{ChainMatch, SelectorChain, SelectorRole};

/// A rendered crawler module
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GeneratedCode {
    pub filename: String,
    pub code: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("invalid analysis: {0}")]
    InvalidAnalysis(String),
}

/// Render the crawler module for `board_name` from `analysis`.
pub fn generate_crawler_code(
    analysis: &BoardAnalysis,
    board_name: &str,
) -> Result<GeneratedCode, GenerateError> {
    let board_name = board_name.trim();
    if board_name.is_empty() {
        return Err(GenerateError::InvalidAnalysis("board name is empty".to_string()));
    }
    let plan = CrawlPlan::from_analysis(analysis)?;

    let code = render(&plan, analysis, board_name);
    let filename = format!("{}_crawler.mjs", slugify(board_name));

    info!(
        board = board_name,
        filename = %filename,
        pattern = %analysis.most_similar_pattern,
        bytes = code.len(),
        "crawler code generated"
    );
    Ok(GeneratedCode { filename, code })
}

fn render(plan: &CrawlPlan, analysis: &BoardAnalysis, board_name: &str) -> String {
    let board = json!({
        "name": board_name,
        "pattern": analysis.most_similar_pattern.label(),
        "confidence": analysis.confidence,
    });
    let link = json!({
        "method": plan.link_method.as_str(),
        "attribute": plan.link_attribute,
        "regex": plan.link_regex,
    });
    let selectors = plan
        .chains()
        .iter()
        .map(|chain| format!("  {}: {},", chain.role().key(), chain.to_js_array()))
        .collect::<Vec<_>>()
        .join("\n");

    fill(
        template::CRAWLER_TEMPLATE,
        &[
            ("BOARD", board.to_string()),
            ("SELECTORS", selectors),
            ("LINK", link.to_string()),
            ("PAGINATION", json!(plan.pagination.as_str()).to_string()),
            ("DETAIL_TEMPLATE", json!(DEFAULT_DETAIL_URL_TEMPLATE).to_string()),
        ],
    )
}

/// Single-pass placeholder substitution; inserted values are never
/// rescanned, so model-supplied text cannot inject placeholders.
fn fill(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len() + 1024);
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let value = after.find("}}").and_then(|end| {
            values
                .iter()
                .find(|(key, _)| *key == &after[..end])
                .map(|(_, value)| (end, value))
        });
        match value {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Lowercased file-safe stem: alphanumerics kept, everything else folded
/// into single underscores
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "board".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{
        BoardPattern, DetailPageStructure, LinkExtraction, LinkMethod, ListPageStructure,
        PaginationType,
    };

    fn analysis() -> BoardAnalysis {
        BoardAnalysis {
            most_similar_pattern: BoardPattern::A,
            confidence: 0.75,
            list_page: ListPageStructure {
                container_selector: "table.bbs".to_string(),
                row_selector: "tbody tr".to_string(),
                title_selector: "td.subject a".to_string(),
                date_selector: "td.date".to_string(),
                link_extraction: LinkExtraction {
                    method: LinkMethod::Onclick,
                    attribute: None,
                    regex: Some(r#"fnView\("(\d+)"\)"#.to_string()),
                },
                pagination_type: PaginationType::Post,
            },
            detail_page: DetailPageStructure {
                content_selector: "div.bbs-view".to_string(),
                attachment_selector: String::new(),
                title_selector: "h3".to_string(),
            },
            reasoning: "onclick handlers".to_string(),
        }
    }

    #[test]
    fn test_module_shape() {
        let generated = generate_crawler_code(&analysis(), "Seoul Jobs").unwrap();
        assert_eq!(generated.filename, "seoul_jobs_crawler.mjs");
        assert!(generated.code.contains("export async function crawl(page, config)"));
        assert_eq!(generated.code.matches("export ").count(), 1);
        assert!(!generated.code.contains("{{"));
        assert!(generated.code.contains("const SELECTORS = {\n  container: "));
    }

    #[test]
    fn test_selector_table_embeds_primary_then_fallbacks() {
        let code = generate_crawler_code(&analysis(), "seoul").unwrap().code;
        assert!(code.contains(r#"  title: ["td.subject a","td.title a",".title a",".subject a","td a","a"],"#));
        assert!(code.contains(r#"  container: ["table.bbs","table.board-list",".board_list",".tbl_list","table"],"#));
        // empty attachment primary leaves only the generics
        assert!(code.contains(r#"  attachment: [".file a",".attach a","a[href*='download']"],"#));
    }

    #[test]
    fn test_detail_title_chain_is_queried() {
        let code = generate_crawler_code(&analysis(), "seoul").unwrap().code;
        assert!(code.contains(r#"  detailTitle: ["h3",".view-title",".view_tit","h1","h2"],"#));
        assert!(code.contains(r#"queryOne(page, config, "detailTitle")"#));
    }

    fn literal(code: &str, name: &str) -> serde_json::Value {
        let prefix = format!("const {} = ", name);
        let line = code
            .lines()
            .find(|l| l.starts_with(&prefix))
            .unwrap_or_else(|| panic!("{} not found", name));
        serde_json::from_str(line[prefix.len()..].trim_end_matches(';')).unwrap()
    }

    #[test]
    fn test_link_and_pagination_literals() {
        let code = generate_crawler_code(&analysis(), "seoul").unwrap().code;
        assert_eq!(
            literal(&code, "LINK"),
            json!({ "method": "onclick", "attribute": "onclick", "regex": r#"fnView\("(\d+)"\)"# })
        );
        assert_eq!(literal(&code, "PAGINATION"), json!("POST"));
        assert_eq!(
            literal(&code, "DEFAULT_DETAIL_URL_TEMPLATE"),
            json!("{origin}/board/view?id={id}")
        );
    }

    #[test]
    fn test_board_name_is_escaped() {
        let code = generate_crawler_code(&analysis(), "Quote \" and\nnewline").unwrap().code;
        let board = literal(&code, "BOARD");
        assert_eq!(board["name"], "Quote \" and\nnewline");
        assert_eq!(board["pattern"], "A");
    }

    #[test]
    fn test_placeholders_in_values_are_not_expanded() {
        let code = generate_crawler_code(&analysis(), "{{LINK}}").unwrap().code;
        assert_eq!(literal(&code, "BOARD")["name"], "{{LINK}}");
    }

    #[test]
    fn test_deterministic() {
        let a = generate_crawler_code(&analysis(), "board").unwrap();
        let b = generate_crawler_code(&analysis(), "board").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(matches!(
            generate_crawler_code(&analysis(), "  "),
            Err(GenerateError::InvalidAnalysis(_))
        ));

        let mut no_title = analysis();
        no_title.list_page.title_selector.clear();
        assert!(generate_crawler_code(&no_title, "board").is_err());

        let mut bad_regex = analysis();
        bad_regex.list_page.link_extraction.regex = Some("fnView(".to_string());
        let err = generate_crawler_code(&bad_regex, "board").unwrap_err();
        assert!(err.to_string().contains("does not compile"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Seoul City / Jobs!"), "seoul_city_jobs");
        assert_eq!(slugify("서울시 채용"), "서울시_채용");
        assert_eq!(slugify("***"), "board");
    }
}
