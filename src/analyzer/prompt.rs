use crate::capture::CapturedBoardData;
use crate::extract::truncate_chars;

use super::types::BoardPattern;

const OUTPUT_SCHEMA: &str = r#"{
  "mostSimilarPattern": "A" | "B" | "C",
  "confidence": 0.0-1.0,
  "listPage": {
    "containerSelector": "CSS selector of the element wrapping all rows",
    "rowSelector": "CSS selector of one posting row",
    "titleSelector": "CSS selector of the title inside a row",
    "dateSelector": "CSS selector of the posting date inside a row",
    "linkExtraction": {
      "method": "data-id" | "href" | "onclick",
      "attribute": "attribute holding the id or URL",
      "regex": "regex with one capture group for the id (onclick only, else null)"
    },
    "paginationType": "query" | "POST" | "button"
  },
  "detailPage": {
    "contentSelector": "CSS selector of the posting body",
    "attachmentSelector": "CSS selector of attachment links",
    "titleSelector": "CSS selector of the detail title"
  },
  "reasoning": "one or two sentences"
}"#;

/// Build the structure analysis prompt for a capture.
///
/// HTML samples are cut to `list_limit` / `detail_limit` characters.
pub fn build_analysis_prompt(data: &CapturedBoardData, list_limit: usize, detail_limit: usize) -> String {
    let mut prompt = String::with_capacity(list_limit + detail_limit + 4096);

    prompt.push_str(
        "You are analyzing the structure of a job posting board so that a crawler can be \
         generated for it.\n\n",
    );
    prompt.push_str(&format!("Board URL: {}\n\n", data.board_url));

    prompt.push_str("## Known board patterns\n\n");
    for pattern in BoardPattern::ALL {
        prompt.push_str(&format!("- Pattern {}: {}\n", pattern.label(), pattern.traits()));
    }

    prompt.push_str("\n## List page HTML (truncated)\n\n```html\n");
    prompt.push_str(truncate_chars(&data.list_page_html, list_limit));
    prompt.push_str("\n```\n\n");

    if data.has_detail() {
        prompt.push_str("## Detail page HTML (truncated)\n\n```html\n");
        prompt.push_str(truncate_chars(&data.detail_page_html, detail_limit));
        prompt.push_str("\n```\n\n");
    } else {
        prompt.push_str(
            "## Detail page\n\nNo detail page could be captured. Infer detail selectors from \
             common board conventions and lower your confidence accordingly.\n\n",
        );
    }

    prompt.push_str(
        "## Task\n\n\
         1. Decide which known pattern this board is most similar to.\n\
         2. Give CSS selectors for each role, as specific as the markup allows.\n\
         3. Say how a row's detail link is obtained and how pagination works.\n\n\
         ## Output format\n\n\
         Respond with JSON only, no prose, matching this schema:\n\n",
    );
    prompt.push_str(OUTPUT_SCHEMA);
    prompt.push('\n');

    prompt
}
