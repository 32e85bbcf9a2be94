//! Board capture: list page and best-effort detail page.
//!
//! The list page is mandatory; failing to load it aborts the run. The detail
//! page only enriches analysis, so any failure there degrades to a
//! list-only capture with a warning.

use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::browser::{BrowserError, PageBackend};

/// Title-anchor selectors tried, in order, when no `data-id` row exists
pub const DETAIL_LINK_SELECTORS: &[&str] = &["td.title a", ".title a", ".cont_tit a"];

/// Timeouts and delays for one capture
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub list_timeout: Duration,
    pub detail_timeout: Duration,
    /// Wait after load so client-side rendering can finish
    pub settle_delay: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            list_timeout: Duration::from_secs(30),
            detail_timeout: Duration::from_secs(20),
            settle_delay: Duration::from_secs(2),
        }
    }
}

/// Snapshot of a board's current rendering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapturedBoardData {
    pub board_url: String,
    pub list_page_html: String,
    pub detail_page_html: String,
    /// Base64 PNG of the list viewport
    pub list_page_screenshot: Option<String>,
    /// Base64 PNG of the detail viewport
    pub detail_page_screenshot: Option<String>,
    /// URL the detail page ended up at, after redirects
    pub detail_page_url: Option<String>,
}

impl CapturedBoardData {
    pub fn has_detail(&self) -> bool {
        !self.detail_page_html.is_empty()
    }
}

/// Errors that abort a capture
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Board URL '{0}' is not a valid absolute URL")]
    InvalidUrl(String),

    #[error("List page {url} could not be captured: {source}")]
    ListPage {
        url: String,
        #[source]
        source: BrowserError,
    },
}

/// Capture list and detail pages of `board_url` through `page`.
pub async fn capture_board_data(
    page: &mut dyn PageBackend,
    board_url: &str,
    settings: &CaptureSettings,
) -> Result<CapturedBoardData, CaptureError> {
    let base = Url::parse(board_url).map_err(|_| CaptureError::InvalidUrl(board_url.to_string()))?;
    info!(url = %board_url, backend = page.source_type(), "capturing list page");

    let list_error = |source| CaptureError::ListPage {
        url: board_url.to_string(),
        source,
    };

    page.goto(board_url, settings.list_timeout).await.map_err(list_error)?;
    tokio::time::sleep(settings.settle_delay).await;

    // relative detail links resolve against where the list actually landed
    let landed = landed_url(page, board_url).await;
    let base = Url::parse(&landed).unwrap_or(base);

    let list_page_html = page.content().await.map_err(list_error)?;
    let list_page_screenshot = capture_screenshot(page, "list").await;

    let mut captured = CapturedBoardData {
        board_url: board_url.to_string(),
        list_page_html,
        detail_page_html: String::new(),
        list_page_screenshot,
        detail_page_screenshot: None,
        detail_page_url: None,
    };

    let detail_url = match find_detail_url(page, &base).await {
        Some(url) => url,
        None => {
            warn!(url = %board_url, "no detail link found, continuing with list page only");
            log_capture(&captured);
            return Ok(captured);
        }
    };

    info!(detail = %detail_url, "capturing detail page");
    match capture_detail(page, &detail_url, settings).await {
        Ok((html, screenshot)) => {
            captured.detail_page_html = html;
            captured.detail_page_screenshot = screenshot;
            captured.detail_page_url = Some(landed_url(page, &detail_url).await);
        }
        Err(e) => {
            warn!(detail = %detail_url, "detail page capture failed, continuing with list page only: {}", e);
        }
    }

    log_capture(&captured);
    Ok(captured)
}

async fn capture_detail(
    page: &mut dyn PageBackend,
    detail_url: &str,
    settings: &CaptureSettings,
) -> Result<(String, Option<String>), BrowserError> {
    page.goto(detail_url, settings.detail_timeout).await?;
    tokio::time::sleep(settings.settle_delay).await;
    let html = page.content().await?;
    let screenshot = capture_screenshot(page, "detail").await;
    Ok((html, screenshot))
}

/// Current document URL, or `requested` when the backend cannot tell
async fn landed_url(page: &mut dyn PageBackend, requested: &str) -> String {
    match page.current_url().await {
        Ok(Some(url)) if !url.is_empty() && url != "about:blank" => url,
        Ok(_) => requested.to_string(),
        Err(e) => {
            warn!("current URL lookup failed: {}", e);
            requested.to_string()
        }
    }
}

/// Viewport screenshot as base64; failures only cost the image.
async fn capture_screenshot(page: &mut dyn PageBackend, label: &str) -> Option<String> {
    match page.screenshot().await {
        Ok(png) => Some(base64::engine::general_purpose::STANDARD.encode(png)),
        Err(e) => {
            warn!("{} screenshot failed: {}", label, e);
            None
        }
    }
}

/// Locate the first detail link: a `data-id` row first, then title anchors.
async fn find_detail_url(page: &mut dyn PageBackend, base: &Url) -> Option<String> {
    match page.first_attribute("[data-id]", "data-id").await {
        Ok(Some(id)) if !id.trim().is_empty() => {
            return Some(data_id_detail_url(base, id.trim()));
        }
        Ok(_) => {}
        Err(e) => warn!("data-id lookup failed: {}", e),
    }

    for selector in DETAIL_LINK_SELECTORS {
        match page.first_attribute(selector, "href").await {
            Ok(Some(href)) => {
                if let Some(url) = resolve_href(base, &href) {
                    return Some(url);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(selector = *selector, "detail link lookup failed: {}", e),
        }
    }
    None
}

/// Heuristic detail URL for boards that key rows by `data-id`
pub fn data_id_detail_url(base: &Url, id: &str) -> String {
    crate::codegen::detail_url(crate::codegen::DEFAULT_DETAIL_URL_TEMPLATE, base, id)
}

/// Resolve an anchor `href` against the board URL, skipping script links
pub fn resolve_href(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.to_ascii_lowercase().starts_with("javascript:") {
        return None;
    }
    base.join(href).ok().map(|u| u.to_string())
}

fn log_capture(captured: &CapturedBoardData) {
    info!(
        url = %captured.board_url,
        list_html = captured.list_page_html.len(),
        detail_html = captured.detail_page_html.len(),
        list_screenshot = captured.list_page_screenshot.is_some(),
        detail_screenshot = captured.detail_page_screenshot.is_some(),
        "capture complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::FixturePage;

    const BOARD: &str = "https://jobs.example.org/notice/list";

    fn fast() -> CaptureSettings {
        CaptureSettings {
            settle_delay: Duration::ZERO,
            ..CaptureSettings::default()
        }
    }

    #[test]
    fn test_resolve_href() {
        let base = Url::parse(BOARD).unwrap();
        assert_eq!(
            resolve_href(&base, "view?no=3").as_deref(),
            Some("https://jobs.example.org/notice/view?no=3")
        );
        assert_eq!(
            resolve_href(&base, "/abs/7").as_deref(),
            Some("https://jobs.example.org/abs/7")
        );
        assert_eq!(resolve_href(&base, "javascript:void(0)"), None);
        assert_eq!(resolve_href(&base, "JavaScript:goView(1)"), None);
        assert_eq!(resolve_href(&base, "#"), None);
    }

    #[test]
    fn test_data_id_detail_url() {
        let base = Url::parse(BOARD).unwrap();
        assert_eq!(
            data_id_detail_url(&base, "991"),
            "https://jobs.example.org/board/view?id=991"
        );
    }

    #[tokio::test]
    async fn test_captures_detail_through_data_id() {
        let list = r#"<table><tr data-id="17"><td class="title">Clerk</td></tr></table>"#;
        let detail = "<div class='view'>Full posting</div>";
        let mut page = FixturePage::new()
            .with_page(BOARD, list)
            .with_page("https://jobs.example.org/board/view?id=17", detail);

        let data = capture_board_data(&mut page, BOARD, &fast()).await.unwrap();
        assert_eq!(data.list_page_html, list);
        assert_eq!(data.detail_page_html, detail);
        assert!(data.list_page_screenshot.is_some());
        assert!(data.detail_page_screenshot.is_some());
        assert_eq!(
            data.detail_page_url.as_deref(),
            Some("https://jobs.example.org/board/view?id=17")
        );
    }

    #[tokio::test]
    async fn test_title_anchor_fallback_order() {
        let list = r#"<div class="cont_tit"><a href="/c/1">c</a></div><div class="title"><a href="javascript:go(2)">b</a></div>"#;
        let mut page = FixturePage::new()
            .with_page(BOARD, list)
            .with_page("https://jobs.example.org/c/1", "<p>detail</p>");

        let data = capture_board_data(&mut page, BOARD, &fast()).await.unwrap();
        // `.title a` matched first but is a script link, so `.cont_tit a` wins
        assert_eq!(data.detail_page_url.as_deref(), Some("https://jobs.example.org/c/1"));
    }

    #[tokio::test]
    async fn test_redirects_are_followed_for_links_and_recorded() {
        let list = r#"<div class="title"><a href="view?no=8">Porter</a></div>"#;
        let mut page = FixturePage::new()
            .with_redirect(BOARD, "https://jobs.example.org/v2/notice/list")
            .with_page("https://jobs.example.org/v2/notice/list", list)
            .with_redirect(
                "https://jobs.example.org/v2/notice/view?no=8",
                "https://jobs.example.org/v2/notice/view?no=8&lang=en",
            )
            .with_page("https://jobs.example.org/v2/notice/view?no=8&lang=en", "<p>detail</p>");

        let data = capture_board_data(&mut page, BOARD, &fast()).await.unwrap();
        assert_eq!(data.board_url, BOARD);
        assert_eq!(data.detail_page_html, "<p>detail</p>");
        assert_eq!(
            data.detail_page_url.as_deref(),
            Some("https://jobs.example.org/v2/notice/view?no=8&lang=en")
        );
    }

    #[tokio::test]
    async fn test_detail_failure_is_not_fatal() {
        let list = r#"<table><tr data-id="5"><td>row</td></tr></table>"#;
        let mut page = FixturePage::new()
            .with_page(BOARD, list)
            .failing("https://jobs.example.org/board/view?id=5");

        let data = capture_board_data(&mut page, BOARD, &fast()).await.unwrap();
        assert!(!data.list_page_html.is_empty());
        assert_eq!(data.detail_page_html, "");
        assert_eq!(data.detail_page_screenshot, None);
        assert_eq!(data.detail_page_url, None);
        assert!(!data.has_detail());
    }

    #[tokio::test]
    async fn test_list_failure_is_fatal() {
        let mut page = FixturePage::new().failing(BOARD);
        let err = capture_board_data(&mut page, BOARD, &fast()).await.unwrap_err();
        assert!(matches!(err, CaptureError::ListPage { .. }));
    }

    #[tokio::test]
    async fn test_invalid_board_url() {
        let mut page = FixturePage::new();
        let err = capture_board_data(&mut page, "not-a-url", &fast()).await.unwrap_err();
        assert!(matches!(err, CaptureError::InvalidUrl(_)));
        assert!(page.visits().is_empty());
    }
}
