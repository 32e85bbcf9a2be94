//! Page backend abstraction for board capture.
//!
//! This module provides a unified interface over the pages the collector
//! drives:
//! - [`ChromeBackend`](super::ChromeBackend) for live boards via the Chrome DevTools protocol
//! - [`FixturePage`] for offline runs and tests, serving canned HTML

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use scraper::{Html, Selector};

use super::types::{BrowserError, BrowserResult};

/// Trait for page backends
///
/// Implementations own exactly one page. Navigation carries its own
/// timeout so callers can give list and detail pages different budgets.
#[async_trait]
pub trait PageBackend: Send {
    /// Navigate and wait for the load event, failing after `timeout`
    async fn goto(&mut self, url: &str, timeout: Duration) -> BrowserResult<()>;

    /// Serialized HTML of the current document
    async fn content(&mut self) -> BrowserResult<String>;

    /// PNG screenshot of the viewport (not the full page)
    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>>;

    /// Value of `attribute` on the first element matching `selector`
    async fn first_attribute(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> BrowserResult<Option<String>>;

    /// URL of the current document, if any
    async fn current_url(&mut self) -> BrowserResult<Option<String>>;

    /// Release the page and anything it owns. Safe to call twice.
    async fn close(&mut self) -> BrowserResult<()>;

    /// Get the source type identifier (e.g., "chrome", "fixture")
    fn source_type(&self) -> &str;
}

/// An in-memory page serving canned HTML per URL
///
/// Navigation to a URL registered with [`FixturePage::failing`] returns an
/// error, which lets tests exercise degraded capture paths.
#[derive(Debug, Clone, Default)]
pub struct FixturePage {
    pages: HashMap<String, String>,
    redirects: HashMap<String, String>,
    failing: HashSet<String>,
    current: Option<String>,
    visits: Vec<String>,
}

impl FixturePage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register HTML served for `url`
    pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }

    /// Land on `to` whenever `from` is requested
    pub fn with_redirect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.redirects.insert(from.into(), to.into());
        self
    }

    /// Make navigation to `url` fail
    pub fn failing(mut self, url: impl Into<String>) -> Self {
        self.failing.insert(url.into());
        self
    }

    /// Every URL navigation was attempted for, in order
    pub fn visits(&self) -> &[String] {
        &self.visits
    }

    fn current_html(&self) -> BrowserResult<&str> {
        self.current
            .as_ref()
            .and_then(|url| self.pages.get(url))
            .map(String::as_str)
            .ok_or(BrowserError::NoPage)
    }
}

#[async_trait]
impl PageBackend for FixturePage {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> BrowserResult<()> {
        self.visits.push(url.to_string());
        let url = self.redirects.get(url).cloned().unwrap_or_else(|| url.to_string());
        let url = url.as_str();
        if self.failing.contains(url) {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: "fixture configured to fail".to_string(),
            });
        }
        if !self.pages.contains_key(url) {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: "no fixture registered".to_string(),
            });
        }
        self.current = Some(url.to_string());
        Ok(())
    }

    async fn content(&mut self) -> BrowserResult<String> {
        self.current_html().map(str::to_string)
    }

    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>> {
        let html = self.current_html()?;
        placeholder_png(html.len())
    }

    async fn first_attribute(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> BrowserResult<Option<String>> {
        let html = self.current_html()?;
        select_first_attribute(html, selector, attribute)
    }

    async fn current_url(&mut self) -> BrowserResult<Option<String>> {
        Ok(self.current.clone())
    }

    async fn close(&mut self) -> BrowserResult<()> {
        self.current = None;
        Ok(())
    }

    fn source_type(&self) -> &str {
        "fixture"
    }
}

/// Evaluate a selector over static HTML. Kept synchronous because
/// `scraper::Html` is not `Send`.
pub fn select_first_attribute(
    html: &str,
    selector: &str,
    attribute: &str,
) -> BrowserResult<Option<String>> {
    let parsed = Selector::parse(selector)
        .map_err(|_| BrowserError::InvalidSelector(selector.to_string()))?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&parsed)
        .next()
        .and_then(|el| el.value().attr(attribute))
        .map(str::to_string))
}

/// Small PNG whose shade depends on the document size, so list and detail
/// captures of a fixture are distinguishable.
fn placeholder_png(seed: usize) -> BrowserResult<Vec<u8>> {
    let shade = (seed % 200) as u8 + 30;
    let mut img = RgbImage::from_pixel(64, 48, Rgb([shade, shade, shade]));
    for x in 0..64 {
        for y in 0..6 {
            img.put_pixel(x, y, Rgb([36, 114, 200]));
        }
    }

    let mut png_data = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_data), image::ImageFormat::Png)
        .map_err(|e| BrowserError::Screenshot(e.to_string()))?;
    Ok(png_data)
}
