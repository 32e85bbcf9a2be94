//! Chrome DevTools page backend.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::backend::PageBackend;
use super::types::{BrowserError, BrowserResult, BrowserSettings};

/// A headless Chrome instance owning a single page
pub struct ChromeBackend {
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    page: Page,
}

impl ChromeBackend {
    /// Launch a browser and open a blank page
    pub async fn launch(settings: &BrowserSettings) -> BrowserResult<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(settings.window_width, settings.window_height);
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &settings.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // The handler drives the websocket; it must be polled for any page call to resolve.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        debug!(headless = settings.headless, "chrome launched");

        Ok(Self {
            browser: Some(browser),
            handler: Some(handler),
            page,
        })
    }

    /// Run `expression` and decode its JSON-encoded string result
    async fn evaluate_json<T: serde::de::DeserializeOwned>(&self, expression: String) -> BrowserResult<T> {
        let encoded: String = self.page.evaluate(expression).await?.into_value().map_err(|e| {
            BrowserError::Navigation {
                url: String::new(),
                reason: format!("unexpected evaluation result: {}", e),
            }
        })?;
        serde_json::from_str(&encoded).map_err(|e| BrowserError::Navigation {
            url: String::new(),
            reason: format!("undecodable evaluation result: {}", e),
        })
    }
}

#[async_trait]
impl PageBackend for ChromeBackend {
    async fn goto(&mut self, url: &str, timeout: Duration) -> BrowserResult<()> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(BrowserError::Timeout {
                url: url.to_string(),
                after: timeout,
            }),
        }
    }

    async fn content(&mut self) -> BrowserResult<String> {
        Ok(self.page.content().await?)
    }

    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>> {
        let params = ScreenshotParams::builder().full_page(false).build();
        self.page
            .screenshot(params)
            .await
            .map_err(|e| BrowserError::Screenshot(e.to_string()))
    }

    async fn first_attribute(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> BrowserResult<Option<String>> {
        let selector_js = serde_json::to_string(selector).unwrap_or_default();
        let attribute_js = serde_json::to_string(attribute).unwrap_or_default();
        let expression = format!(
            "(() => {{ let el = null; try {{ el = document.querySelector({selector_js}); }} catch (e) {{ return JSON.stringify('__invalid_selector__'); }} \
             return JSON.stringify(el ? el.getAttribute({attribute_js}) : null); }})()"
        );
        let value: Option<String> = self.evaluate_json(expression).await?;
        match value.as_deref() {
            Some("__invalid_selector__") => Err(BrowserError::InvalidSelector(selector.to_string())),
            _ => Ok(value),
        }
    }

    async fn current_url(&mut self) -> BrowserResult<Option<String>> {
        Ok(self.page.url().await?)
    }

    async fn close(&mut self) -> BrowserResult<()> {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("failed to close browser cleanly: {}", e);
            }
            let _ = browser.wait().await;
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        Ok(())
    }

    fn source_type(&self) -> &str {
        "chrome"
    }
}

impl Drop for ChromeBackend {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}
