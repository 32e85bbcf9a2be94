// Core types for the browser automation boundary

use std::path::PathBuf;
use std::time::Duration;

/// Settings for launching a capture browser
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Run without a visible window
    pub headless: bool,
    /// Window width in pixels (viewport screenshots use this size)
    pub window_width: u32,
    /// Window height in pixels
    pub window_height: u32,
    /// Explicit Chrome/Chromium binary; auto-detected when `None`
    pub chrome_executable: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1280,
            window_height: 900,
            chrome_executable: None,
        }
    }
}

/// Result type for browser operations
pub type BrowserResult<T> = Result<T, BrowserError>;

/// Error types for browser operations
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    /// Browser process could not be started
    #[error("Browser launch failed: {0}")]
    Launch(String),

    /// Navigation did not finish within its budget
    #[error("Navigation to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    /// Navigation failed outright
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// An operation needed a loaded page
    #[error("No page loaded")]
    NoPage,

    /// Selector could not be parsed
    #[error("Invalid selector '{0}'")]
    InvalidSelector(String),

    /// Screenshot capture failed
    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    /// DevTools protocol error
    #[error("DevTools error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
}
