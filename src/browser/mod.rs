pub mod backend;
pub mod chrome;
pub mod types;

pub use backend::{FixturePage, PageBackend, select_first_attribute};
pub use chrome::ChromeBackend;
pub use types::{BrowserError, BrowserResult, BrowserSettings};
