//! Fallback selector chains.
//!
//! Each role resolves through an ordered candidate list: an optional
//! per-run override, the analyzer's primary selector, then fixed generic
//! alternatives. The first candidate matching at least one element wins.
//! The generated module carries the same lists and applies the same rule,
//! so a chain resolved here against static HTML predicts what the crawler
//! will pick at run time.

use scraper::{ElementRef, Selector};

/// What a selector locates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorRole {
    Container,
    Row,
    Title,
    Date,
    Content,
    Attachment,
    DetailTitle,
}

impl SelectorRole {
    pub const ALL: [SelectorRole; 7] = [
        SelectorRole::Container,
        SelectorRole::Row,
        SelectorRole::Title,
        SelectorRole::Date,
        SelectorRole::Content,
        SelectorRole::Attachment,
        SelectorRole::DetailTitle,
    ];

    /// Key under `SELECTORS` and `config.selectors` in the generated module
    pub fn key(self) -> &'static str {
        match self {
            SelectorRole::Container => "container",
            SelectorRole::Row => "row",
            SelectorRole::Title => "title",
            SelectorRole::Date => "date",
            SelectorRole::Content => "content",
            SelectorRole::Attachment => "attachment",
            SelectorRole::DetailTitle => "detailTitle",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.key() == key)
    }

    /// Generic alternatives tried after the primary, in order
    pub fn generic_fallbacks(self) -> &'static [&'static str] {
        match self {
            SelectorRole::Container => &["table.board-list", ".board_list", ".tbl_list", "table"],
            SelectorRole::Row => &["tbody tr", "tr"],
            SelectorRole::Title => &["td.title a", ".title a", ".subject a", "td a", "a"],
            SelectorRole::Date => &["td.date", ".date", ".reg_date", "td.regdate"],
            SelectorRole::Content => &[
                ".view-content",
                ".view_cont",
                ".board_view .content",
                "#content",
                "article",
            ],
            SelectorRole::Attachment => &[".file a", ".attach a", "a[href*='download']"],
            SelectorRole::DetailTitle => &[".view-title", ".view_tit", "h1", "h2"],
        }
    }
}

/// Which candidate matched, and what it matched
#[derive(Debug)]
pub struct ChainMatch<'s, 'a> {
    pub position: usize,
    pub selector: &'s str,
    pub elements: Vec<ElementRef<'a>>,
}

/// Ordered, de-duplicated candidates for one role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorChain {
    role: SelectorRole,
    candidates: Vec<String>,
}

impl SelectorChain {
    /// Chain with `primary` first, then the role's generic fallbacks.
    /// An empty primary contributes nothing.
    pub fn new(role: SelectorRole, primary: &str) -> Self {
        let mut chain = Self {
            role,
            candidates: Vec::new(),
        };
        chain.push(primary);
        for generic in role.generic_fallbacks() {
            chain.push(generic);
        }
        chain
    }

    /// Put `selector` ahead of everything else
    pub fn with_override(mut self, selector: Option<&str>) -> Self {
        if let Some(selector) = selector.map(str::trim).filter(|s| !s.is_empty()) {
            self.candidates.retain(|c| c != selector);
            self.candidates.insert(0, selector.to_string());
        }
        self
    }

    fn push(&mut self, selector: &str) {
        let selector = selector.trim();
        if !selector.is_empty() && !self.candidates.iter().any(|c| c == selector) {
            self.candidates.push(selector.to_string());
        }
    }

    pub fn role(&self) -> SelectorRole {
        self.role
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// First candidate with at least one match under `scope`.
    ///
    /// Candidates that fail to parse are skipped, the way the generated
    /// module skips selectors the browser rejects.
    pub fn resolve<'s, 'a>(&'s self, scope: ElementRef<'a>) -> Option<ChainMatch<'s, 'a>> {
        self.candidates.iter().enumerate().find_map(|(position, candidate)| {
            let selector = Selector::parse(candidate).ok()?;
            let elements: Vec<_> = scope.select(&selector).collect();
            (!elements.is_empty()).then_some(ChainMatch {
                position,
                selector: candidate,
                elements,
            })
        })
    }

    /// First matching element, if any candidate matches
    pub fn first<'a>(&self, scope: ElementRef<'a>) -> Option<ElementRef<'a>> {
        self.resolve(scope).and_then(|m| m.elements.into_iter().next())
    }

    /// Candidates as a JavaScript array literal
    pub fn to_js_array(&self) -> String {
        serde_json::to_string(&self.candidates).unwrap_or_else(|_| "[]".to_string())
    }
}
