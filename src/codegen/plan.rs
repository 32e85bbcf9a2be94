use std::collections::HashMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use url::Url;

use crate::analyzer::{BoardAnalysis, LinkMethod, PaginationType};
use crate::capture::resolve_href;

use super::GenerateError;
use super::selectors::{SelectorChain, SelectorRole};

/// Detail URL template used when the run config does not provide one
pub const DEFAULT_DETAIL_URL_TEMPLATE: &str = "{origin}/board/view?id={id}";

/// Bytes JavaScript's `encodeURIComponent` escapes
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Validated crawling strategy: one chain per role plus link and
/// pagination rules.
#[derive(Debug, Clone)]
pub struct CrawlPlan {
    chains: Vec<SelectorChain>,
    pub link_method: LinkMethod,
    pub link_attribute: String,
    pub link_regex: Option<String>,
    pub pagination: PaginationType,
}

/// Row summary as the crawler would see it on a list page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewRow {
    pub title: String,
    pub date: String,
    pub link: Option<String>,
}

impl CrawlPlan {
    pub fn from_analysis(analysis: &BoardAnalysis) -> Result<Self, GenerateError> {
        Self::with_overrides(analysis, &HashMap::new())
    }

    /// Build a plan, putting `overrides[role key]` ahead of each chain
    pub fn with_overrides(
        analysis: &BoardAnalysis,
        overrides: &HashMap<String, String>,
    ) -> Result<Self, GenerateError> {
        let list = &analysis.list_page;
        let detail = &analysis.detail_page;

        if !(0.0..=1.0).contains(&analysis.confidence) {
            return Err(GenerateError::InvalidAnalysis(format!(
                "confidence {} is outside [0, 1]",
                analysis.confidence
            )));
        }
        if list.row_selector.trim().is_empty() {
            return Err(GenerateError::InvalidAnalysis("row selector is empty".to_string()));
        }
        if list.title_selector.trim().is_empty() {
            return Err(GenerateError::InvalidAnalysis("title selector is empty".to_string()));
        }

        let extraction = &list.link_extraction;
        if extraction.method == LinkMethod::Onclick {
            let pattern = extraction.regex.as_deref().ok_or_else(|| {
                GenerateError::InvalidAnalysis("onclick link extraction without a regex".to_string())
            })?;
            let compiled = Regex::new(pattern).map_err(|e| {
                GenerateError::InvalidAnalysis(format!("onclick regex does not compile: {}", e))
            })?;
            if compiled.captures_len() < 2 {
                return Err(GenerateError::InvalidAnalysis(
                    "onclick regex has no capture group".to_string(),
                ));
            }
            // the generated module compiles the same pattern with `new RegExp`
            if let Some(feature) = js_incompatibility(pattern) {
                return Err(GenerateError::InvalidAnalysis(format!(
                    "onclick regex uses {} which JavaScript does not support",
                    feature
                )));
            }
        }

        let chains = SelectorRole::ALL
            .iter()
            .map(|&role| {
                let primary = match role {
                    SelectorRole::Container => &list.container_selector,
                    SelectorRole::Row => &list.row_selector,
                    SelectorRole::Title => &list.title_selector,
                    SelectorRole::Date => &list.date_selector,
                    SelectorRole::Content => &detail.content_selector,
                    SelectorRole::Attachment => &detail.attachment_selector,
                    SelectorRole::DetailTitle => &detail.title_selector,
                };
                SelectorChain::new(role, primary)
                    .with_override(overrides.get(role.key()).map(String::as_str))
            })
            .collect();

        Ok(Self {
            chains,
            link_method: extraction.method,
            link_attribute: extraction.effective_attribute().to_string(),
            link_regex: extraction.regex.clone(),
            pagination: list.pagination_type,
        })
    }

    pub fn chain(&self, role: SelectorRole) -> &SelectorChain {
        // chains are built from SelectorRole::ALL, so every role is present
        &self.chains[role as usize]
    }

    pub fn chains(&self) -> &[SelectorChain] {
        &self.chains
    }

    /// Rows the crawler would summarize on `html`, resolved with the same
    /// fallback rules as the generated module. Rows without a title are
    /// skipped.
    pub fn preview(&self, html: &str, base_url: &Url, detail_template: &str) -> Vec<PreviewRow> {
        let document = Html::parse_document(html);
        let root = document.root_element();
        let scope = self.chain(SelectorRole::Container).first(root).unwrap_or(root);

        let Some(rows) = self.chain(SelectorRole::Row).resolve(scope) else {
            return Vec::new();
        };

        rows.elements
            .into_iter()
            .filter_map(|row| {
                let title_el = self.chain(SelectorRole::Title).first(row);
                let title = title_el.map(element_text).unwrap_or_default();
                if title.is_empty() {
                    return None;
                }
                let date = self
                    .chain(SelectorRole::Date)
                    .first(row)
                    .map(element_text)
                    .unwrap_or_default();
                let link = self.resolve_link(row, title_el, base_url, detail_template);
                Some(PreviewRow { title, date, link })
            })
            .collect()
    }

    fn resolve_link(
        &self,
        row: ElementRef<'_>,
        title_el: Option<ElementRef<'_>>,
        base_url: &Url,
        detail_template: &str,
    ) -> Option<String> {
        let value = attribute_in(row, title_el, &self.link_attribute);
        let primary = match self.link_method {
            LinkMethod::DataId => value.map(|id| detail_url(detail_template, base_url, &id)),
            LinkMethod::Onclick => value.and_then(|handler| {
                let regex = Regex::new(self.link_regex.as_deref()?).ok()?;
                let id = regex.captures(&handler)?.get(1)?.as_str().to_string();
                Some(detail_url(detail_template, base_url, &id))
            }),
            LinkMethod::Href => value.and_then(|href| resolve_href(base_url, &href)),
        };
        if primary.is_some() {
            return primary;
        }

        let nested_anchor = Selector::parse("a[href]")
            .ok()
            .and_then(|s| row.select(&s).next());
        [title_el, nested_anchor]
            .into_iter()
            .flatten()
            .filter_map(|el| el.value().attr("href"))
            .find_map(|href| resolve_href(base_url, href))
    }
}

/// Fill `{origin}` and the percent-encoded `{id}` in a detail URL template
pub fn detail_url(template: &str, base_url: &Url, id: &str) -> String {
    let id = utf8_percent_encode(id, URI_COMPONENT).to_string();
    template
        .replacen("{origin}", &base_url.origin().ascii_serialization(), 1)
        .replacen("{id}", &id, 1)
}

/// Syntax the `regex` crate accepts that JavaScript's `RegExp` rejects or
/// reads differently
fn js_incompatibility(pattern: &str) -> Option<&'static str> {
    let mut chars = pattern.char_indices();
    while let Some((i, ch)) = chars.next() {
        let rest = &pattern[i..];
        match ch {
            '\\' => match chars.next().map(|(_, c)| c) {
                Some('A' | 'z' | 'Z') => return Some("\\A/\\z anchors"),
                Some('p' | 'P') => return Some("Unicode class escapes"),
                _ => {}
            },
            '(' if rest.starts_with("(?P<") => return Some("(?P<name>) groups"),
            '(' if rest[1..].starts_with('?') => {
                let flags = rest[2..].chars().next();
                if matches!(flags, Some('i' | 'm' | 's' | 'x' | 'u' | 'U' | '-')) {
                    return Some("inline flags");
                }
            }
            '[' if rest.starts_with("[[:") => return Some("POSIX classes"),
            _ => {}
        }
    }
    None
}

/// Non-blank attribute value on the row, the title element, or the
/// first descendant of the row carrying it
fn attribute_in(row: ElementRef<'_>, title_el: Option<ElementRef<'_>>, attribute: &str) -> Option<String> {
    let direct = [Some(row), title_el]
        .into_iter()
        .flatten()
        .filter_map(|el| el.value().attr(attribute))
        .map(str::trim)
        .find(|v| !v.is_empty());
    if let Some(value) = direct {
        return Some(value.to_string());
    }

    let selector = Selector::parse(&format!("[{}]", attribute)).ok()?;
    row.select(&selector)
        .filter_map(|el| el.value().attr(attribute))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Whitespace-collapsed text content
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
