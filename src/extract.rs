//! Field extraction and overlay neutralization for article pages.
//!
//! Extraction runs against a [`PageSnapshot`] of the rendered HTML. Each field
//! has an ordered list of selectors and the first one that locates an element
//! wins. A field with no match, or whose matched element has no text, gets its
//! placeholder from [`crate::models`]. A missing field is never an error.

use crate::config::{ConfigError, SelectorConfig, compile_selectors};
use crate::models::{FetchRecord, MISSING_AUTHOR, MISSING_BODY, MISSING_DATE, MISSING_TITLE};
use scraper::{ElementRef, Html, Selector};

/// Parsed HTML of a rendered page.
pub struct PageSnapshot {
    document: Html,
}

impl PageSnapshot {
    pub fn parse(html: &str) -> Self {
        Self {
            document: Html::parse_document(html),
        }
    }

    /// First element matching `selector`, if any.
    pub fn locate(&self, selector: &Selector) -> Option<ElementRef<'_>> {
        self.document.select(selector).next()
    }
}

/// Ordered selector list for one field.
#[derive(Debug, Clone)]
pub struct FieldRule {
    selectors: Vec<Selector>,
    placeholder: &'static str,
    multiline: bool,
}

impl FieldRule {
    /// Text of the element located by the first matching selector, or the placeholder.
    pub fn apply(&self, page: &PageSnapshot) -> String {
        self.selectors
            .iter()
            .find_map(|selector| page.locate(selector))
            .map(|element| element_text(element, self.multiline))
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| self.placeholder.to_string())
    }
}

/// Approximates `innerText`: trimmed text nodes, one per line for bodies.
fn element_text(element: ElementRef<'_>, multiline: bool) -> String {
    let separator = if multiline { "\n" } else { " " };
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Compiled selectors plus the neutralization script for one run.
#[derive(Debug, Clone)]
pub struct Extractor {
    title: FieldRule,
    body: FieldRule,
    published: FieldRule,
    author: FieldRule,
    neutralize_script: String,
}

impl Extractor {
    pub fn from_config(selectors: &SelectorConfig) -> Result<Self, ConfigError> {
        let rule = |field: &'static str,
                    list: &[String],
                    placeholder: &'static str,
                    multiline: bool|
         -> Result<FieldRule, ConfigError> {
            Ok(FieldRule {
                selectors: compile_selectors(field, list)?,
                placeholder,
                multiline,
            })
        };

        Ok(Self {
            title: rule("title", &selectors.title, MISSING_TITLE, false)?,
            body: rule("body", &selectors.body, MISSING_BODY, true)?,
            published: rule("published", &selectors.published, MISSING_DATE, false)?,
            author: rule("author", &selectors.author, MISSING_AUTHOR, false)?,
            neutralize_script: neutralize_script(&selectors.overlays, &selectors.gated_content),
        })
    }

    /// Script removing overlays and un-hiding gated content. Safe to run repeatedly.
    pub fn neutralize_script(&self) -> &str {
        &self.neutralize_script
    }

    /// Build a record for `url` from a rendered page.
    pub fn extract(&self, url: &str, html: &str) -> FetchRecord {
        let page = PageSnapshot::parse(html);
        FetchRecord {
            url: url.to_string(),
            title: self.title.apply(&page),
            body: self.body.apply(&page),
            published_label: self.published.apply(&page),
            author_label: self.author.apply(&page),
        }
    }
}

/// JavaScript that removes every overlay match and forces gated containers visible.
///
/// Selectors are embedded as JSON string literals, so quotes inside them
/// cannot break the script.
pub fn neutralize_script(overlays: &[String], gated: &[String]) -> String {
    let overlays = serde_json::to_string(overlays).unwrap_or_else(|_| "[]".to_string());
    let gated = serde_json::to_string(gated).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(() => {{
  for (const sel of {overlays}) {{
    try {{ document.querySelectorAll(sel).forEach((el) => el.remove()); }} catch (_) {{}}
  }}
  for (const sel of {gated}) {{
    try {{ document.querySelectorAll(sel).forEach((el) => el.style.setProperty("display", "block", "important")); }} catch (_) {{}}
  }}
  return true;
}})()"#
    )
}
