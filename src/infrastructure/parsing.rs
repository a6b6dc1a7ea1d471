//! HTML parsing infrastructure for catalog pages
//!
//! Selector fallback chains are expressed as data (`FieldRule`) and evaluated
//! in order; the first strategy returning a non-empty value wins.

pub mod config;
pub mod css_extractor;
pub mod error;
pub mod price;
pub mod product_detail_parser;
pub mod product_list_parser;
pub mod strategy;

pub use config::SelectorConfig;
pub use css_extractor::CssPageExtractor;
pub use error::{ParsingError, ParsingResult};
pub use price::{PriceParser, PriceSelectionPolicy};
pub use product_detail_parser::ProductDetailParser;
pub use product_list_parser::ProductListParser;
pub use strategy::{FieldRule, FieldStrategy, ScopeContext};

use scraper::{ElementRef, Selector};
use url::Url;

/// Compiles selector strings, failing only when none of them is valid
pub fn compile_selectors(selector_strings: &[String]) -> ParsingResult<Vec<Selector>> {
    let mut selectors = Vec::with_capacity(selector_strings.len());
    let mut errors = Vec::new();

    for selector_str in selector_strings {
        match Selector::parse(selector_str) {
            Ok(selector) => selectors.push(selector),
            Err(e) => {
                tracing::warn!("Failed to compile selector '{}': {}", selector_str, e);
                errors.push(format!("'{selector_str}': {e}"));
            }
        }
    }

    if selectors.is_empty() && !selector_strings.is_empty() {
        return Err(ParsingError::InvalidSelector {
            selector: selector_strings.join(", "),
            reason: errors.join("; "),
        });
    }

    Ok(selectors)
}

/// Text content of an element with whitespace collapsed
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolves `href` against the page URL; absolute hrefs pass through
pub fn resolve_url(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    match Url::parse(href) {
        Ok(url) => Some(url.to_string()),
        Err(_) => base.and_then(|b| b.join(href).ok()).map(|u| u.to_string()),
    }
}

/// Truncates on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
