//! Field extraction strategies
//!
//! A `FieldRule` is an ordered list of strategies for one field. Strategies
//! run against a scope element (the whole document, or one listing card).

use regex::Regex;
use scraper::{ElementRef, Selector};
use url::Url;

use super::{collapse_whitespace, element_text, resolve_url, truncate_chars};
use crate::domain::product::{FieldName, FieldValue};

/// Per-page information shared by all strategies
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeContext<'a> {
    pub page_url: Option<&'a Url>,
}

/// One way of finding a field's value
pub trait FieldStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, scope: ElementRef<'_>, ctx: &ScopeContext<'_>) -> Option<FieldValue>;
}

/// Ordered fallback chain for a field
pub struct FieldRule {
    pub field: FieldName,
    strategies: Vec<Box<dyn FieldStrategy>>,
}

impl FieldRule {
    pub fn new(field: FieldName) -> Self {
        Self {
            field,
            strategies: Vec::new(),
        }
    }

    #[must_use]
    pub fn then(mut self, strategy: impl FieldStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// First non-empty strategy result
    pub fn apply(&self, scope: ElementRef<'_>, ctx: &ScopeContext<'_>) -> Option<FieldValue> {
        self.strategies.iter().find_map(|strategy| {
            let value = strategy.extract(scope, ctx).filter(|v| !v.is_empty());
            if value.is_some() {
                tracing::trace!("{:?} resolved by {}", self.field, strategy.name());
            }
            value
        })
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

/// Text of the first element matched by each selector, tried in order
pub struct SelectorText {
    selectors: Vec<Selector>,
    min_chars: usize,
    max_chars: Option<usize>,
    rejected: Vec<String>,
    strip_prefix: Option<Regex>,
}

impl SelectorText {
    pub fn new(selectors: Vec<Selector>) -> Self {
        Self {
            selectors,
            min_chars: 1,
            max_chars: None,
            rejected: Vec::new(),
            strip_prefix: None,
        }
    }

    #[must_use]
    pub fn min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }

    #[must_use]
    pub fn max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = Some(max_chars);
        self
    }

    /// Values equal (case-insensitively) to one of these are skipped
    #[must_use]
    pub fn reject(mut self, values: &[&str]) -> Self {
        self.rejected = values.iter().map(|v| v.to_lowercase()).collect();
        self
    }

    #[must_use]
    pub fn strip_prefix(mut self, pattern: Regex) -> Self {
        self.strip_prefix = Some(pattern);
        self
    }

    fn accept(&self, raw: &str) -> Option<String> {
        let mut text = collapse_whitespace(raw);
        if let Some(pattern) = &self.strip_prefix {
            text = pattern.replace(&text, "").trim().to_string();
        }
        if text.chars().count() < self.min_chars || self.rejected.contains(&text.to_lowercase()) {
            return None;
        }
        Some(match self.max_chars {
            Some(max) => truncate_chars(&text, max),
            None => text,
        })
    }
}

impl FieldStrategy for SelectorText {
    fn name(&self) -> &'static str {
        "selector-text"
    }

    fn extract(&self, scope: ElementRef<'_>, _ctx: &ScopeContext<'_>) -> Option<FieldValue> {
        self.selectors.iter().find_map(|selector| {
            scope
                .select(selector)
                .next()
                .and_then(|element| self.accept(&element.text().collect::<String>()))
                .map(FieldValue::Text)
        })
    }
}

/// Attribute value of the first matching element
pub struct AttributeValue {
    selector: Selector,
    attribute: String,
    resolve: bool,
}

impl AttributeValue {
    pub fn new(selector: Selector, attribute: impl Into<String>) -> Self {
        Self {
            selector,
            attribute: attribute.into(),
            resolve: false,
        }
    }

    /// Resolve the value as a URL against the page
    #[must_use]
    pub fn as_url(mut self) -> Self {
        self.resolve = true;
        self
    }
}

impl FieldStrategy for AttributeValue {
    fn name(&self) -> &'static str {
        "attribute"
    }

    fn extract(&self, scope: ElementRef<'_>, ctx: &ScopeContext<'_>) -> Option<FieldValue> {
        let element = scope.select(&self.selector).next()?;
        let value = element.value().attr(&self.attribute)?.trim();
        if value.is_empty() {
            return None;
        }
        let value = if self.resolve {
            resolve_url(ctx.page_url, value)?
        } else {
            value.to_string()
        };
        Some(FieldValue::Text(value))
    }
}

/// Value cell of a two-column table row whose label matches
pub struct LabeledRow {
    rows: Vec<Selector>,
    cells: Selector,
    labels: Vec<String>,
    max_chars: usize,
}

impl LabeledRow {
    pub fn new(rows: Vec<Selector>, labels: &[&str]) -> Option<Self> {
        Some(Self {
            rows,
            cells: Selector::parse("th, td").ok()?,
            labels: labels.iter().map(|l| l.to_lowercase()).collect(),
            max_chars: 100,
        })
    }
}

impl FieldStrategy for LabeledRow {
    fn name(&self) -> &'static str {
        "labeled-row"
    }

    fn extract(&self, scope: ElementRef<'_>, _ctx: &ScopeContext<'_>) -> Option<FieldValue> {
        for rows in &self.rows {
            for row in scope.select(rows) {
                let mut cells = row.select(&self.cells);
                let (Some(label), Some(value)) = (cells.next(), cells.next()) else {
                    continue;
                };
                let label = element_text(label).trim_end_matches(':').to_lowercase();
                if self.labels.iter().any(|l| *l == label) {
                    let value = element_text(value);
                    if !value.is_empty() && value.chars().count() <= self.max_chars {
                        return Some(FieldValue::Text(value));
                    }
                }
            }
        }
        None
    }
}

/// First capture of a pattern over the scope's raw text (line breaks kept)
pub struct TextPattern {
    patterns: Vec<Regex>,
    max_chars: usize,
    title_case: bool,
}

impl TextPattern {
    pub fn new(patterns: Vec<Regex>, max_chars: usize) -> Self {
        Self {
            patterns,
            max_chars,
            title_case: false,
        }
    }

    #[must_use]
    pub fn title_case(mut self) -> Self {
        self.title_case = true;
        self
    }
}

impl FieldStrategy for TextPattern {
    fn name(&self) -> &'static str {
        "text-pattern"
    }

    fn extract(&self, scope: ElementRef<'_>, _ctx: &ScopeContext<'_>) -> Option<FieldValue> {
        let text = scope.text().collect::<String>();
        self.patterns.iter().find_map(|pattern| {
            let captured = pattern.captures(&text)?.get(1)?.as_str().trim();
            if captured.is_empty() || captured.chars().count() >= self.max_chars {
                return None;
            }
            let value = if self.title_case {
                to_title_case(captured)
            } else {
                captured.to_string()
            };
            Some(FieldValue::Text(value))
        })
    }
}

/// Maps keywords found in the scope text to a fixed value, first keyword wins
pub struct KeywordMatch {
    keywords: Vec<(String, String)>,
}

impl KeywordMatch {
    pub fn new(keywords: &[(&str, &str)]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|(keyword, value)| (keyword.to_lowercase(), (*value).to_string()))
                .collect(),
        }
    }
}

impl FieldStrategy for KeywordMatch {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn extract(&self, scope: ElementRef<'_>, _ctx: &ScopeContext<'_>) -> Option<FieldValue> {
        let text = collapse_whitespace(&scope.text().collect::<String>()).to_lowercase();
        self.keywords
            .iter()
            .find(|(keyword, _)| text.contains(keyword.as_str()))
            .map(|(_, value)| FieldValue::Text(value.clone()))
    }
}

/// Image URLs from all selectors, resolved and de-duplicated in order
pub struct ImageSources {
    selectors: Vec<Selector>,
    attributes: Vec<String>,
    max_images: usize,
}

impl ImageSources {
    pub fn new(selectors: Vec<Selector>, attributes: Vec<String>) -> Self {
        Self {
            selectors,
            attributes,
            max_images: 20,
        }
    }
}

impl FieldStrategy for ImageSources {
    fn name(&self) -> &'static str {
        "image-sources"
    }

    fn extract(&self, scope: ElementRef<'_>, ctx: &ScopeContext<'_>) -> Option<FieldValue> {
        let mut images: Vec<String> = Vec::new();
        for selector in &self.selectors {
            for element in scope.select(selector) {
                let source = self
                    .attributes
                    .iter()
                    .filter_map(|attr| element.value().attr(attr))
                    .map(str::trim)
                    .find(|src| !src.is_empty() && !src.starts_with("data:"));
                let Some(url) = source.and_then(|src| resolve_url(ctx.page_url, src)) else {
                    continue;
                };
                if !images.contains(&url) {
                    images.push(url);
                }
                if images.len() >= self.max_images {
                    return Some(FieldValue::List(images));
                }
            }
        }
        Some(FieldValue::List(images))
    }
}

fn to_title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn sel(s: &str) -> Selector {
        Selector::parse(s).unwrap()
    }

    #[test]
    fn test_first_non_empty_strategy_wins() {
        let html = Html::parse_document(
            r#"<html><body><h1 class="entry-title">  </h1><h2 class="product_title">Deep Cycle Battery</h2></body></html>"#,
        );
        let rule = FieldRule::new(FieldName::Name)
            .then(SelectorText::new(vec![sel("h1.entry-title")]).min_chars(4))
            .then(SelectorText::new(vec![sel(".product_title")]).min_chars(4));

        let value = rule.apply(html.root_element(), &ScopeContext::default());
        assert_eq!(value, Some(FieldValue::Text("Deep Cycle Battery".to_string())));
        assert_eq!(rule.strategy_names(), vec!["selector-text", "selector-text"]);
    }

    #[test]
    fn test_selector_text_rejects_and_strips() {
        let html = Html::parse_document(
            r#"<div class="breadcrumb"><a>Home</a></div><span class="sku">SKU: PV-100</span>"#,
        );
        let category = SelectorText::new(vec![sel(".breadcrumb a:last-of-type")]).reject(&["home"]);
        assert_eq!(category.extract(html.root_element(), &ScopeContext::default()), None);

        let sku = SelectorText::new(vec![sel(".sku")]).strip_prefix(Regex::new(r"(?i)^sku:\s*").unwrap());
        assert_eq!(
            sku.extract(html.root_element(), &ScopeContext::default()),
            Some(FieldValue::Text("PV-100".to_string()))
        );
    }

    #[test]
    fn test_labeled_row_and_pattern() {
        let html = Html::parse_document(
            "<table><tr><th>Weight</th><td>12kg</td></tr><tr><th>Battery Brand:</th><td>Power Zone</td></tr></table>\
             <p>\nbrand: chloride exide\n</p>",
        );
        let row = LabeledRow::new(vec![sel("table tr")], &["battery brand", "brand"]).unwrap();
        assert_eq!(
            row.extract(html.root_element(), &ScopeContext::default()),
            Some(FieldValue::Text("Power Zone".to_string()))
        );

        let pattern = TextPattern::new(vec![Regex::new(r"(?im)^brand[:\s]+([^\n\r]+)").unwrap()], 50).title_case();
        assert_eq!(
            pattern.extract(html.root_element(), &ScopeContext::default()),
            Some(FieldValue::Text("Chloride Exide".to_string()))
        );
    }

    #[test]
    fn test_images_resolved_and_deduplicated() {
        let page = Url::parse("https://shop.test/product/lamp/").unwrap();
        let html = Html::parse_document(
            r#"<div class="product-gallery">
                 <img src="/img/a.jpg"><img src="data:image/gif;base64,xx" data-src="/img/b.jpg"><img src="/img/a.jpg">
               </div>"#,
        );
        let images = ImageSources::new(vec![sel(".product-gallery img")], vec!["src".into(), "data-src".into()]);
        let ctx = ScopeContext { page_url: Some(&page) };
        assert_eq!(
            images.extract(html.root_element(), &ctx),
            Some(FieldValue::List(vec![
                "https://shop.test/img/a.jpg".to_string(),
                "https://shop.test/img/b.jpg".to_string(),
            ]))
        );
    }

    #[test]
    fn test_keyword_match_order() {
        let html = Html::parse_document("<p>Currently Out of Stock</p>");
        let stock = KeywordMatch::new(&[("in stock", "In Stock"), ("out of stock", "Out of Stock")]);
        assert_eq!(
            stock.extract(html.root_element(), &ScopeContext::default()),
            Some(FieldValue::Text("Out of Stock".to_string()))
        );
    }
}
