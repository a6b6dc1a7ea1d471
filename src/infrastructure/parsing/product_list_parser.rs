//! Listing page parser: product links and product cards

use scraper::{Html, Selector};
use url::Url;

use super::config::SelectorConfig;
use super::price::PriceLocator;
use super::strategy::{AttributeValue, FieldRule, ImageSources, ScopeContext, SelectorText};
use super::{compile_selectors, resolve_url, ParsingError, ParsingResult};
use crate::domain::product::{FieldMap, FieldName, FieldValue};

/// Links taken from a single selector, matching the listing layouts seen so far
const MAX_LINKS_PER_SELECTOR: usize = 30;

pub struct ProductListParser {
    link_selectors: Vec<Selector>,
    link_marker: String,
    excluded_fragments: Vec<String>,
    card_selectors: Vec<Selector>,
    card_rules: Vec<FieldRule>,
    card_price_selectors: Vec<Selector>,
}

impl ProductListParser {
    pub fn new(selectors: &SelectorConfig) -> ParsingResult<Self> {
        let anchor = Selector::parse("a[href]").map_err(|e| ParsingError::InvalidSelector {
            selector: "a[href]".to_string(),
            reason: e.to_string(),
        })?;
        let card_rules = vec![
            FieldRule::new(FieldName::Name)
                .then(SelectorText::new(compile_selectors(&selectors.card_name)?).min_chars(4).max_chars(200)),
            FieldRule::new(FieldName::SourceUrl).then(AttributeValue::new(anchor, "href").as_url()),
            FieldRule::new(FieldName::Images).then(ImageSources::new(
                compile_selectors(&["img".to_string()])?,
                selectors.image_attributes.clone(),
            )),
        ];

        Ok(Self {
            link_selectors: compile_selectors(&selectors.product_links)?,
            link_marker: selectors.product_link_marker.clone(),
            excluded_fragments: selectors.excluded_link_fragments.clone(),
            card_selectors: compile_selectors(&selectors.listing_cards)?,
            card_rules,
            card_price_selectors: compile_selectors(&selectors.card_price)?,
        })
    }

    fn is_product_link(&self, url: &str) -> bool {
        url.contains(&self.link_marker) && !self.excluded_fragments.iter().any(|f| url.contains(f.as_str()))
    }

    /// Unique product detail URLs in document order
    pub fn extract_links(&self, html: &str, page_url: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let base = Url::parse(page_url).ok();
        let mut links: Vec<String> = Vec::new();

        for selector in &self.link_selectors {
            let found = document
                .select(selector)
                .filter_map(|a| a.value().attr("href"))
                .filter_map(|href| resolve_url(base.as_ref(), href))
                .filter(|url| self.is_product_link(url))
                .take(MAX_LINKS_PER_SELECTOR);
            for url in found {
                let url = url.split('#').next().unwrap_or(&url).to_string();
                if !links.contains(&url) {
                    links.push(url);
                }
            }
        }

        tracing::debug!("🔗 Found {} product links on {}", links.len(), page_url);
        links
    }

    /// Product cards of the first card selector that matches anything
    pub fn extract_cards(&self, html: &str, page_url: &str, price: &PriceLocator) -> Vec<FieldMap> {
        let document = Html::parse_document(html);
        let base = Url::parse(page_url).ok();
        let ctx = ScopeContext { page_url: base.as_ref() };

        let Some(cards) = self
            .card_selectors
            .iter()
            .map(|selector| document.select(selector).collect::<Vec<_>>())
            .find(|cards| !cards.is_empty())
        else {
            return Vec::new();
        };

        cards
            .into_iter()
            .filter_map(|card| {
                let mut fields = FieldMap::new();
                for rule in &self.card_rules {
                    if let Some(value) = rule.apply(card, &ctx) {
                        fields.insert(rule.field, value);
                    }
                }
                if let Some(found) = price.first_in(card, &self.card_price_selectors) {
                    fields.insert_text(FieldName::RawPriceText, found.raw_text);
                    fields.insert(FieldName::Price, FieldValue::Money(found.price));
                }
                fields.text(FieldName::Name).is_some().then_some(fields)
            })
            .collect()
    }
}
