//! Product detail page parser
//!
//! Builds one `FieldRule` per product field from the selector configuration,
//! plus the staged price locator.

#![allow(clippy::uninlined_format_args)]

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use super::config::SelectorConfig;
use super::price::{PriceLocator, PriceSelectionPolicy};
use super::strategy::{
    AttributeValue, FieldRule, ImageSources, KeywordMatch, LabeledRow, ScopeContext, SelectorText, TextPattern,
};
use super::{collapse_whitespace, compile_selectors, ParsingError, ParsingResult};
use crate::domain::product::{FieldMap, FieldName, FieldValue};

/// Pages shorter than this (visible text) are treated as error or placeholder pages
const MIN_PAGE_TEXT_CHARS: usize = 100;

pub struct ProductDetailParser {
    rules: Vec<FieldRule>,
    price: PriceLocator,
    title_selector: Selector,
    body_selector: Selector,
}

impl ProductDetailParser {
    pub fn new(
        selectors: &SelectorConfig,
        policy: PriceSelectionPolicy,
        min_plausible_price: f64,
        default_currency: &str,
    ) -> ParsingResult<Self> {
        Ok(Self {
            rules: Self::build_rules(selectors)?,
            price: PriceLocator::new(selectors, policy, min_plausible_price, default_currency)?,
            title_selector: single("title")?,
            body_selector: single("body")?,
        })
    }

    fn build_rules(s: &SelectorConfig) -> ParsingResult<Vec<FieldRule>> {
        let sku_prefix = Regex::new(r"(?i)^(?:sku|product code|code)\s*:?\s*")?;
        let brand_rows = LabeledRow::new(compile_selectors(&s.brand_rows)?, &["battery brand", "brand", "manufacturer"])
            .ok_or_else(|| invalid("th, td"))?;
        let sku_rows = LabeledRow::new(compile_selectors(&s.brand_rows)?, &["sku", "product code"])
            .ok_or_else(|| invalid("th, td"))?;

        Ok(vec![
            FieldRule::new(FieldName::Name)
                .then(SelectorText::new(compile_selectors(&s.name)?).min_chars(4).max_chars(200)),
            FieldRule::new(FieldName::Sku)
                .then(
                    SelectorText::new(compile_selectors(&s.sku)?)
                        .strip_prefix(sku_prefix)
                        .reject(&["n/a"]),
                )
                .then(AttributeValue::new(single("[data-sku]")?, "data-sku"))
                .then(sku_rows),
            FieldRule::new(FieldName::Brand)
                .then(SelectorText::new(compile_selectors(&s.brand)?).max_chars(50))
                .then(AttributeValue::new(single("[data-brand]")?, "data-brand"))
                .then(brand_rows)
                .then(
                    TextPattern::new(
                        vec![
                            Regex::new(r"(?i)battery brand[:\s]+([^\n\r]+)")?,
                            Regex::new(r"(?im)^\s*brand\s*:\s*([^\n\r]+)")?,
                        ],
                        50,
                    )
                    .title_case(),
                ),
            FieldRule::new(FieldName::Category).then(
                SelectorText::new(compile_selectors(&s.category)?)
                    .reject(&["home", "shop"])
                    .max_chars(100),
            ),
            FieldRule::new(FieldName::StockStatus)
                .then(SelectorText::new(compile_selectors(&s.stock)?).max_chars(50))
                .then(KeywordMatch::new(&[("in stock", "In Stock"), ("out of stock", "Out of Stock")])),
            FieldRule::new(FieldName::Description).then(
                SelectorText::new(compile_selectors(&s.description)?)
                    .min_chars(21)
                    .max_chars(500),
            ),
            FieldRule::new(FieldName::Images).then(ImageSources::new(
                compile_selectors(&s.images)?,
                s.image_attributes.clone(),
            )),
        ])
    }

    /// Quick sanity check before running every rule
    fn looks_like_product_page(&self, document: &Html) -> bool {
        if document.select(&self.title_selector).next().is_none() {
            return false;
        }
        document.select(&self.body_selector).next().is_some_and(|body| {
            collapse_whitespace(&body.text().collect::<String>()).chars().count() >= MIN_PAGE_TEXT_CHARS
        })
    }

    pub fn parse(&self, html: &str, page_url: &str) -> FieldMap {
        let document = Html::parse_document(html);
        let mut fields = FieldMap::new();

        if !self.looks_like_product_page(&document) {
            tracing::debug!("Page failed quick validation, skipping: {}", page_url);
            return fields;
        }

        let page_url = Url::parse(page_url).ok();
        let ctx = ScopeContext {
            page_url: page_url.as_ref(),
        };
        let root = document.root_element();

        for rule in &self.rules {
            if let Some(value) = rule.apply(root, &ctx) {
                fields.insert(rule.field, value);
            }
        }

        if let Some(found) = self.price.locate(&document) {
            fields.insert_text(FieldName::RawPriceText, found.raw_text);
            fields.insert(FieldName::Price, FieldValue::Money(found.price));
        }

        fields
    }
}

fn single(selector: &str) -> ParsingResult<Selector> {
    Selector::parse(selector).map_err(|e| ParsingError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn invalid(selector: &str) -> ParsingError {
    ParsingError::InvalidSelector {
        selector: selector.to_string(),
        reason: "failed to compile".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::product::Price;

    const PRODUCT_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Solar Deep Cycle Battery 200Ah – Shop</title></head>
<body>
  <nav class="breadcrumb"><a href="/">Home</a><a href="/c/batteries/">Solar Batteries</a></nav>
  <div class="product type-product">
    <div class="woocommerce-product-gallery">
      <div class="woocommerce-product-gallery__image"><img src="/wp-content/uploads/battery-front.jpg"></div>
      <div class="woocommerce-product-gallery__image"><img src="/wp-content/uploads/battery-side.jpg"></div>
    </div>
    <div class="summary entry-summary">
      <h1 class="product_title entry-title">Solar Deep Cycle Battery 200Ah</h1>
      <p class="price"><span class="woocommerce-Price-amount amount"><bdi>KSh&nbsp;28,500.00</bdi></span></p>
      <div class="woocommerce-product-details__short-description">
        <p>Maintenance-free deep cycle battery designed for solar installations and backup power.</p>
      </div>
      <p class="stock in-stock">In stock</p>
      <div class="product_meta"><span class="sku_wrapper">SKU: <span class="sku">SDC-200</span></span></div>
    </div>
    <table class="woocommerce-product-attributes shop_attributes">
      <tr><th>Battery Brand</th><td>Power Zone</td></tr>
      <tr><th>Voltage</th><td>12V</td></tr>
    </table>
  </div>
  <section class="related products">
    <span class="price">KSh 1,999</span>
  </section>
</body></html>"#;

    fn parser() -> ProductDetailParser {
        ProductDetailParser::new(&SelectorConfig::default(), PriceSelectionPolicy::MedianFiltered, 100.0, "KES")
            .unwrap()
    }

    #[test]
    fn test_parse_full_product_page() {
        let fields = parser().parse(PRODUCT_PAGE, "https://shop.test/product/sdc-200/");

        assert_eq!(fields.text(FieldName::Name), Some("Solar Deep Cycle Battery 200Ah"));
        assert_eq!(fields.price(FieldName::Price), Some(&Price::new(28_500.0, "KES")));
        assert_eq!(fields.text(FieldName::Sku), Some("SDC-200"));
        assert_eq!(fields.text(FieldName::Brand), Some("Power Zone"));
        assert_eq!(fields.text(FieldName::Category), Some("Solar Batteries"));
        assert_eq!(fields.text(FieldName::StockStatus), Some("In stock"));
        assert!(fields
            .text(FieldName::Description)
            .is_some_and(|d| d.starts_with("Maintenance-free")));
        assert_eq!(
            fields.list(FieldName::Images),
            &[
                "https://shop.test/wp-content/uploads/battery-front.jpg".to_string(),
                "https://shop.test/wp-content/uploads/battery-side.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn test_placeholder_page_yields_nothing() {
        let fields = parser().parse("<html><body><h1>Oops</h1></body></html>", "https://shop.test/product/x/");
        assert!(fields.is_empty());
    }

    #[test]
    fn test_garbage_input_does_not_panic() {
        let fields = parser().parse("<<<>>> \u{0} <div", "not a url");
        assert!(fields.is_empty());
    }
}
