//! `PageExtractor` backed by CSS selectors

use super::config::SelectorConfig;
use super::price::PriceLocator;
use super::product_detail_parser::ProductDetailParser;
use super::product_list_parser::ProductListParser;
use super::ParsingResult;
use crate::domain::ports::PageExtractor;
use crate::domain::product::FieldMap;
use crate::infrastructure::config::ExtractionConfig;

pub struct CssPageExtractor {
    detail: ProductDetailParser,
    listing: ProductListParser,
    card_price: PriceLocator,
}

impl CssPageExtractor {
    pub fn new(selectors: &SelectorConfig, config: &ExtractionConfig) -> ParsingResult<Self> {
        Ok(Self {
            detail: ProductDetailParser::new(
                selectors,
                config.price_policy,
                config.min_plausible_price,
                &config.default_currency,
            )?,
            listing: ProductListParser::new(selectors)?,
            // 카드 가격은 최소 금액 필터 없이 첫 번째 값 사용
            card_price: PriceLocator::new(selectors, config.price_policy, 0.0, &config.default_currency)?,
        })
    }

    pub fn from_config(config: &ExtractionConfig) -> ParsingResult<Self> {
        Self::new(&SelectorConfig::default(), config)
    }
}

impl PageExtractor for CssPageExtractor {
    fn extract_fields(&self, html: &str, page_url: &str) -> FieldMap {
        self.detail.parse(html, page_url)
    }

    fn extract_links(&self, html: &str, page_url: &str) -> Vec<String> {
        self.listing.extract_links(html, page_url)
    }

    fn extract_listing_items(&self, html: &str, page_url: &str) -> Vec<FieldMap> {
        self.listing.extract_cards(html, page_url, &self.card_price)
    }
}
