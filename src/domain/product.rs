//! 상품 레코드 도메인 모델
//!
//! Scraped product records, extracted field maps and the keys used for deduplication.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Parsed price with its currency code (e.g. "KES", "USD")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: f64,
    pub currency: String,
}

impl Price {
    pub fn new(amount: f64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.2}", self.currency, self.amount)
    }
}

/// Field names produced by the extraction collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    SourceUrl,
    Name,
    Price,
    RawPriceText,
    Sku,
    Brand,
    Category,
    Description,
    Images,
    StockStatus,
}

/// Value of an extracted field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Money(Price),
}

impl FieldValue {
    /// Empty text or an empty list counts as "nothing found"
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Money(_) => false,
        }
    }
}

/// Field name → value mapping returned by a page extractor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    fields: BTreeMap<FieldName, FieldValue>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the value unless it is empty
    pub fn insert(&mut self, name: FieldName, value: FieldValue) {
        if !value.is_empty() {
            self.fields.insert(name, value);
        }
    }

    pub fn insert_text(&mut self, name: FieldName, text: impl Into<String>) {
        self.insert(name, FieldValue::Text(text.into()));
    }

    #[must_use]
    pub fn with_text(mut self, name: FieldName, text: impl Into<String>) -> Self {
        self.insert_text(name, text);
        self
    }

    pub fn get(&self, name: FieldName) -> Option<&FieldValue> {
        self.fields.get(&name)
    }

    pub fn text(&self, name: FieldName) -> Option<&str> {
        match self.fields.get(&name) {
            Some(FieldValue::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn list(&self, name: FieldName) -> &[String] {
        match self.fields.get(&name) {
            Some(FieldValue::List(items)) => items,
            _ => &[],
        }
    }

    pub fn price(&self, name: FieldName) -> Option<&Price> {
        match self.fields.get(&name) {
            Some(FieldValue::Money(price)) => Some(price),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A single scraped product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub source_url: String,
    pub name: String,
    pub price: Option<Price>,
    pub raw_price_text: Option<String>,
    pub sku: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub stock_status: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

impl ProductRecord {
    /// Minimal record with only the mandatory fields
    pub fn new(source_url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            name: name.into(),
            price: None,
            raw_price_text: None,
            sku: None,
            brand: None,
            category: None,
            description: None,
            images: Vec::new(),
            stock_status: None,
            scraped_at: Utc::now(),
        }
    }

    /// Builds a record from extracted fields.
    ///
    /// Returns `None` when no name was extracted. The record's source URL is the
    /// extracted `source_url` field when present (listing cards), else `page_url`.
    pub fn from_fields(page_url: &str, fields: &FieldMap, scraped_at: DateTime<Utc>) -> Option<Self> {
        let name = fields.text(FieldName::Name).map(str::trim).filter(|n| !n.is_empty())?;
        let source_url = fields
            .text(FieldName::SourceUrl)
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(page_url);
        let optional = |field| {
            fields
                .text(field)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToString::to_string)
        };

        Some(Self {
            source_url: source_url.trim().to_string(),
            name: name.to_string(),
            price: fields.price(FieldName::Price).cloned(),
            raw_price_text: optional(FieldName::RawPriceText),
            sku: optional(FieldName::Sku),
            brand: optional(FieldName::Brand),
            category: optional(FieldName::Category),
            description: optional(FieldName::Description),
            images: fields.list(FieldName::Images).to_vec(),
            stock_status: optional(FieldName::StockStatus),
            scraped_at,
        })
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::for_record(&self.source_url, &self.name)
    }
}

/// Identity of a product within a crawl run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DedupKey {
    Url(String),
    Name(String),
}

impl DedupKey {
    /// URL key when the URL is non-empty, name key otherwise
    pub fn for_record(source_url: &str, name: &str) -> Self {
        let url = normalize_url(source_url);
        if url.is_empty() {
            Self::Name(normalize_name(name))
        } else {
            Self::Url(url)
        }
    }

    pub fn for_url(url: &str) -> Self {
        Self::Url(normalize_url(url))
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "url:{url}"),
            Self::Name(name) => write!(f, "name:{name}"),
        }
    }
}

impl FromStr for DedupKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("url", rest)) => Ok(Self::Url(rest.to_string())),
            Some(("name", rest)) => Ok(Self::Name(rest.to_string())),
            _ => Err(format!("Invalid dedup key: {s}")),
        }
    }
}

impl From<DedupKey> for String {
    fn from(key: DedupKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for DedupKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Trims, drops the fragment and any trailing slash.
/// Scheme and host are lowercased by the URL parser.
fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let normalized = match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => trimmed.to_string(),
    };
    normalized.trim_end_matches('/').to_string()
}

fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_requires_name() {
        let fields = FieldMap::new().with_text(FieldName::Sku, "AB-1");
        assert!(ProductRecord::from_fields("https://shop.test/product/a", &fields, Utc::now()).is_none());

        let fields = fields.with_text(FieldName::Name, "  Solar Panel 100W ");
        let record = ProductRecord::from_fields("https://shop.test/product/a", &fields, Utc::now())
            .expect("record with name");
        assert_eq!(record.name, "Solar Panel 100W");
        assert_eq!(record.sku.as_deref(), Some("AB-1"));
        assert_eq!(record.source_url, "https://shop.test/product/a");
    }

    #[test]
    fn test_listing_card_source_url_wins() {
        let fields = FieldMap::new()
            .with_text(FieldName::Name, "Inverter")
            .with_text(FieldName::SourceUrl, "https://shop.test/product/inverter");
        let record = ProductRecord::from_fields("https://shop.test/shop?page=2", &fields, Utc::now()).unwrap();
        assert_eq!(record.source_url, "https://shop.test/product/inverter");
    }

    #[test]
    fn test_empty_values_are_not_inserted() {
        let mut fields = FieldMap::new();
        fields.insert_text(FieldName::Brand, "   ");
        fields.insert(FieldName::Images, FieldValue::List(Vec::new()));
        assert!(fields.is_empty());
    }

    #[test]
    fn test_dedup_key_normalization() {
        assert_eq!(
            DedupKey::for_record("  https://Shop.Test/product/a/#reviews ", "x"),
            DedupKey::Url("https://shop.test/product/a".to_string())
        );
        assert_eq!(
            DedupKey::for_record("", "  Deep  Cycle\tBattery "),
            DedupKey::Name("deep cycle battery".to_string())
        );
    }

    #[test]
    fn test_dedup_key_string_form() {
        let key = DedupKey::Url("https://shop.test/product/a".to_string());
        assert_eq!(key.to_string(), "url:https://shop.test/product/a");
        assert_eq!("url:https://shop.test/product/a".parse::<DedupKey>().unwrap(), key);
        assert_eq!("name:lamp".parse::<DedupKey>().unwrap(), DedupKey::Name("lamp".to_string()));
        assert!("sku:123".parse::<DedupKey>().is_err());

        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"url:https://shop.test/product/a\"");
    }
}
