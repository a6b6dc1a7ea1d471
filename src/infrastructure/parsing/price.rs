//! Price parsing and selection
//!
//! Candidates are collected stage by stage (JSON-LD, main product area,
//! page-wide with related/upsell blocks skipped). The first stage that yields
//! anything is handed to the configured `PriceSelectionPolicy`.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::SelectorConfig;
use super::{collapse_whitespace, compile_selectors, ParsingResult};
use crate::domain::product::Price;

const NUMBER: &str = r"([0-9][0-9,]*(?:\.[0-9]{1,2})?)";

/// Ancestor levels inspected for excluded container classes
const ANCESTOR_DEPTH: usize = 5;

/// How a single price is chosen among candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSelectionPolicy {
    /// First plausible candidate in document order
    FirstValid,
    /// When candidates spread widely, drop outliers around the median first
    #[default]
    MedianFiltered,
}

/// A price found on the page together with the text it came from
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCandidate {
    pub price: Price,
    pub raw_text: String,
}

impl PriceSelectionPolicy {
    pub fn select(self, candidates: &[PriceCandidate], min_plausible: f64) -> Option<PriceCandidate> {
        let valid: Vec<&PriceCandidate> = candidates
            .iter()
            .filter(|c| c.price.amount > min_plausible)
            .collect();
        let first = (*valid.first()?).clone();

        match self {
            Self::FirstValid => Some(first),
            Self::MedianFiltered => {
                if valid.len() == 1 {
                    return Some(first);
                }
                let mut amounts: Vec<f64> = valid.iter().map(|c| c.price.amount).collect();
                amounts.sort_by(f64::total_cmp);
                let (low, high) = (amounts[0], amounts[amounts.len() - 1]);
                if high - low <= low * 0.5 {
                    return Some(first);
                }
                // upper median
                let median = amounts[amounts.len() / 2];
                valid
                    .iter()
                    .find(|c| (c.price.amount - median).abs() < median * 0.3)
                    .map_or(Some(first), |c| Some((*c).clone()))
            }
        }
    }
}

/// Parses price text such as `KSh 4,500.00`, `$19.99` or `£7`
pub struct PriceParser {
    marked: Vec<(Regex, &'static str)>,
    bare: Regex,
    default_currency: String,
}

impl PriceParser {
    pub fn new(default_currency: &str) -> ParsingResult<Self> {
        let marked = vec![
            (Regex::new(&format!(r"(?i)(?:KES|KSh)\.?\s*{NUMBER}"))?, "KES"),
            (Regex::new(&format!(r"(?i){NUMBER}\s*(?:KES|KSh)"))?, "KES"),
            (Regex::new(&format!(r"(?:USD|US\$|\$)\s*{NUMBER}"))?, "USD"),
            (Regex::new(&format!(r"(?:EUR|€)\s*{NUMBER}"))?, "EUR"),
            (Regex::new(&format!(r"(?:GBP|£)\s*{NUMBER}"))?, "GBP"),
            (Regex::new(&format!(r"(?:JPY|¥)\s*{NUMBER}"))?, "JPY"),
        ];
        Ok(Self {
            marked,
            bare: Regex::new(&format!(r"^\s*{NUMBER}\s*$"))?,
            default_currency: default_currency.to_string(),
        })
    }

    /// Only text carrying a currency marker
    pub fn parse_marked(&self, text: &str) -> Option<Price> {
        self.marked.iter().find_map(|(pattern, currency)| {
            let amount = parse_amount(pattern.captures(text)?.get(1)?.as_str())?;
            Some(Price::new(amount, *currency))
        })
    }

    /// Marked text, or a bare number in the default currency
    pub fn parse(&self, text: &str) -> Option<Price> {
        self.parse_marked(text).or_else(|| {
            let amount = parse_amount(self.bare.captures(text)?.get(1)?.as_str())?;
            Some(Price::new(amount, self.default_currency.clone()))
        })
    }

    fn json_value(&self, value: &Value, currency: Option<&str>) -> Option<PriceCandidate> {
        let raw_text = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let mut price = self.parse(&raw_text)?;
        if let Some(currency) = currency.filter(|c| !c.is_empty()) {
            price.currency = currency.to_uppercase();
        }
        Some(PriceCandidate { price, raw_text })
    }
}

fn parse_amount(digits: &str) -> Option<f64> {
    digits
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|amount| *amount > 0.0)
}

/// Finds the main product price on a detail page
pub struct PriceLocator {
    parser: PriceParser,
    policy: PriceSelectionPolicy,
    min_plausible: f64,
    json_ld: Selector,
    main_areas: Vec<Selector>,
    price_selectors: Vec<Selector>,
    excluded_containers: Vec<String>,
}

impl PriceLocator {
    pub fn new(
        selectors: &SelectorConfig,
        policy: PriceSelectionPolicy,
        min_plausible: f64,
        default_currency: &str,
    ) -> ParsingResult<Self> {
        Ok(Self {
            parser: PriceParser::new(default_currency)?,
            policy,
            min_plausible,
            json_ld: compile_selectors(&["script[type=\"application/ld+json\"]".to_string()])?
                .remove(0),
            main_areas: compile_selectors(&selectors.main_product_area)?,
            price_selectors: compile_selectors(&selectors.price)?,
            excluded_containers: selectors
                .excluded_price_containers
                .iter()
                .map(|c| c.to_lowercase())
                .collect(),
        })
    }

    pub fn parser(&self) -> &PriceParser {
        &self.parser
    }

    pub fn locate(&self, document: &Html) -> Option<PriceCandidate> {
        let stages: [&dyn Fn() -> Vec<PriceCandidate>; 3] = [
            &|| self.from_structured_data(document),
            &|| self.from_main_area(document),
            &|| self.from_whole_page(document),
        ];
        stages.iter().find_map(|stage| {
            let candidates = stage();
            if candidates.is_empty() {
                None
            } else {
                self.policy.select(&candidates, self.min_plausible)
            }
        })
    }

    /// First parseable price under the given selectors (listing cards)
    pub fn first_in(&self, scope: ElementRef<'_>, selectors: &[Selector]) -> Option<PriceCandidate> {
        selectors.iter().find_map(|selector| {
            scope.select(selector).find_map(|element| {
                let raw_text = collapse_whitespace(&element.text().collect::<String>());
                let price = self.parser.parse(&raw_text)?;
                Some(PriceCandidate { price, raw_text })
            })
        })
    }

    fn from_structured_data(&self, document: &Html) -> Vec<PriceCandidate> {
        let mut candidates = Vec::new();
        for script in document.select(&self.json_ld) {
            let body = script.text().collect::<String>();
            match serde_json::from_str::<Value>(&body) {
                Ok(data) => self.collect_products(&data, &mut candidates),
                Err(e) => tracing::debug!("Skipping unreadable JSON-LD block: {}", e),
            }
        }
        candidates
    }

    fn collect_products(&self, data: &Value, out: &mut Vec<PriceCandidate>) {
        match data {
            Value::Array(items) => {
                for item in items {
                    self.collect_products(item, out);
                }
            }
            Value::Object(map) => {
                if let Some(graph) = map.get("@graph") {
                    self.collect_products(graph, out);
                }
                if is_product(data) {
                    if let Some(offers) = map.get("offers") {
                        self.collect_offers(offers, out);
                    }
                }
            }
            _ => {}
        }
    }

    fn collect_offers(&self, offers: &Value, out: &mut Vec<PriceCandidate>) {
        let offers: Vec<&Value> = match offers {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for offer in offers {
            let currency = offer.get("priceCurrency").and_then(Value::as_str);
            if let Some(candidate) = offer.get("price").and_then(|p| self.parser.json_value(p, currency)) {
                out.push(candidate);
                continue;
            }
            let specs: Vec<&Value> = match offer.get("priceSpecification") {
                Some(Value::Array(items)) => items.iter().collect(),
                Some(spec) => vec![spec],
                None => Vec::new(),
            };
            // 오퍼당 첫 번째 가격만 사용
            if let Some(candidate) = specs.into_iter().find_map(|spec| {
                let currency = spec.get("priceCurrency").and_then(Value::as_str).or(currency);
                spec.get("price").and_then(|p| self.parser.json_value(p, currency))
            }) {
                out.push(candidate);
            }
        }
    }

    fn from_main_area(&self, document: &Html) -> Vec<PriceCandidate> {
        let Some(area) = self
            .main_areas
            .iter()
            .find_map(|selector| document.select(selector).next())
        else {
            return Vec::new();
        };
        self.marked_prices(area, false)
    }

    fn from_whole_page(&self, document: &Html) -> Vec<PriceCandidate> {
        self.marked_prices(document.root_element(), true)
    }

    fn marked_prices(&self, scope: ElementRef<'_>, skip_excluded: bool) -> Vec<PriceCandidate> {
        let mut candidates = Vec::new();
        for selector in &self.price_selectors {
            for element in scope.select(selector) {
                if skip_excluded && self.in_excluded_container(element) {
                    continue;
                }
                let raw_text = collapse_whitespace(&element.text().collect::<String>());
                if let Some(price) = self.parser.parse_marked(&raw_text) {
                    candidates.push(PriceCandidate { price, raw_text });
                }
            }
        }
        candidates
    }

    fn in_excluded_container(&self, element: ElementRef<'_>) -> bool {
        element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .take(ANCESTOR_DEPTH)
            .any(|ancestor| {
                ancestor.value().classes().any(|class| {
                    let class = class.to_lowercase();
                    self.excluded_containers.iter().any(|skip| class.contains(skip.as_str()))
                })
            })
    }
}

fn is_product(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(kind)) => kind == "Product",
        Some(Value::Array(kinds)) => kinds.iter().any(|k| k.as_str() == Some("Product")),
        _ => false,
    }
}
