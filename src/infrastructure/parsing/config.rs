//! Parsing configuration for HTML extraction
//!
//! Centralized CSS selector lists. Each list is an ordered fallback chain.

use serde::{Deserialize, Serialize};

/// Selector lists for detail pages, listing pages and listing cards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub name: Vec<String>,
    /// Containers that hold the main product's price (preferred over page-wide matches)
    pub main_product_area: Vec<String>,
    pub price: Vec<String>,
    /// Class fragments marking related / upsell blocks whose prices are ignored
    pub excluded_price_containers: Vec<String>,
    pub sku: Vec<String>,
    pub brand: Vec<String>,
    /// Attribute table rows scanned for a "brand" label
    pub brand_rows: Vec<String>,
    pub category: Vec<String>,
    pub stock: Vec<String>,
    pub description: Vec<String>,
    pub images: Vec<String>,
    pub image_attributes: Vec<String>,

    /// Product detail links on listing pages
    pub product_links: Vec<String>,
    /// A link must contain this path fragment to count as a product link
    pub product_link_marker: String,
    /// Links containing any of these fragments are skipped
    pub excluded_link_fragments: Vec<String>,

    /// Product card containers on listing pages
    pub listing_cards: Vec<String>,
    pub card_name: Vec<String>,
    pub card_price: Vec<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            name: strings(&[
                "h1.entry-title",
                "h1.product_title",
                "h1.product-title",
                ".product_title",
                ".entry-title",
                "h1",
            ]),
            main_product_area: strings(&[
                ".single-product-wrapper",
                ".product-detail",
                ".entry-summary",
                ".summary",
                ".single-product",
            ]),
            price: strings(&[
                ".woocommerce-Price-amount bdi",
                ".woocommerce-Price-amount",
                ".price .amount",
                ".price bdi",
                ".price",
            ]),
            excluded_price_containers: strings(&[
                "related",
                "upsell",
                "cross-sell",
                "cart",
                "sidebar",
                "widget",
            ]),
            sku: strings(&[".sku", ".product_meta .sku", "[data-sku]", ".product-sku"]),
            brand: strings(&[".brand", ".product_meta .brand", "[data-brand]", ".product-brand"]),
            brand_rows: strings(&[
                ".woocommerce-product-attributes tr",
                ".shop_attributes tr",
                "table tr",
            ]),
            category: strings(&[
                ".breadcrumb a:last-of-type",
                ".woocommerce-breadcrumb a:last-of-type",
                ".posted_in a",
                ".category a",
                ".product-category",
                "[rel=\"tag\"]",
            ]),
            stock: strings(&[".stock", ".in-stock", ".availability", ".stock-status"]),
            description: strings(&[
                ".woocommerce-product-details__short-description",
                ".product-description",
                ".entry-summary p",
                ".product-short-description",
                ".description",
            ]),
            images: strings(&[
                ".woocommerce-product-gallery__image img",
                ".product-images img",
                ".wp-post-image",
                ".product-gallery img",
            ]),
            image_attributes: strings(&["src", "data-src", "data-large_image"]),

            product_links: strings(&[
                "a[href*=\"/product/\"]",
                ".woocommerce-loop-product__link[href]",
                ".product-item a[href]",
                "h2 a[href]",
            ]),
            product_link_marker: "/product/".to_string(),
            excluded_link_fragments: strings(&["add-to-cart", "filter", "page=", "orderby=", "category"]),

            listing_cards: strings(&[".product-item", "li.product", ".product-small", ".product"]),
            card_name: strings(&[
                ".woocommerce-loop-product__title",
                ".product-title",
                ".product-name",
                "h2",
                "h3",
                ".title",
            ]),
            card_price: strings(&[".woocommerce-Price-amount", ".price", ".amount"]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}
