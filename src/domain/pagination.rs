//! Listing page URL generation

use url::Url;

const PAGE_PLACEHOLDER: &str = "{page}";

/// Builds the URL of listing page N (1-based) from the crawl's start URL.
///
/// - `https://shop.test/catalog/page/{page}/` substitutes the placeholder
/// - otherwise page 1 is the start URL itself and page N appends `page=N`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingUrlTemplate {
    start_url: String,
}

impl ListingUrlTemplate {
    pub fn parse(start_url: &str) -> Result<Self, url::ParseError> {
        let start_url = start_url.trim();
        // 플레이스홀더는 URL 검증 전에 임시 값으로 치환
        Url::parse(&start_url.replace(PAGE_PLACEHOLDER, "1"))?;
        Ok(Self {
            start_url: start_url.to_string(),
        })
    }

    pub fn start_url(&self) -> &str {
        &self.start_url
    }

    pub fn page_url(&self, page: u32) -> String {
        if self.start_url.contains(PAGE_PLACEHOLDER) {
            return self.start_url.replace(PAGE_PLACEHOLDER, &page.to_string());
        }
        if page <= 1 {
            return self.start_url.clone();
        }
        let separator = if self.start_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}page={page}", self.start_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://shop.test/shop/", 1, "https://shop.test/shop/")]
    #[case("https://shop.test/shop/", 2, "https://shop.test/shop/?page=2")]
    #[case("https://shop.test/shop/?orderby=price", 3, "https://shop.test/shop/?orderby=price&page=3")]
    #[case("https://shop.test/shop/page/{page}/", 1, "https://shop.test/shop/page/1/")]
    #[case("https://shop.test/shop/page/{page}/", 7, "https://shop.test/shop/page/7/")]
    fn test_page_url(#[case] start: &str, #[case] page: u32, #[case] expected: &str) {
        let template = ListingUrlTemplate::parse(start).unwrap();
        assert_eq!(template.page_url(page), expected);
    }

    #[test]
    fn test_rejects_relative_url() {
        assert!(ListingUrlTemplate::parse("/shop/").is_err());
    }
}
