//! Affiliate Link Builder
//!
//! Pure functions: the same product and tag always produce the same link.

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use crate::models::product::Product;

const AMAZON_BASE: &str = "https://www.amazon.com";

lazy_static! {
    static ref ASIN_IN_PATH: Regex =
        Regex::new(r"(?i)/(?:dp|gp/product|gp/aw/d|exec/obidos/asin)/([A-Z0-9]{10})(?:[/?#]|$)")
            .unwrap();
}

/// A catalog category: matched by keyword, holding known-good products in
/// countdown order (best first).
pub struct CatalogEntry {
    pub keywords: &'static [&'static str],
    pub products: &'static [(&'static str, &'static str)],
}

/// Used when the search API returns nothing. Entries are checked in order
/// and the first match wins.
pub static FALLBACK_CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        keywords: &["gaming mouse", "gaming mice", "mouse", "mice"],
        products: &[
            ("Logitech G502 HERO High Performance Wired Gaming Mouse", "B07GBZ4Q68"),
            ("Razer DeathAdder V2 Gaming Mouse", "B082G5SPR5"),
            ("Logitech G PRO X SUPERLIGHT Wireless Gaming Mouse", "B087LXCTFJ"),
            ("SteelSeries Rival 3 Gaming Mouse", "B0835FZ8ZY"),
            ("Corsair Harpoon RGB Wireless Gaming Mouse", "B07HRL5K8S"),
        ],
    },
    CatalogEntry {
        keywords: &["keyboard", "keyboards"],
        products: &[
            ("Logitech G915 TKL Wireless Mechanical Gaming Keyboard", "B085RFFC9Q"),
            ("Razer BlackWidow V3 Mechanical Gaming Keyboard", "B08FQPF3W3"),
            ("Corsair K70 RGB MK.2 Mechanical Gaming Keyboard", "B07D5S5QKF"),
            ("SteelSeries Apex 3 RGB Gaming Keyboard", "B07ZGDPT4M"),
            ("Keychron K2 Wireless Mechanical Keyboard", "B07QBPDWLS"),
        ],
    },
    CatalogEntry {
        keywords: &["headphones", "headset", "headsets", "earbuds"],
        products: &[
            ("Sony WH-1000XM4 Wireless Noise Canceling Headphones", "B0863TXGM3"),
            ("HyperX Cloud II Gaming Headset", "B00SAYCXWG"),
            ("Apple AirPods Pro", "B0BDHWDR12"),
            ("SteelSeries Arctis 7 Wireless Gaming Headset", "B07FZVXSFQ"),
            ("Anker Soundcore Life Q20 Hybrid ANC Headphones", "B07NM3RSRQ"),
        ],
    },
    CatalogEntry {
        keywords: &["monitor", "monitors", "display"],
        products: &[
            ("LG 27GL83A-B 27 Inch Ultragear QHD IPS Gaming Monitor", "B07YGZL8XF"),
            ("Samsung Odyssey G7 32-Inch Curved Gaming Monitor", "B088HH6LW5"),
            ("ASUS TUF Gaming VG27AQ 27 Inch Monitor", "B07WRJV3C9"),
            ("Dell S2721DGF 27 Inch Gaming Monitor", "B08G8VFXWW"),
            ("Sceptre 24 Inch Curved 75Hz Monitor", "B07KXSR99Y"),
        ],
    },
];

/// 10 ASCII alphanumerics.
pub fn is_valid_asin(asin: &str) -> bool {
    asin.len() == 10 && asin.chars().all(|c| c.is_ascii_alphanumeric())
}

/// ASIN from a `/dp/`, `/gp/product/` style product URL.
pub fn extract_asin(url: &str) -> Option<String> {
    ASIN_IN_PATH
        .captures(url)
        .map(|caps| caps[1].to_ascii_uppercase())
}

/// Canonical product-detail link.
pub fn asin_link(asin: &str, tag: &str) -> String {
    format!(
        "{AMAZON_BASE}/dp/{}?tag={}",
        asin.to_ascii_uppercase(),
        urlencoding::encode(tag)
    )
}

pub fn search_link(query: &str, tag: &str) -> String {
    format!(
        "{AMAZON_BASE}/s?k={}&tag={}",
        urlencoding::encode(query.trim()),
        urlencoding::encode(tag)
    )
}

/// Set the `tag` query parameter, replacing an existing one in place and
/// keeping every other parameter. `None` when the URL does not parse.
pub fn with_tag(url: &str, tag: &str) -> Option<String> {
    let mut parsed = Url::parse(url.trim()).ok()?;

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut replaced = false;
    pairs.retain_mut(|(key, value)| {
        if key != "tag" {
            return true;
        }
        if replaced {
            return false;
        }
        *value = tag.to_string();
        replaced = true;
        true
    });
    if !replaced {
        pairs.push(("tag".to_string(), tag.to_string()));
    }

    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    Some(parsed.into())
}

/// Affiliate link for a product, tried in order: ASIN, product URL,
/// fallback catalog match on the title, search URL.
pub fn build_link(product: &Product, tag: &str) -> String {
    if let Some(asin) = product.asin.as_deref().map(str::trim).filter(|a| is_valid_asin(a)) {
        return asin_link(asin, tag);
    }

    if let Some(link) = product.url.as_deref().and_then(|url| with_tag(url, tag)) {
        return link;
    }

    if let Some((_, asin)) = match_catalog(&product.title).and_then(|entry| entry.products.first()) {
        return asin_link(asin, tag);
    }

    search_link(&product.title, tag)
}

/// First catalog entry with a keyword whose words all appear in `text`.
pub fn match_catalog(text: &str) -> Option<&'static CatalogEntry> {
    let words = words(text);
    if words.is_empty() {
        return None;
    }
    FALLBACK_CATALOG.iter().find(|entry| {
        entry.keywords.iter().any(|keyword| {
            let wanted = self::words(keyword);
            !wanted.is_empty() && wanted.iter().all(|w| words.contains(w))
        })
    })
}

/// Catalog products for a query, best first.
pub fn fallback_products(query: &str, count: usize) -> Vec<Product> {
    let Some(entry) = match_catalog(query) else {
        tracing::debug!("[AFFILIATE] No fallback catalog entry for '{}'", query);
        return Vec::new();
    };

    entry
        .products
        .iter()
        .take(count)
        .map(|(title, asin)| {
            let mut product = Product::new(*title).with_asin(*asin);
            product.url = Some(format!("{AMAZON_BASE}/dp/{asin}"));
            product
        })
        .collect()
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAG: &str = "mytag-20";

    #[test]
    fn test_asin_link_contains_asin_and_tag() {
        let product = Product::new("Mouse").with_asin("B07GBZ4Q68");
        let link = build_link(&product, TAG);
        assert_eq!(link, "https://www.amazon.com/dp/B07GBZ4Q68?tag=mytag-20");

        let parsed = Url::parse(&link).unwrap();
        assert!(parsed.path().contains("B07GBZ4Q68"));
        assert!(parsed.query_pairs().any(|(k, v)| k == "tag" && v == TAG));
    }

    #[test]
    fn test_build_link_is_deterministic() {
        let products = [
            Product::new("Mouse").with_asin("b07gbz4q68"),
            Product {
                url: Some("https://www.amazon.com/foo?ref=sr_1".into()),
                ..Product::new("Thing")
            },
            Product::new("Best Gaming Mice 2025"),
            Product::new("Something obscure"),
        ];
        for product in &products {
            let first = build_link(product, TAG);
            for _ in 0..10 {
                assert_eq!(build_link(product, TAG), first);
            }
        }
    }

    #[test]
    fn test_url_tag_is_set_or_replaced() {
        let product = Product {
            url: Some("https://www.amazon.com/Some-Mouse/dp/B000?ref=sr_1&tag=old-20&th=1".into()),
            ..Product::new("Mouse")
        };
        assert_eq!(
            build_link(&product, TAG),
            "https://www.amazon.com/Some-Mouse/dp/B000?ref=sr_1&tag=mytag-20&th=1"
        );

        assert_eq!(
            with_tag("https://www.amazon.com/s?k=mouse", TAG).as_deref(),
            Some("https://www.amazon.com/s?k=mouse&tag=mytag-20")
        );
        assert_eq!(
            with_tag("https://a.co/x?tag=a&tag=b", TAG).as_deref(),
            Some("https://a.co/x?tag=mytag-20")
        );
        assert!(with_tag("not a url", TAG).is_none());
    }

    #[test]
    fn test_invalid_asin_falls_through_to_url() {
        let product = Product {
            asin: Some("short".into()),
            url: Some("https://www.amazon.com/dp/B07GBZ4Q68".into()),
            ..Product::new("Mouse")
        };
        assert_eq!(
            build_link(&product, TAG),
            "https://www.amazon.com/dp/B07GBZ4Q68?tag=mytag-20"
        );
    }

    #[test]
    fn test_catalog_then_search_fallback() {
        let link = build_link(&Product::new("Top 5 Gaming Mice"), TAG);
        assert_eq!(link, "https://www.amazon.com/dp/B07GBZ4Q68?tag=mytag-20");

        let link = build_link(&Product::new("Best Air Fryers"), TAG);
        assert_eq!(link, "https://www.amazon.com/s?k=Best%20Air%20Fryers&tag=mytag-20");
    }

    #[test]
    fn test_catalog_requires_whole_words() {
        assert!(match_catalog("Mousepad deals").is_none());
        assert!(match_catalog("WIRELESS HEADPHONES").is_some());
        assert!(match_catalog("").is_none());
    }

    #[test]
    fn test_fallback_products() {
        let products = fallback_products("Top 5 Gaming Mice", 3);
        assert_eq!(products.len(), 3);
        assert_eq!(products[0].asin.as_deref(), Some("B07GBZ4Q68"));
        assert!(products.iter().all(|p| p.url.is_some()));

        assert!(fallback_products("Best Air Fryers", 5).is_empty());
    }

    #[test]
    fn test_extract_asin() {
        assert_eq!(
            extract_asin("https://www.amazon.com/Logitech-G502/dp/B07GBZ4Q68/ref=sr_1_3").as_deref(),
            Some("B07GBZ4Q68")
        );
        assert_eq!(
            extract_asin("https://www.amazon.com/gp/product/b082g5spr5?th=1").as_deref(),
            Some("B082G5SPR5")
        );
        assert!(extract_asin("https://www.amazon.com/s?k=mouse").is_none());
        assert!(extract_asin("https://www.amazon.com/dp/B07GBZ4Q68EXTRA").is_none());
    }
}
