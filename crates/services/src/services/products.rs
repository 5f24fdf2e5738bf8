//! Product Data Fetcher: Amazon search through the Rainforest scraping API,
//! plus the ranking rules applied to whatever comes back.

use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use backon::Retryable;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use super::{
    config::{RainforestConfig, RetryConfig},
    http::{self, ErrorClass},
};
use crate::models::product::Product;

/// Extra result pages requested when the first page ranks too few products.
const MAX_PAGES: u32 = 2;

#[derive(Debug, Error)]
pub enum ProductSearchError {
    #[error("Rainforest API key not configured")]
    NotConfigured,
    #[error("Rainforest API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Rainforest request was not successful: {0}")]
    Unsuccessful(String),
    #[error("Rainforest response parse error: {0}")]
    Parse(String),
    #[error("HTTP request error: {0}")]
    Request(String, ErrorClass),
}

impl ProductSearchError {
    pub fn should_retry(&self) -> bool {
        match self {
            ProductSearchError::Api { status, .. } => ErrorClass::from_status(*status).is_transient(),
            ProductSearchError::Request(_, class) => class.is_transient(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProductSearchError {
    fn from(err: reqwest::Error) -> Self {
        let class = ErrorClass::from_reqwest(&err);
        ProductSearchError::Request(err.to_string(), class)
    }
}

#[async_trait]
pub trait ProductSearch: Send + Sync {
    /// One page of raw search results, unranked.
    async fn search(&self, query: &str, page: u32) -> Result<Vec<Product>, ProductSearchError>;
}

pub struct RainforestClient {
    client: Client,
    api_key: String,
    endpoint: String,
    amazon_domain: String,
    retry: RetryConfig,
}

impl RainforestClient {
    pub fn new(
        config: &RainforestConfig,
        timeout_secs: u64,
        retry: RetryConfig,
    ) -> Result<Self, ProductSearchError> {
        if config.api_key.trim().is_empty() {
            return Err(ProductSearchError::NotConfigured);
        }
        Ok(Self {
            client: http::build_client(timeout_secs)?,
            api_key: config.api_key.clone(),
            endpoint: config.endpoint.clone(),
            amazon_domain: config.amazon_domain.clone(),
            retry,
        })
    }

    async fn search_once(&self, query: &str, page: u32) -> Result<Vec<Product>, ProductSearchError> {
        let page = page.max(1).to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("type", "search"),
                ("amazon_domain", self.amazon_domain.as_str()),
                ("search_term", query),
                ("page", page.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = http::failure_parts(response).await;
            return Err(ProductSearchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProductSearchError::Parse(e.to_string()))?;

        if body["request_info"]["success"].as_bool() == Some(false) {
            let message = body["request_info"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            return Err(ProductSearchError::Unsuccessful(message));
        }

        Ok(parse_search_results(&body))
    }
}

#[async_trait]
impl ProductSearch for RainforestClient {
    async fn search(&self, query: &str, page: u32) -> Result<Vec<Product>, ProductSearchError> {
        (|| async { self.search_once(query, page).await })
            .retry(http::backoff(&self.retry))
            .when(ProductSearchError::should_retry)
            .notify(|err: &ProductSearchError, dur: Duration| {
                tracing::warn!(
                    "[PRODUCTS] Rainforest search failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    err
                );
            })
            .await
    }
}

/// Products from a Rainforest `type=search` response. Entries without a
/// title are dropped.
pub fn parse_search_results(body: &Value) -> Vec<Product> {
    body["search_results"]
        .as_array()
        .map(|items| items.iter().filter_map(parse_product).collect())
        .unwrap_or_default()
}

fn parse_product(item: &Value) -> Option<Product> {
    let title = item["title"].as_str()?.trim();
    if title.is_empty() {
        return None;
    }

    let review_count = ["ratings_total", "reviews_total", "review_count", "reviews"]
        .iter()
        .find_map(|key| parse_count(&item[*key]));

    Some(Product {
        title: title.to_string(),
        description: non_empty(&item["snippet"]).or_else(|| non_empty(&item["description"])),
        price: parse_price(&item["price"]).or_else(|| parse_price(&item["prices"][0])),
        rating: parse_rating(&item["rating"]),
        review_count,
        asin: non_empty(&item["asin"]),
        url: non_empty(&item["link"]).or_else(|| non_empty(&item["url"])),
        image_url: non_empty(&item["image"]).or_else(|| non_empty(&item["thumbnail"])),
    })
}

fn non_empty(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `4.5`, `"4.5"` or `"4.5 out of 5 stars"`.
fn parse_rating(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.split_whitespace().next()?.parse().ok(),
        _ => None,
    }
}

/// `12345`, `"12,345"`, `"12.3K"`.
fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .trim_matches(['(', ')'])
                .chars()
                .filter(|c| !matches!(c, ',' | '_' | ' '))
                .collect();
            let (digits, multiplier) = match cleaned.strip_suffix(['K', 'k']) {
                Some(rest) => (rest, 1_000.0),
                None => match cleaned.strip_suffix(['M', 'm']) {
                    Some(rest) => (rest, 1_000_000.0),
                    None => (cleaned.as_str(), 1.0),
                },
            };
            digits.parse::<f64>().ok().map(|n| (n * multiplier).round() as u64)
        }
        _ => None,
    }
}

/// Price object (`raw`, or `value` + `currency`) or a plain string.
fn parse_price(value: &Value) -> Option<String> {
    match value {
        Value::Object(obj) => obj
            .get("raw")
            .and_then(non_empty)
            .or_else(|| {
                let amount = obj.get("value")?.as_f64()?;
                Some(match obj.get("symbol").and_then(|s| s.as_str()) {
                    Some(symbol) => format!("{symbol}{amount:.2}"),
                    None => match obj.get("currency").and_then(|c| c.as_str()) {
                        Some(currency) => format!("{amount:.2} {currency}"),
                        None => format!("{amount:.2}"),
                    },
                })
            }),
        Value::String(_) => non_empty(value),
        Value::Number(n) => n.as_f64().map(|amount| format!("{amount:.2}")),
        _ => None,
    }
}

/// Composite ranking score, monotonic in both inputs.
pub fn score(rating: f64, review_count: u64) -> f64 {
    rating * 100.0 + review_count as f64 / 1000.0
}

fn product_score(product: &Product) -> f64 {
    score(product.rating.unwrap_or(0.0), product.review_count.unwrap_or(0))
}

/// Keep the first product per ASIN; products without one are kept.
pub fn dedupe_by_asin(products: Vec<Product>) -> Vec<Product> {
    let mut seen = HashSet::new();
    products
        .into_iter()
        .filter(|p| match &p.asin {
            Some(asin) => seen.insert(asin.to_ascii_uppercase()),
            None => true,
        })
        .collect()
}

/// Drop products under `min_reviews`, sort by score descending (stable, so
/// ties keep input order) and keep the top `count`.
pub fn rank_products(products: Vec<Product>, min_reviews: u64, count: usize) -> Vec<Product> {
    let mut eligible: Vec<Product> = products
        .into_iter()
        .filter(|p| p.review_count.unwrap_or(0) >= min_reviews)
        .collect();
    eligible.sort_by(|a, b| product_score(b).total_cmp(&product_score(a)));
    eligible.truncate(count);
    eligible
}

pub struct ProductFetcher {
    search: Arc<dyn ProductSearch>,
    min_reviews: u64,
}

impl ProductFetcher {
    pub fn new(search: Arc<dyn ProductSearch>, min_reviews: u64) -> Self {
        Self { search, min_reviews }
    }

    /// Up to `count` ranked products. API failures yield an empty list.
    pub async fn fetch(&self, query: &str, count: usize) -> Vec<Product> {
        let mut candidates = Vec::new();

        for page in 1..=MAX_PAGES {
            match self.search.search(query, page).await {
                Ok(products) if products.is_empty() => break,
                Ok(products) => {
                    tracing::debug!(
                        "[PRODUCTS] Page {} returned {} results for '{}'",
                        page,
                        products.len(),
                        query
                    );
                    candidates.extend(products);
                }
                Err(e) => {
                    tracing::warn!("[PRODUCTS] Search page {} failed for '{}': {}", page, query, e);
                    break;
                }
            }

            let eligible = candidates
                .iter()
                .filter(|p| p.review_count.unwrap_or(0) >= self.min_reviews)
                .count();
            if eligible >= count {
                break;
            }
        }

        let ranked = rank_products(dedupe_by_asin(candidates), self.min_reviews, count);
        tracing::info!("[PRODUCTS] Ranked {} products for '{}'", ranked.len(), query);
        ranked
    }
}
