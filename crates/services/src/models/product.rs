use serde::{Deserialize, Serialize};

/// A product candidate returned by the search API (or the fallback catalog).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub title: String,
    pub description: Option<String>,
    pub price: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    pub asin: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
}

impl Product {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_asin(mut self, asin: impl Into<String>) -> Self {
        self.asin = Some(asin.into());
        self
    }

    pub fn with_stats(mut self, rating: f64, review_count: u64) -> Self {
        self.rating = Some(rating);
        self.review_count = Some(review_count);
        self
    }
}
