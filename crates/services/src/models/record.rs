//! Typed pipeline record and its Airtable column mapping
//!
//! `Record::from_fields` and `RecordUpdate::to_fields` are the only places that
//! know column names; every other module works with the typed structs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{Display, EnumString};

use super::product::Product;

/// Number of countdown slots in a record.
pub const PRODUCT_SLOTS: usize = 5;

/// Airtable column names.
pub mod fields {
    pub const TITLE: &str = "Title";
    pub const STATUS: &str = "Status";
    pub const KEYWORDS: &str = "Keywords";
    pub const OPTIMIZED_TITLE: &str = "OptimizedTitle";
    pub const INTRO_TEXT: &str = "IntroText";
    pub const OUTRO_TEXT: &str = "OutroText";
    pub const INTRO_VOICE_URL: &str = "IntroVoiceURL";
    pub const OUTRO_VOICE_URL: &str = "OutroVoiceURL";
    pub const INTRO_IMAGE_URL: &str = "IntroImageURL";
    pub const OUTRO_IMAGE_URL: &str = "OutroImageURL";
    pub const VIDEO_URL: &str = "VideoURL";
    pub const DRIVE_URL: &str = "DriveURL";
    pub const YOUTUBE_URL: &str = "YouTubeURL";
    pub const TIKTOK_URL: &str = "TikTokURL";
    pub const INSTAGRAM_URL: &str = "InstagramURL";
    pub const BLOG_URL: &str = "BlogURL";
    pub const LAST_ERROR: &str = "LastError";

    pub const PRODUCT_TITLE: &str = "Title";
    pub const PRODUCT_DESCRIPTION: &str = "Description";
    pub const PRODUCT_PRICE: &str = "Price";
    pub const PRODUCT_RATING: &str = "Rating";
    pub const PRODUCT_REVIEWS: &str = "Reviews";
    pub const PRODUCT_ASIN: &str = "ASIN";
    pub const PRODUCT_URL: &str = "URL";
    pub const PRODUCT_AFFILIATE_URL: &str = "AffiliateURL";
    pub const PRODUCT_IMAGE_URL: &str = "ImageURL";
    pub const PRODUCT_VOICE_URL: &str = "VoiceURL";

    /// `Product{slot}{suffix}`, e.g. `Product3AffiliateURL`.
    pub fn product(slot: usize, suffix: &str) -> String {
        format!("Product{slot}{suffix}")
    }
}

/// Lifecycle flag stored in the `Status` column.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum RecordStatus {
    #[default]
    #[strum(to_string = "Pending", serialize = "To Do", serialize = "Todo")]
    Pending,
    #[strum(to_string = "Processing", serialize = "In Progress")]
    Processing,
    #[strum(to_string = "Completed", serialize = "Complete", serialize = "Done")]
    Completed,
    #[strum(to_string = "Failed", serialize = "Error")]
    Failed,
}

impl RecordStatus {
    /// Parse a raw column value. Blank means `Pending`; unrecognised values
    /// are treated as `Processing` so the row is left alone.
    pub fn from_field(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => RecordStatus::Pending,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::debug!("Unrecognised record status '{}', treating as Processing", raw);
                RecordStatus::Processing
            }),
        }
    }
}

/// One countdown slot. Slots are sparse: an unused slot has every field unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductSlot {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    pub asin: Option<String>,
    pub url: Option<String>,
    pub affiliate_url: Option<String>,
    pub image_url: Option<String>,
    pub voice_url: Option<String>,
}

impl ProductSlot {
    pub fn from_product(product: &Product) -> Self {
        Self {
            title: Some(product.title.clone()),
            description: product.description.clone(),
            price: product.price.clone(),
            rating: product.rating,
            review_count: product.review_count,
            asin: product.asin.clone(),
            url: product.url.clone(),
            affiliate_url: None,
            image_url: product.image_url.clone(),
            voice_url: None,
        }
    }

    /// View the slot as a `Product` for link building and prompts.
    pub fn to_product(&self) -> Product {
        Product {
            title: self.title.clone().unwrap_or_default(),
            description: self.description.clone(),
            price: self.price.clone(),
            rating: self.rating,
            review_count: self.review_count,
            asin: self.asin.clone(),
            url: self.url.clone(),
            image_url: self.image_url.clone(),
        }
    }

    pub fn is_filled(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    fn is_empty(&self) -> bool {
        *self == ProductSlot::default()
    }

    fn merge_from(&mut self, other: &ProductSlot) {
        merge(&mut self.title, &other.title);
        merge(&mut self.description, &other.description);
        merge(&mut self.price, &other.price);
        merge(&mut self.rating, &other.rating);
        merge(&mut self.review_count, &other.review_count);
        merge(&mut self.asin, &other.asin);
        merge(&mut self.url, &other.url);
        merge(&mut self.affiliate_url, &other.affiliate_url);
        merge(&mut self.image_url, &other.image_url);
        merge(&mut self.voice_url, &other.voice_url);
    }

    fn read(slot: usize, record_fields: &Value) -> Self {
        let key = |suffix| fields::product(slot, suffix);
        Self {
            title: text(record_fields, &key(fields::PRODUCT_TITLE)),
            description: text(record_fields, &key(fields::PRODUCT_DESCRIPTION)),
            price: text(record_fields, &key(fields::PRODUCT_PRICE)),
            rating: float(record_fields, &key(fields::PRODUCT_RATING)),
            review_count: count(record_fields, &key(fields::PRODUCT_REVIEWS)),
            asin: text(record_fields, &key(fields::PRODUCT_ASIN)),
            url: text(record_fields, &key(fields::PRODUCT_URL)),
            affiliate_url: text(record_fields, &key(fields::PRODUCT_AFFILIATE_URL)),
            image_url: text(record_fields, &key(fields::PRODUCT_IMAGE_URL)),
            voice_url: text(record_fields, &key(fields::PRODUCT_VOICE_URL)),
        }
    }

    fn write(&self, slot: usize, out: &mut Map<String, Value>) {
        let key = |suffix| fields::product(slot, suffix);
        put_text(out, &key(fields::PRODUCT_TITLE), &self.title);
        put_text(out, &key(fields::PRODUCT_DESCRIPTION), &self.description);
        put_text(out, &key(fields::PRODUCT_PRICE), &self.price);
        if let Some(rating) = self.rating {
            out.insert(key(fields::PRODUCT_RATING), Value::from(rating));
        }
        if let Some(reviews) = self.review_count {
            out.insert(key(fields::PRODUCT_REVIEWS), Value::from(reviews));
        }
        put_text(out, &key(fields::PRODUCT_ASIN), &self.asin);
        put_text(out, &key(fields::PRODUCT_URL), &self.url);
        put_text(out, &key(fields::PRODUCT_AFFILIATE_URL), &self.affiliate_url);
        put_text(out, &key(fields::PRODUCT_IMAGE_URL), &self.image_url);
        put_text(out, &key(fields::PRODUCT_VOICE_URL), &self.voice_url);
    }
}

/// One row of pipeline state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub title: String,
    pub status: RecordStatus,
    pub keywords: Vec<String>,
    pub optimized_title: Option<String>,
    pub products: [ProductSlot; PRODUCT_SLOTS],
    pub intro_text: Option<String>,
    pub outro_text: Option<String>,
    pub intro_voice_url: Option<String>,
    pub outro_voice_url: Option<String>,
    pub intro_image_url: Option<String>,
    pub outro_image_url: Option<String>,
    pub video_url: Option<String>,
    pub drive_url: Option<String>,
    pub youtube_url: Option<String>,
    pub tiktok_url: Option<String>,
    pub instagram_url: Option<String>,
    pub blog_url: Option<String>,
    pub last_error: Option<String>,
}

impl Record {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Build a record from an Airtable `fields` object.
    pub fn from_fields(id: impl Into<String>, record_fields: &Value) -> Self {
        let mut products: [ProductSlot; PRODUCT_SLOTS] = Default::default();
        for (idx, slot) in products.iter_mut().enumerate() {
            *slot = ProductSlot::read(idx + 1, record_fields);
        }

        Self {
            id: id.into(),
            title: text(record_fields, fields::TITLE).unwrap_or_default(),
            status: RecordStatus::from_field(
                record_fields.get(fields::STATUS).and_then(|v| v.as_str()),
            ),
            keywords: keywords(record_fields.get(fields::KEYWORDS)),
            optimized_title: text(record_fields, fields::OPTIMIZED_TITLE),
            products,
            intro_text: text(record_fields, fields::INTRO_TEXT),
            outro_text: text(record_fields, fields::OUTRO_TEXT),
            intro_voice_url: text(record_fields, fields::INTRO_VOICE_URL),
            outro_voice_url: text(record_fields, fields::OUTRO_VOICE_URL),
            intro_image_url: text(record_fields, fields::INTRO_IMAGE_URL),
            outro_image_url: text(record_fields, fields::OUTRO_IMAGE_URL),
            video_url: text(record_fields, fields::VIDEO_URL),
            drive_url: text(record_fields, fields::DRIVE_URL),
            youtube_url: text(record_fields, fields::YOUTUBE_URL),
            tiktok_url: text(record_fields, fields::TIKTOK_URL),
            instagram_url: text(record_fields, fields::INSTAGRAM_URL),
            blog_url: text(record_fields, fields::BLOG_URL),
            last_error: text(record_fields, fields::LAST_ERROR),
        }
    }

    /// Pending rows have a title, no video yet and a `Pending` status.
    pub fn is_pending(&self) -> bool {
        self.status == RecordStatus::Pending
            && !self.title.trim().is_empty()
            && self.video_url.is_none()
    }

    /// 1-indexed slot access.
    pub fn product(&self, slot: usize) -> Option<&ProductSlot> {
        slot.checked_sub(1).and_then(|idx| self.products.get(idx))
    }

    /// Filled slots with their 1-based slot numbers.
    pub fn filled_products(&self) -> impl Iterator<Item = (usize, &ProductSlot)> {
        self.products
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_filled())
            .map(|(idx, slot)| (idx + 1, slot))
    }

    /// Title used for publishing: the optimized one when present.
    pub fn display_title(&self) -> &str {
        self.optimized_title.as_deref().unwrap_or(&self.title)
    }

    /// Merge a partial update in place. Only set fields are applied.
    pub fn apply(&mut self, update: &RecordUpdate) {
        update.apply_to(self);
    }
}

/// Partial set of fields written back to the Record Source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub status: Option<RecordStatus>,
    pub keywords: Option<Vec<String>>,
    pub optimized_title: Option<String>,
    pub products: [ProductSlot; PRODUCT_SLOTS],
    pub intro_text: Option<String>,
    pub outro_text: Option<String>,
    pub intro_voice_url: Option<String>,
    pub outro_voice_url: Option<String>,
    pub intro_image_url: Option<String>,
    pub outro_image_url: Option<String>,
    pub video_url: Option<String>,
    pub drive_url: Option<String>,
    pub youtube_url: Option<String>,
    pub tiktok_url: Option<String>,
    pub instagram_url: Option<String>,
    pub blog_url: Option<String>,
    pub last_error: Option<String>,
}

impl RecordUpdate {
    pub fn status(status: RecordStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            last_error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Blanks the error column.
    pub fn clear_error(mut self) -> Self {
        self.last_error = Some(String::new());
        self
    }

    /// Mutable access to a 1-indexed product slot.
    pub fn product_mut(&mut self, slot: usize) -> Option<&mut ProductSlot> {
        slot.checked_sub(1).and_then(|idx| self.products.get_mut(idx))
    }

    pub fn is_empty(&self) -> bool {
        *self == RecordUpdate::default()
    }

    /// Airtable `fields` payload holding only the set fields.
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut out = Map::new();

        if let Some(status) = self.status {
            out.insert(fields::STATUS.to_string(), Value::from(status.to_string()));
        }
        if let Some(keywords) = &self.keywords {
            out.insert(fields::KEYWORDS.to_string(), Value::from(keywords.join(", ")));
        }
        put_text(&mut out, fields::OPTIMIZED_TITLE, &self.optimized_title);
        for (idx, slot) in self.products.iter().enumerate() {
            if !slot.is_empty() {
                slot.write(idx + 1, &mut out);
            }
        }
        put_text(&mut out, fields::INTRO_TEXT, &self.intro_text);
        put_text(&mut out, fields::OUTRO_TEXT, &self.outro_text);
        put_text(&mut out, fields::INTRO_VOICE_URL, &self.intro_voice_url);
        put_text(&mut out, fields::OUTRO_VOICE_URL, &self.outro_voice_url);
        put_text(&mut out, fields::INTRO_IMAGE_URL, &self.intro_image_url);
        put_text(&mut out, fields::OUTRO_IMAGE_URL, &self.outro_image_url);
        put_text(&mut out, fields::VIDEO_URL, &self.video_url);
        put_text(&mut out, fields::DRIVE_URL, &self.drive_url);
        put_text(&mut out, fields::YOUTUBE_URL, &self.youtube_url);
        put_text(&mut out, fields::TIKTOK_URL, &self.tiktok_url);
        put_text(&mut out, fields::INSTAGRAM_URL, &self.instagram_url);
        put_text(&mut out, fields::BLOG_URL, &self.blog_url);
        put_text(&mut out, fields::LAST_ERROR, &self.last_error);

        out
    }

    pub fn apply_to(&self, record: &mut Record) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(keywords) = &self.keywords {
            record.keywords = keywords.clone();
        }
        merge(&mut record.optimized_title, &self.optimized_title);
        for (dst, src) in record.products.iter_mut().zip(self.products.iter()) {
            dst.merge_from(src);
        }
        merge(&mut record.intro_text, &self.intro_text);
        merge(&mut record.outro_text, &self.outro_text);
        merge(&mut record.intro_voice_url, &self.intro_voice_url);
        merge(&mut record.outro_voice_url, &self.outro_voice_url);
        merge(&mut record.intro_image_url, &self.intro_image_url);
        merge(&mut record.outro_image_url, &self.outro_image_url);
        merge(&mut record.video_url, &self.video_url);
        merge(&mut record.drive_url, &self.drive_url);
        merge(&mut record.youtube_url, &self.youtube_url);
        merge(&mut record.tiktok_url, &self.tiktok_url);
        merge(&mut record.instagram_url, &self.instagram_url);
        merge(&mut record.blog_url, &self.blog_url);
        if let Some(error) = &self.last_error {
            record.last_error = Some(error.clone()).filter(|e| !e.is_empty());
        }
    }
}

fn merge<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
    if let Some(value) = src {
        *dst = Some(value.clone());
    }
}

fn put_text(out: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        out.insert(key.to_string(), Value::from(value.as_str()));
    }
}

fn text(record_fields: &Value, key: &str) -> Option<String> {
    match record_fields.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn float(record_fields: &Value, key: &str) -> Option<f64> {
    match record_fields.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn count(record_fields: &Value, key: &str) -> Option<u64> {
    match record_fields.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.replace([',', '_', ' '], "").parse().ok(),
        _ => None,
    }
}

fn keywords(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
