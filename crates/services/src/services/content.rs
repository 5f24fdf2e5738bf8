//! Content Generator: keywords, optimized title, narration and the countdown
//! script, all produced through an LLM provider.
//!
//! Every public operation is infallible. A failed call degrades to the
//! original title, no keywords, no narration or an empty script, and is
//! listed in [`GeneratedContent::failures`].

use std::{sync::Arc, time::Duration};

use backon::Retryable;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use utils::text::{strip_quotes, truncate_chars};

use super::{
    config::{LlmConfig, RetryConfig},
    http,
    llm::{ChatConfig, ChatMessage, ChatRequest, LLMProviderTrait, ProviderError},
};
use crate::models::{product::Product, record::PRODUCT_SLOTS};

pub const MAX_KEYWORDS: usize = 10;
pub const MAX_TITLE_CHARS: usize = 100;

lazy_static! {
    /// `5. Name - blurb`, `#4) Name: blurb`, `3 - Name`
    static ref LIST_LINE: Regex =
        Regex::new(r"^\s*(?:#|No\.?\s*)?([1-9])\s*[.):\-]\s*(.+)$").unwrap();
    static ref BLURB_SPLIT: Regex = Regex::new(r"\s+[-\u{2013}\u{2014}:]\s+|:\s+").unwrap();
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub rank: u8,
    pub title: String,
    pub description: String,
}

/// Countdown entries ordered from rank 5 down to rank 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountdownScript {
    pub entries: Vec<ScriptEntry>,
}

impl CountdownScript {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, rank: u8) -> Option<&ScriptEntry> {
        self.entries.iter().find(|e| e.rank == rank)
    }

    /// Normalise ranks into 1..=5, keep the first entry per rank and order
    /// the result 5 -> 1.
    fn from_entries(entries: Vec<ScriptEntry>) -> Self {
        let mut seen = [false; PRODUCT_SLOTS];
        let mut kept: Vec<ScriptEntry> = entries
            .into_iter()
            .filter(|e| (1..=PRODUCT_SLOTS as u8).contains(&e.rank) && !e.title.trim().is_empty())
            .filter(|e| !std::mem::replace(&mut seen[e.rank as usize - 1], true))
            .map(|e| ScriptEntry {
                rank: e.rank,
                title: strip_quotes(e.title.trim()).to_string(),
                description: e.description.trim().to_string(),
            })
            .collect();
        kept.sort_by(|a, b| b.rank.cmp(&a.rank));
        Self { entries: kept }
    }
}

/// Part of the generated content that can fail on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ContentPart {
    /// Keywords and the optimized title, produced together.
    Title,
    Narration,
    Script,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentFailure {
    pub part: ContentPart,
    pub error: String,
    pub transient: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub keywords: Vec<String>,
    /// The input title when [`ContentPart::Title`] failed.
    pub optimized_title: String,
    pub intro_text: Option<String>,
    pub outro_text: Option<String>,
    pub script: CountdownScript,
    pub failures: Vec<ContentFailure>,
}

impl GeneratedContent {
    pub fn failed(&self, part: ContentPart) -> bool {
        self.failures.iter().any(|f| f.part == part)
    }

    /// `"title: ...; script: ..."`, empty when nothing failed.
    pub fn failure_summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.part, f.error))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl ContentFailure {
    fn new(part: ContentPart, error: &ProviderError) -> Self {
        Self {
            part,
            error: error.to_string(),
            transient: error.should_retry(),
        }
    }
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(default)]
    rank: Option<u8>,
    #[serde(alias = "name", alias = "product")]
    title: String,
    #[serde(default, alias = "blurb", alias = "summary")]
    description: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScript {
    List(Vec<RawEntry>),
    Wrapped {
        #[serde(alias = "items", alias = "products", alias = "countdown")]
        entries: Vec<RawEntry>,
    },
}

#[derive(Deserialize)]
struct RawNarration {
    intro: String,
    outro: String,
}

pub struct ContentGenerator {
    provider: Arc<dyn LLMProviderTrait>,
    chat: ChatConfig,
    retry: RetryConfig,
}

impl ContentGenerator {
    pub fn new(provider: Arc<dyn LLMProviderTrait>, config: &LlmConfig, retry: RetryConfig) -> Self {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());
        Self {
            provider,
            chat: ChatConfig {
                model,
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            },
            retry,
        }
    }

    /// Keywords, title, narration and script for a topic.
    pub async fn generate(&self, title: &str) -> GeneratedContent {
        let mut failures = Vec::new();

        let (keywords, optimized_title) = match self.keywords_and_title(title).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("[CONTENT] Keyword/title generation failed for '{}': {}", title, e);
                failures.push(ContentFailure::new(ContentPart::Title, &e));
                (Vec::new(), title.to_string())
            }
        };

        let (intro_text, outro_text) = match self.narration(&optimized_title).await {
            Ok((intro, outro)) => (Some(intro), Some(outro)),
            Err(e) => {
                tracing::warn!("[CONTENT] Narration generation failed: {}", e);
                failures.push(ContentFailure::new(ContentPart::Narration, &e));
                (None, None)
            }
        };

        let script = match self.script(title, None).await {
            Ok(script) => script,
            Err(e) => {
                tracing::warn!("[CONTENT] Script generation failed for '{}': {}", title, e);
                failures.push(ContentFailure::new(ContentPart::Script, &e));
                CountdownScript::default()
            }
        };

        tracing::info!(
            "[CONTENT] Generated {} keywords, {} script entries for '{}' ({} part(s) failed)",
            keywords.len(),
            script.entries.len(),
            title,
            failures.len()
        );

        GeneratedContent {
            keywords,
            optimized_title,
            intro_text,
            outro_text,
            script,
            failures,
        }
    }

    /// Script with blurbs written for real products. `products[0]` is #1.
    pub async fn generate_script_for(&self, title: &str, products: &[Product]) -> CountdownScript {
        if products.is_empty() {
            return CountdownScript::default();
        }
        match self.script(title, Some(products)).await {
            Ok(script) => script,
            Err(e) => {
                tracing::warn!("[CONTENT] Product script generation failed: {}", e);
                CountdownScript::default()
            }
        }
    }

    async fn keywords_and_title(&self, title: &str) -> Result<(Vec<String>, String), ProviderError> {
        let raw = self
            .complete(
                "You are an SEO specialist for product review videos.",
                format!(
                    "List up to {MAX_KEYWORDS} SEO keywords for a video titled \"{title}\". \
                     Reply with a single comma-separated line and nothing else."
                ),
            )
            .await?;
        let keywords = parse_keywords(&raw);

        let raw = self
            .complete(
                "You write short, click-worthy YouTube titles.",
                format!(
                    "Rewrite the title \"{title}\" for search, using these keywords where natural: {}. \
                     At most {MAX_TITLE_CHARS} characters. Reply with the title only.",
                    keywords.join(", ")
                ),
            )
            .await?;
        let optimized = clean_title(&raw)
            .ok_or_else(|| ProviderError::ParseError("empty title".to_string()))?;

        Ok((keywords, optimized))
    }

    async fn narration(&self, title: &str) -> Result<(String, String), ProviderError> {
        let raw = self
            .complete(
                "You write voice-over narration for short countdown videos.",
                format!(
                    "Write a two-sentence intro and a one-sentence outro for the video \"{title}\". \
                     The outro should invite viewers to check the links in the description. \
                     Reply as JSON: {{\"intro\": \"...\", \"outro\": \"...\"}}"
                ),
            )
            .await?;

        let narration: RawNarration = serde_json::from_str(strip_code_fence(&raw))
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        if narration.intro.trim().is_empty() || narration.outro.trim().is_empty() {
            return Err(ProviderError::ParseError("empty narration".to_string()));
        }
        Ok((narration.intro.trim().to_string(), narration.outro.trim().to_string()))
    }

    async fn script(
        &self,
        title: &str,
        products: Option<&[Product]>,
    ) -> Result<CountdownScript, ProviderError> {
        let prompt = match products {
            None => format!(
                "Write a top-{PRODUCT_SLOTS} countdown script for \"{title}\". \
                 Reply as a JSON array of objects with keys rank (5 down to 1), title, description. \
                 Each description is one or two spoken sentences."
            ),
            Some(products) => {
                let listing = products
                    .iter()
                    .take(PRODUCT_SLOTS)
                    .enumerate()
                    .map(|(idx, p)| format!("#{}: {}", idx + 1, p.title))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!(
                    "Write countdown narration for \"{title}\" covering exactly these products:\n{listing}\n\
                     Reply as a JSON array of objects with keys rank, title, description, \
                     keeping each product's rank. Each description is one or two spoken sentences."
                )
            }
        };

        let raw = self
            .complete("You write scripts for product countdown videos.", prompt)
            .await?;
        let script = parse_script(&raw);
        if script.is_empty() {
            return Err(ProviderError::ParseError("no countdown entries in response".to_string()));
        }
        Ok(script)
    }

    /// One chat turn with transient failures retried.
    async fn complete(&self, system: &str, prompt: String) -> Result<String, ProviderError> {
        let request = ChatRequest {
            messages: vec![ChatMessage::system(system), ChatMessage::user(prompt)],
            config: self.chat.clone(),
        };

        let response = (|| async { self.provider.chat(request.clone()).await })
            .retry(http::backoff(&self.retry))
            .when(ProviderError::should_retry)
            .notify(|err: &ProviderError, dur: Duration| {
                tracing::warn!(
                    "[CONTENT] {} call failed, retrying after {:.2}s: {}",
                    self.provider.name(),
                    dur.as_secs_f64(),
                    err
                );
            })
            .await?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                "[CONTENT] {} tokens in, {} out",
                usage.input_tokens,
                usage.output_tokens
            );
        }
        Ok(response.content)
    }
}

/// Comma- or newline-separated keywords, trimmed, deduplicated
/// case-insensitively, at most [`MAX_KEYWORDS`].
pub fn parse_keywords(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    text.split([',', '\n'])
        .map(|k| k.trim().trim_start_matches(['-', '*']).trim())
        .map(strip_quotes)
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_lowercase()))
        .take(MAX_KEYWORDS)
        .map(str::to_string)
        .collect()
}

/// First non-empty line, unquoted, cut to [`MAX_TITLE_CHARS`].
pub fn clean_title(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .strip_prefix("Title:")
        .map(str::trim)
        .unwrap_or(line);
    let title = strip_quotes(line).trim();
    if title.is_empty() {
        return None;
    }
    Some(truncate_chars(title, MAX_TITLE_CHARS).trim_end().to_string())
}

/// JSON array/object of entries, falling back to a numbered list.
pub fn parse_script(text: &str) -> CountdownScript {
    let body = strip_code_fence(text);

    if let Some(script) = parse_json_script(body) {
        return script;
    }

    let entries = body
        .lines()
        .filter_map(|line| {
            let caps = LIST_LINE.captures(line)?;
            let rank: u8 = caps[1].parse().ok()?;
            let rest = caps[2].trim().trim_matches('*').trim();
            let (title, description) = match BLURB_SPLIT.splitn(rest, 2).collect::<Vec<_>>()[..] {
                [title, description] => (title, description),
                _ => (rest, ""),
            };
            Some(ScriptEntry {
                rank,
                title: title.trim_matches('*').trim().to_string(),
                description: description.to_string(),
            })
        })
        .collect();

    CountdownScript::from_entries(entries)
}

fn parse_json_script(body: &str) -> Option<CountdownScript> {
    let start = body.find(['[', '{'])?;
    let raw: RawScript = serde_json::Deserializer::from_str(&body[start..])
        .into_iter()
        .next()?
        .ok()?;
    let raw = match raw {
        RawScript::List(entries) | RawScript::Wrapped { entries } => entries,
    };

    // Unranked entries are assumed to be listed in countdown order.
    let total = raw.len().min(PRODUCT_SLOTS);
    let entries = raw
        .into_iter()
        .enumerate()
        .map(|(idx, e)| ScriptEntry {
            rank: e.rank.unwrap_or_else(|| total.saturating_sub(idx) as u8),
            title: e.title,
            description: e.description,
        })
        .collect();
    Some(CountdownScript::from_entries(entries))
}

fn strip_code_fence(text: &str) -> &str {
    CODE_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| text.trim())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::services::llm::{ChatResponse, ProviderType};

    /// Replays canned replies in order; `Err` entries simulate API errors.
    struct ScriptedProvider {
        replies: Mutex<Vec<Result<String, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LLMProviderTrait for ScriptedProvider {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Anthropic
        }
        fn name(&self) -> &'static str {
            "Scripted"
        }
        fn is_configured(&self) -> bool {
            true
        }
        fn default_model(&self) -> &str {
            "test-model"
        }
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().await.pop().unwrap_or_else(|| {
                Err(ProviderError::AuthError("no more replies".into()))
            });
            next.map(|content| ChatResponse { content, usage: None })
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_times: 2,
            min_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    fn generator(provider: Arc<ScriptedProvider>) -> ContentGenerator {
        ContentGenerator::new(provider, &LlmConfig::default(), fast_retry())
    }

    const SCRIPT_JSON: &str = r#"```json
[
  {"rank": 5, "title": "Mouse E", "description": "Budget pick."},
  {"rank": 4, "title": "Mouse D", "description": "Great grip."},
  {"rank": 3, "title": "Mouse C", "description": "Light."},
  {"rank": 2, "title": "Mouse B", "description": "Wireless."},
  {"rank": 1, "title": "Mouse A", "description": "Best overall."}
]
```"#;

    #[test]
    fn test_parse_keywords_dedupes_and_caps() {
        let keywords = parse_keywords(
            "gaming mouse, Gaming Mouse, \"rgb\", , wireless, a, b, c, d, e, f, g, h, i",
        );
        assert_eq!(keywords[0], "gaming mouse");
        assert_eq!(keywords[1], "rgb");
        assert_eq!(keywords.len(), MAX_KEYWORDS);
        assert!(parse_keywords("  ,  ").is_empty());
    }

    #[test]
    fn test_clean_title_strips_quotes_and_truncates() {
        assert_eq!(
            clean_title("\n\"Best Gaming Mice 2025\"\n").as_deref(),
            Some("Best Gaming Mice 2025")
        );
        assert_eq!(clean_title("Title: Top Mice").as_deref(), Some("Top Mice"));
        let long = "é".repeat(150);
        assert_eq!(clean_title(&long).unwrap().chars().count(), MAX_TITLE_CHARS);
        assert!(clean_title("   ").is_none());
    }

    #[test]
    fn test_parse_script_json_in_code_fence() {
        let script = parse_script(SCRIPT_JSON);
        let ranks: Vec<u8> = script.entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![5, 4, 3, 2, 1]);
        assert_eq!(script.entry(1).unwrap().title, "Mouse A");
    }

    #[test]
    fn test_parse_script_wrapped_and_unranked() {
        let script = parse_script(
            r#"{"items": [{"name": "X", "blurb": "x"}, {"name": "Y", "blurb": "y"}]}"#,
        );
        assert_eq!(script.entries.len(), 2);
        assert_eq!(script.entry(2).unwrap().title, "X");
        assert_eq!(script.entry(1).unwrap().title, "Y");
    }

    #[test]
    fn test_parse_script_numbered_list() {
        let text = "Here you go:\n\
                    1. Mouse A - Best overall.\n\
                    5. **Mouse E** - Budget pick.\n\
                    3) Mouse C: Light and fast\n\
                    3. Duplicate - ignored\n\
                    9. Out of range - ignored";
        let script = parse_script(text);
        let ranks: Vec<u8> = script.entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![5, 3, 1]);
        assert_eq!(script.entry(5).unwrap().title, "Mouse E");
        assert_eq!(script.entry(3).unwrap().description, "Light and fast");
        assert_eq!(script.entry(1).unwrap().description, "Best overall.");
    }

    #[test]
    fn test_parse_script_garbage_is_empty() {
        assert!(parse_script("I can't help with that.").is_empty());
    }

    #[tokio::test]
    async fn test_generate_happy_path() {
        let provider = ScriptedProvider::new(vec![
            Ok("gaming mouse, rgb, wireless".into()),
            Ok("\"Best Gaming Mice You Can Buy\"".into()),
            Ok(r#"{"intro": "Welcome!", "outro": "Links below."}"#.into()),
            Ok(SCRIPT_JSON.into()),
        ]);
        let content = generator(provider.clone()).generate("Top 5 Gaming Mice").await;

        assert_eq!(content.keywords, vec!["gaming mouse", "rgb", "wireless"]);
        assert_eq!(content.optimized_title, "Best Gaming Mice You Can Buy");
        assert_eq!(content.intro_text.as_deref(), Some("Welcome!"));
        assert_eq!(content.outro_text.as_deref(), Some("Links below."));
        assert_eq!(content.script.entries.len(), 5);
        assert!(content.failures.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_generate_reports_failed_parts() {
        let provider = ScriptedProvider::new(vec![]);
        let content = generator(provider).generate("Top 5 Gaming Mice").await;

        assert_eq!(content.optimized_title, "Top 5 Gaming Mice");
        assert!(content.keywords.is_empty());
        assert!(content.script.is_empty());
        assert!(content.intro_text.is_none());
        assert!(content.outro_text.is_none());

        assert_eq!(content.failures.len(), 3);
        assert!(content.failed(ContentPart::Title));
        assert!(content.failed(ContentPart::Narration));
        assert!(content.failed(ContentPart::Script));
        assert!(content.failures.iter().all(|f| !f.transient));
        assert!(content.failure_summary().starts_with("title: "));
    }

    #[tokio::test]
    async fn test_overloaded_is_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::ApiError {
                status: 529,
                message: "overloaded_error".into(),
            }),
            Ok("mouse".into()),
            Ok("Mice".into()),
            Ok("not json".into()),
            Ok("1. Mouse A - best".into()),
        ]);
        let content = generator(provider.clone()).generate("Top 5 Gaming Mice").await;

        assert_eq!(content.keywords, vec!["mouse"]);
        assert_eq!(content.optimized_title, "Mice");
        assert_eq!(content.script.entries.len(), 1);
        // unparseable narration is a failure, not a template
        assert!(content.intro_text.is_none());
        assert!(content.failed(ContentPart::Narration));
        assert!(!content.failed(ContentPart::Title));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::AuthError("bad key".into()))]);
        let content = generator(provider.clone()).generate("Top 5").await;

        assert_eq!(content.optimized_title, "Top 5");
        // keywords, narration, script: one attempt each
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_script_for_products() {
        let provider = ScriptedProvider::new(vec![Ok(SCRIPT_JSON.into())]);
        let products = vec![Product::new("Mouse A"), Product::new("Mouse B")];
        let script = generator(provider).generate_script_for("Top 5", &products).await;
        assert_eq!(script.entries.len(), 5);

        let provider = ScriptedProvider::new(vec![]);
        assert!(generator(provider).generate_script_for("Top 5", &[]).await.is_empty());
    }
}
