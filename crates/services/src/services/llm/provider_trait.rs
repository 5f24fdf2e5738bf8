//! Provider trait and common types for multi-provider LLM support

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::services::http::ErrorClass;

/// Supported LLM provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAI,
    #[default]
    Anthropic,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::OpenAI => write!(f, "openai"),
            ProviderType::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderType::OpenAI),
            "anthropic" | "claude" => Ok(ProviderType::Anthropic),
            _ => Err(format!("Unknown provider type: {}", s)),
        }
    }
}

/// Error type for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Authentication failed: {0}")]
    AuthError(String),
}

impl ProviderError {
    /// Status-driven classification; replaces matching "overloaded" in
    /// error strings.
    pub fn should_retry(&self) -> bool {
        match self {
            ProviderError::ApiError { status, .. } => {
                ErrorClass::from_status(*status).is_transient()
            }
            ProviderError::RateLimited { .. } | ProviderError::RequestFailed(_) => true,
            ProviderError::ParseError(_)
            | ProviderError::ConfigError(_)
            | ProviderError::AuthError(_) => false,
        }
    }

    /// Map a non-success HTTP status onto the error type.
    pub(crate) fn from_status(status: u16, body: String, retry_after_ms: Option<u64>) -> Self {
        match status {
            401 | 403 => ProviderError::AuthError(body),
            429 => ProviderError::RateLimited { retry_after_ms },
            _ => ProviderError::ApiError {
                status,
                message: body,
            },
        }
    }
}

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Configuration for a chat request
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

/// A complete chat request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub config: ChatConfig,
}

/// Text returned by the provider
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// Token usage information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// Trait that all LLM providers must implement
#[async_trait]
pub trait LLMProviderTrait: Send + Sync {
    /// Get the provider type
    fn provider_type(&self) -> ProviderType;

    /// Get the provider name for logging/display
    fn name(&self) -> &'static str;

    /// Check if this provider is properly configured and ready
    fn is_configured(&self) -> bool;

    /// Model used when the config does not name one
    fn default_model(&self) -> &str;

    /// Send a chat request and get a response
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Parse a `retry-after` header given in seconds.
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_parsing() {
        assert_eq!("claude".parse::<ProviderType>().unwrap(), ProviderType::Anthropic);
        assert_eq!("OpenAI".parse::<ProviderType>().unwrap(), ProviderType::OpenAI);
        assert!("gemini".parse::<ProviderType>().is_err());
        assert_eq!(ProviderType::OpenAI.to_string(), "openai");
    }

    #[test]
    fn test_overloaded_is_transient() {
        let err = ProviderError::from_status(529, "overloaded_error".into(), None);
        assert!(err.should_retry());

        let err = ProviderError::from_status(429, String::new(), Some(2000));
        assert!(matches!(err, ProviderError::RateLimited { retry_after_ms: Some(2000) }));
        assert!(err.should_retry());
    }

    #[test]
    fn test_client_errors_are_permanent() {
        assert!(!ProviderError::from_status(400, "bad".into(), None).should_retry());
        assert!(!ProviderError::from_status(401, "nope".into(), None).should_retry());
        assert!(!ProviderError::ParseError("eof".into()).should_retry());
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "1.5".parse().unwrap());
        assert_eq!(retry_after_ms(&headers), Some(1500));
        assert_eq!(retry_after_ms(&reqwest::header::HeaderMap::new()), None);
    }
}
