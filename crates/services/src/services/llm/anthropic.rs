//! Anthropic Claude provider implementation

use async_trait::async_trait;
use reqwest::Client;

use super::provider_trait::{
    retry_after_ms, ChatMessage, ChatRequest, ChatResponse, LLMProviderTrait, MessageRole,
    ProviderError, ProviderType, TokenUsage,
};
use crate::services::http;

const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude API provider
pub struct AnthropicProvider {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = http::build_client(timeout_secs)
            .map_err(|e| ProviderError::ConfigError(e.to_string()))?;

        let api_key = Some(api_key.trim().to_string()).filter(|k| !k.is_empty());
        if api_key.is_some() {
            tracing::info!("Anthropic provider initialized with API key");
        }

        Ok(Self {
            client,
            api_key,
            endpoint: ANTHROPIC_ENDPOINT.to_string(),
        })
    }

    /// Create with a custom endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Anthropic takes the system prompt as a separate parameter.
    fn messages_to_anthropic(
        &self,
        messages: &[ChatMessage],
    ) -> (Option<String>, Vec<serde_json::Value>) {
        let mut system_prompt: Option<String> = None;
        let mut api_messages: Vec<serde_json::Value> = Vec::new();

        for msg in messages {
            match msg.role {
                MessageRole::System => match system_prompt {
                    Some(ref mut s) => {
                        s.push_str("\n\n");
                        s.push_str(&msg.content);
                    }
                    None => system_prompt = Some(msg.content.clone()),
                },
                MessageRole::User => api_messages.push(serde_json::json!({
                    "role": "user",
                    "content": msg.content
                })),
                MessageRole::Assistant => api_messages.push(serde_json::json!({
                    "role": "assistant",
                    "content": msg.content
                })),
            }
        }

        (system_prompt, api_messages)
    }

    /// Concatenate the text blocks of a messages response
    fn parse_response(&self, json: &serde_json::Value) -> Result<ChatResponse, ProviderError> {
        let usage = json.get("usage").and_then(|u| {
            Some(TokenUsage {
                input_tokens: u["input_tokens"].as_u64()? as u32,
                output_tokens: u["output_tokens"].as_u64()? as u32,
                total_tokens: (u["input_tokens"].as_u64()? + u["output_tokens"].as_u64()?) as u32,
            })
        });

        let blocks = json["content"]
            .as_array()
            .ok_or_else(|| ProviderError::ParseError("missing content blocks".to_string()))?;

        let content = blocks
            .iter()
            .filter_map(|block| {
                if block["type"].as_str()? == "text" {
                    block["text"].as_str().map(|s| s.to_string())
                } else {
                    None
                }
            })
            .collect::<Vec<String>>()
            .join("");

        Ok(ChatResponse { content, usage })
    }
}

#[async_trait]
impl LLMProviderTrait for AnthropicProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    fn name(&self) -> &'static str {
        "Anthropic"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn default_model(&self) -> &str {
        "claude-sonnet-4-20250514"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::AuthError("No Anthropic API key configured".to_string()))?;

        let (system_prompt, messages) = self.messages_to_anthropic(&request.messages);

        if messages.is_empty() {
            return Err(ProviderError::ConfigError(
                "At least one non-system message is required".to_string(),
            ));
        }

        let mut payload = serde_json::json!({
            "model": request.config.model,
            "max_tokens": request.config.max_tokens,
            "temperature": request.config.temperature,
            "messages": messages
        });

        if let Some(system) = system_prompt {
            payload["system"] = serde_json::json!(system);
        }

        tracing::debug!(
            "[Anthropic] Sending request: model={}, messages={}",
            request.config.model,
            messages.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_ms(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body, retry_after));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        self.parse_response(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new("sk-ant-test", 30).unwrap()
    }

    #[test]
    fn test_system_messages_are_merged() {
        let (system, messages) = provider().messages_to_anthropic(&[
            ChatMessage::system("You write scripts."),
            ChatMessage::system("Be brief."),
            ChatMessage::user("Top 5 mice"),
        ]);

        assert_eq!(system.as_deref(), Some("You write scripts.\n\nBe brief."));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_parse_text_blocks() {
        let json = serde_json::json!({
            "content": [
                { "type": "text", "text": "gaming mouse, " },
                { "type": "text", "text": "rgb" }
            ],
            "usage": { "input_tokens": 10, "output_tokens": 4 }
        });

        let response = provider().parse_response(&json).unwrap();
        assert_eq!(response.content, "gaming mouse, rgb");
        assert_eq!(response.usage.unwrap().total_tokens, 14);
    }

    #[test]
    fn test_parse_rejects_missing_content() {
        let json = serde_json::json!({ "type": "error" });
        assert!(matches!(
            provider().parse_response(&json),
            Err(ProviderError::ParseError(_))
        ));
    }

    #[test]
    fn test_unconfigured_without_key() {
        let provider = AnthropicProvider::new("  ", 30).unwrap();
        assert!(!provider.is_configured());
    }

    #[tokio::test]
    async fn test_chat_without_key_fails_fast() {
        let provider = AnthropicProvider::new("", 30).unwrap();
        let result = provider
            .chat(ChatRequest {
                messages: vec![ChatMessage::user("hello")],
                config: Default::default(),
            })
            .await;
        assert!(matches!(result, Err(ProviderError::AuthError(_))));
    }
}
