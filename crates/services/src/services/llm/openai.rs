//! OpenAI chat-completions provider implementation

use async_trait::async_trait;
use reqwest::Client;

use super::provider_trait::{
    retry_after_ms, ChatMessage, ChatRequest, ChatResponse, LLMProviderTrait, MessageRole,
    ProviderError, ProviderType, TokenUsage,
};
use crate::services::http;

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI API provider
pub struct OpenAIProvider {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = http::build_client(timeout_secs)
            .map_err(|e| ProviderError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            api_key: Some(api_key.trim().to_string()).filter(|k| !k.is_empty()),
            endpoint: OPENAI_ENDPOINT.to_string(),
        })
    }

    /// Create with a custom endpoint (Azure, proxies, compatible servers)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn message_to_openai(&self, msg: &ChatMessage) -> serde_json::Value {
        let role = match msg.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        serde_json::json!({ "role": role, "content": msg.content })
    }

    fn parse_response(&self, json: &serde_json::Value) -> Result<ChatResponse, ProviderError> {
        let usage = json.get("usage").and_then(|u| {
            Some(TokenUsage {
                input_tokens: u["prompt_tokens"].as_u64()? as u32,
                output_tokens: u["completion_tokens"].as_u64()? as u32,
                total_tokens: u["total_tokens"].as_u64()? as u32,
            })
        });

        let content = json["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or_else(|| ProviderError::ParseError("No content in response".to_string()))?
            .to_string();

        Ok(ChatResponse { content, usage })
    }
}

#[async_trait]
impl LLMProviderTrait for OpenAIProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAI
    }

    fn name(&self) -> &'static str {
        "OpenAI"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn default_model(&self) -> &str {
        "gpt-4o"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let auth_header = self
            .api_key
            .as_ref()
            .map(|k| format!("Bearer {}", k))
            .ok_or_else(|| ProviderError::AuthError("No OpenAI API key configured".to_string()))?;

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| self.message_to_openai(m))
            .collect();

        let payload = serde_json::json!({
            "model": request.config.model,
            "temperature": request.config.temperature,
            "max_tokens": request.config.max_tokens,
            "messages": messages
        });

        tracing::debug!(
            "[OpenAI] Sending request: model={}, messages={}",
            request.config.model,
            messages.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", auth_header)
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

    #[test]
    fn test_parse_choice_content() {
        let provider = OpenAIProvider::new("sk-test", 30).unwrap();
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Best Mice 2025" } }],
            "usage": { "prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8 }
        });

        let response = provider.parse_response(&json).unwrap();
        assert_eq!(response.content, "Best Mice 2025");
        assert_eq!(response.usage.unwrap().output_tokens, 3);
    }

    #[test]
    fn test_parse_empty_choices() {
        let provider = OpenAIProvider::new("sk-test", 30).unwrap();
        let json = serde_json::json!({ "choices": [] });
        assert!(provider.parse_response(&json).is_err());
    }

    #[test]
    fn test_message_roles() {
        let provider = OpenAIProvider::new("sk-test", 30).unwrap();
        let msg = provider.message_to_openai(&ChatMessage::system("rules"));
        assert_eq!(msg["role"], "system");
        assert_eq!(msg["content"], "rules");
    }
}
