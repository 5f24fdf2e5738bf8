//! LLM provider abstraction used by the content generator.

mod anthropic;
mod openai;
mod provider_trait;

use std::sync::Arc;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAIProvider;
pub use provider_trait::{
    ChatConfig, ChatMessage, ChatRequest, ChatResponse, LLMProviderTrait, MessageRole,
    ProviderError, ProviderType, TokenUsage,
};

use super::config::LlmConfig;

/// Build the configured provider.
pub fn build_provider(
    config: &LlmConfig,
    timeout_secs: u64,
) -> Result<Arc<dyn LLMProviderTrait>, ProviderError> {
    let provider: Arc<dyn LLMProviderTrait> = match config.provider {
        ProviderType::Anthropic => {
            let mut provider = AnthropicProvider::new(&config.api_key, timeout_secs)?;
            if let Some(endpoint) = &config.endpoint {
                provider = provider.with_endpoint(endpoint);
            }
            Arc::new(provider)
        }
        ProviderType::OpenAI => {
            let mut provider = OpenAIProvider::new(&config.api_key, timeout_secs)?;
            if let Some(endpoint) = &config.endpoint {
                provider = provider.with_endpoint(endpoint);
            }
            Arc::new(provider)
        }
    };

    if !provider.is_configured() {
        tracing::warn!("{} provider created without an API key", provider.name());
    }

    Ok(provider)
}
