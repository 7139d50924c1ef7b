use std::sync::Arc;

use async_trait::async_trait;
use chatgpt::client::ChatGPT;
use chatgpt::types::CompletionResponse;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::Settings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    pub max_new_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no API key configured for the generation backend")]
    MissingApiKey,
    #[error("generation backend failed: {0}")]
    Backend(#[from] chatgpt::err::Error),
    #[error("generation backend unavailable: {0}")]
    Unavailable(String),
}

/// An opaque text generation backend.
///
/// The returned value may be `[{"generated_text": ...}]`, a bare string, or
/// anything else JSON can hold; the gateway sorts that out.
#[async_trait]
pub trait TextEngine: Send + Sync {
    async fn invoke(&self, prompt: &str, options: EngineOptions) -> Result<Value, EngineError>;
}

/// Builds the engine on first use.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn TextEngine>, EngineError>;
}

pub struct ChatGptEngine {
    chat_gpt: ChatGPT,
}

impl ChatGptEngine {
    pub fn new(chat_gpt: ChatGPT) -> Self {
        Self { chat_gpt }
    }
}

#[async_trait]
impl TextEngine for ChatGptEngine {
    async fn invoke(&self, prompt: &str, options: EngineOptions) -> Result<Value, EngineError> {
        // The client carries its sampling settings, so each call gets its own copy.
        let mut chat_gpt = self.chat_gpt.clone();
        chat_gpt.config.temperature = options.temperature;
        chat_gpt.config.max_tokens = Some(options.max_new_tokens);

        let response: CompletionResponse = chat_gpt.send_message(prompt).await?;
        let content = response.message().clone().content;

        log::debug!("Completion: {:?}", content);

        Ok(json!([{ "generated_text": content }]))
    }
}

pub struct ChatGptLoader {
    settings: Settings,
}

impl ChatGptLoader {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl EngineLoader for ChatGptLoader {
    async fn load(&self) -> Result<Arc<dyn TextEngine>, EngineError> {
        let api_key = self
            .settings
            .api_key
            .clone()
            .ok_or(EngineError::MissingApiKey)?;

        let mut chat_gpt = ChatGPT::new(api_key)?;
        chat_gpt.config.engine = self.settings.model.clone();
        chat_gpt.config.timeout = self.settings.timeout;

        Ok(Arc::new(ChatGptEngine::new(chat_gpt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn loader_without_api_key_fails() {
        let loader = ChatGptLoader::new(Settings::default());
        assert_matches!(loader.load().await.err(), Some(EngineError::MissingApiKey));
    }

    #[tokio::test]
    async fn loader_with_api_key_builds_engine() {
        let settings = Settings {
            api_key: Some("sk-test".to_string()),
            ..Settings::default()
        };
        assert!(ChatGptLoader::new(settings).load().await.is_ok());
    }
}
