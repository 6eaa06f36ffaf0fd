//! Chat model provider implementations

pub mod openai;

use crate::{Context, Error, Message, MessageEventStream, Model, Result, StreamOptions};
use async_trait::async_trait;

/// Trait for chat model providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a response from the model
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream>;

    /// Run a request to completion and return the assistant message
    async fn complete(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<Message> {
        let stream = self.stream(model, context, options).await?;
        crate::stream::collect_message(stream).await
    }
}

/// Get an API key from environment or provided value
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}
