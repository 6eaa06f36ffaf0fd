//! Model defaults for OpenAI-compatible endpoints.

use crate::{Model, Provider};

/// Model used when nothing else is configured.
pub const DEFAULT_MODEL_ID: &str = "gpt-4o";

/// Default API base URL for a provider.
pub fn default_base_url(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAI => "https://api.openai.com/v1",
        Provider::Groq => "https://api.groq.com/openai/v1",
        Provider::OpenRouter => "https://openrouter.ai/api/v1",
        Provider::Ollama => "http://localhost:11434/v1",
        Provider::Custom => "",
    }
}

/// Construct a model definition for a provider and model ID.
///
/// `base_url` overrides the provider default; it is required for `Provider::Custom`.
pub fn model_for(provider: Provider, id: &str, base_url: Option<&str>) -> Model {
    Model {
        id: id.to_string(),
        name: id.to_string(),
        provider,
        base_url: base_url
            .unwrap_or_else(|| default_base_url(provider))
            .to_string(),
        context_window: 128_000,
        max_tokens: 4096,
        headers: Default::default(),
    }
}

/// The default OpenAI chat model.
pub fn default_model() -> Model {
    model_for(Provider::OpenAI, DEFAULT_MODEL_ID, None)
}
