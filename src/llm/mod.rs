//! LLM integration for clean-newsletters.
//!
//! The rest of the crate only sees `LlmProvider`: a single-shot
//! prompt → text completion with no session state. `OpenRouterProvider`
//! is the production transport; tests plug in scripted providers.

pub mod classifier;
pub mod openrouter;

pub use classifier::NewsletterClassifier;
pub use openrouter::OpenRouterProvider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LlmError;

/// Default model when `OPENROUTER_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "meta-llama/llama-3.3-70b-instruct:groq";

/// Single-shot text completion.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier, used in logs and error messages.
    fn model_name(&self) -> &str;

    /// Send `prompt` as one user message and return the reply text.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    /// Upper bound for one completion round trip.
    pub timeout: Duration,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenRouterProvider::new(config)?;
    tracing::info!("Using OpenRouter (model: {})", config.model);
    Ok(Arc::new(provider))
}
