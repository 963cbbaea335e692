//! Single-turn language-model providers.

use std::time::Duration;

use crate::http::ProviderError;

mod anthropic;
mod gemini;
mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Trait implemented by concrete LLM providers.
///
/// Calls carry no conversation state. A provider must not retry on its own;
/// the caller owns the retry policy and relies on [`ProviderError`] transience.
pub trait LlmProvider: Send + Sync {
    /// Short provider label used in logs.
    fn name(&self) -> &str;

    /// Generates a completion for `prompt`.
    fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

impl<P: LlmProvider + ?Sized> LlmProvider for std::sync::Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        (**self).generate(prompt)
    }
}

/// Sampling and deadline settings shared by the providers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: usize,
    /// Per-call deadline; exceeding it surfaces as [`ProviderError::Timeout`].
    pub timeout: Duration,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 256,
            timeout: Duration::from_secs(60),
        }
    }
}

fn build_client(
    timeout: Duration,
    label: &str,
) -> Result<reqwest::blocking::Client, ProviderError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| ProviderError::Client(format!("failed to build {label} HTTP client: {err}")))
}
