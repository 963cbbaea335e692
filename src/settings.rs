//! Classification and batch tunables shared by the binaries.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, ValueEnum};

use crate::embedder::{Embedder, OpenAiEmbedder, QdrantEmbedder};
use crate::llm::{AnthropicProvider, GeminiProvider, GenerationParams, LlmProvider, OpenAiProvider};
use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};

/// Number of knowledge statements retrieved per message.
pub const DEFAULT_TOP_K: usize = 5;
/// Combined confidence below which a classification is replaced by the fallback.
pub const DEFAULT_FALLBACK_THRESHOLD: f64 = 0.4;
/// Minimum spacing between consecutive language-model calls in a batch.
pub const DEFAULT_PACING: Duration = Duration::from_secs(1);
/// Messages processed per batch when no limit is given.
pub const DEFAULT_BATCH_LIMIT: usize = 10;

/// Knobs that bound a single classification.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassifierSettings {
    top_k: usize,
    fallback_threshold: f64,
    retry: RetryPolicy,
}

impl ClassifierSettings {
    /// Constructs a new set of classifier settings.
    pub fn new(top_k: usize, fallback_threshold: f64, retry: RetryPolicy) -> Self {
        Self {
            top_k: top_k.max(1),
            fallback_threshold,
            retry,
        }
    }

    /// Statements retrieved per message.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Combined-confidence floor for accepting a classification.
    pub fn fallback_threshold(&self) -> f64 {
        self.fallback_threshold
    }

    /// Retry policy applied to language-model calls.
    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self::new(
            DEFAULT_TOP_K,
            DEFAULT_FALLBACK_THRESHOLD,
            RetryPolicy::default(),
        )
    }
}

/// Knobs that bound a batch run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchSettings {
    limit: usize,
    pacing: Duration,
}

impl BatchSettings {
    /// Constructs batch settings; `limit` is clamped to at least one.
    pub fn new(limit: usize, pacing: Duration) -> Self {
        Self {
            limit: limit.max(1),
            pacing,
        }
    }

    /// Maximum number of messages processed.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Minimum time between consecutive language-model calls.
    pub fn pacing(&self) -> Duration {
        self.pacing
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_LIMIT, DEFAULT_PACING)
    }
}

/// Command-line flags for classification tuning.
#[derive(Args, Debug, Clone)]
pub struct TuningArgs {
    /// Knowledge statements retrieved per message
    #[arg(long, env = "EVENTRAG_TOP_K", default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Combined confidence below which labels fall back to "unknown"
    #[arg(long, env = "EVENTRAG_FALLBACK_THRESHOLD", default_value_t = DEFAULT_FALLBACK_THRESHOLD)]
    pub fallback_threshold: f64,

    /// Attempts per language-model call (first try included)
    #[arg(long, env = "EVENTRAG_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: usize,

    /// Milliseconds slept after the first failed attempt; doubles per retry
    #[arg(
        long,
        env = "EVENTRAG_BACKOFF_MS",
        default_value_t = DEFAULT_BASE_DELAY.as_millis() as u64
    )]
    pub backoff_ms: u64,

    /// Maximum number of messages to classify
    #[arg(long, env = "EVENTRAG_LIMIT", default_value_t = DEFAULT_BATCH_LIMIT)]
    pub limit: usize,

    /// Minimum milliseconds between consecutive language-model calls
    #[arg(long, env = "EVENTRAG_PACING_MS", default_value_t = DEFAULT_PACING.as_millis() as u64)]
    pub pacing_ms: u64,
}

impl TuningArgs {
    /// Converts the parsed flags into `ClassifierSettings`.
    pub fn classifier_settings(&self) -> ClassifierSettings {
        ClassifierSettings::new(
            self.top_k,
            self.fallback_threshold,
            RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms)),
        )
    }

    /// Converts the parsed flags into `BatchSettings`.
    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings::new(self.limit, Duration::from_millis(self.pacing_ms))
    }
}

/// Embedding backends.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// Qdrant Cloud Inference (hosts all-MiniLM-L6-v2).
    Qdrant,
    /// OpenAI-compatible `/embeddings` endpoint.
    Openai,
}

/// Command-line flags selecting and configuring the embedder.
///
/// The index and every query must be embedded with the same backend and model.
#[derive(Args, Debug, Clone)]
pub struct EmbedderArgs {
    /// Embedding backend
    #[arg(long, env = "EVENTRAG_EMBEDDER", value_enum, default_value_t = EmbedderKind::Qdrant)]
    pub embedder: EmbedderKind,

    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    pub qdrant_api_key: Option<String>,

    /// Qdrant inference endpoint, e.g. https://<cluster>.cloud.qdrant.io/inference/text
    #[arg(long, env = "EVENTRAG_QDRANT_ENDPOINT")]
    pub qdrant_endpoint: Option<String>,

    /// Qdrant embedding model
    #[arg(
        long,
        env = "EVENTRAG_QDRANT_MODEL",
        default_value = "sentence-transformers/all-MiniLM-L6-v2"
    )]
    pub qdrant_model: String,

    /// OpenAI API key used for embedding calls
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub embed_openai_key: Option<String>,

    /// OpenAI embedding model
    #[arg(
        long,
        env = "EVENTRAG_EMBED_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub embed_openai_model: String,

    /// Base URL for the OpenAI-compatible embeddings API
    #[arg(
        long,
        env = "EVENTRAG_EMBED_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub embed_openai_base: String,

    /// Optional dimension override when supported by the model
    #[arg(long, env = "EVENTRAG_EMBED_DIMENSIONS")]
    pub embed_dimensions: Option<usize>,

    /// Max number of texts sent per embedding request
    #[arg(long, env = "EVENTRAG_EMBED_BATCH", default_value_t = 32)]
    pub embed_batch_size: usize,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "EVENTRAG_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    pub embed_timeout_secs: u64,
}

impl EmbedderArgs {
    /// Builds the selected embedder.
    pub fn build(&self, retry: RetryPolicy) -> Result<Arc<dyn Embedder>> {
        let timeout = Duration::from_secs(self.embed_timeout_secs.max(1));
        let embedder: Arc<dyn Embedder> = match self.embedder {
            EmbedderKind::Qdrant => {
                let key = self
                    .qdrant_api_key
                    .clone()
                    .ok_or_else(|| anyhow!("QDRANT_API_KEY must be set for the Qdrant embedder"))?;
                let endpoint = self.qdrant_endpoint.clone().ok_or_else(|| {
                    anyhow!("EVENTRAG_QDRANT_ENDPOINT must be set for the Qdrant embedder")
                })?;
                Arc::new(QdrantEmbedder::new(
                    key,
                    endpoint,
                    self.qdrant_model.clone(),
                    timeout,
                    retry,
                    self.embed_batch_size,
                )?)
            }
            EmbedderKind::Openai => {
                let key = self
                    .embed_openai_key
                    .clone()
                    .ok_or_else(|| anyhow!("OPENAI_API_KEY must be set for the OpenAI embedder"))?;
                Arc::new(OpenAiEmbedder::new(
                    key,
                    self.embed_openai_base.clone(),
                    self.embed_openai_model.clone(),
                    self.embed_dimensions,
                    timeout,
                    retry,
                    self.embed_batch_size,
                )?)
            }
        };
        Ok(embedder)
    }
}

/// Language-model backends.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LlmKind {
    /// Google Gemini `generateContent`.
    Gemini,
    /// OpenAI chat completions.
    Openai,
    /// Anthropic messages API.
    Anthropic,
}

/// Command-line flags selecting and configuring the language model.
#[derive(Args, Debug, Clone)]
pub struct LlmArgs {
    /// Language-model provider
    #[arg(long, env = "EVENTRAG_LLM_PROVIDER", value_enum, default_value_t = LlmKind::Gemini)]
    pub llm_provider: LlmKind,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Gemini model identifier
    #[arg(long, env = "EVENTRAG_GEMINI_MODEL", default_value = "gemini-2.0-flash")]
    pub gemini_model: String,

    /// OpenAI API key for the classification model
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub llm_openai_key: Option<String>,

    /// OpenAI chat model
    #[arg(long, env = "EVENTRAG_OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub llm_openai_model: String,

    /// Base URL for the OpenAI-compatible chat API
    #[arg(
        long,
        env = "EVENTRAG_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub llm_openai_base: String,

    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Anthropic model identifier
    #[arg(
        long,
        env = "EVENTRAG_ANTHROPIC_MODEL",
        default_value = "claude-3-5-haiku-latest"
    )]
    pub anthropic_model: String,

    /// Sampling temperature
    #[arg(long, env = "EVENTRAG_TEMPERATURE", default_value_t = 0.0)]
    pub temperature: f32,

    /// Maximum tokens to request per completion
    #[arg(long, env = "EVENTRAG_MAX_COMPLETION_TOKENS", default_value_t = 256)]
    pub max_completion_tokens: usize,

    /// Per-call deadline in seconds; a timeout counts as a transient failure
    #[arg(long, env = "EVENTRAG_LLM_TIMEOUT_SECS", default_value_t = 60)]
    pub llm_timeout_secs: u64,
}

impl LlmArgs {
    /// Sampling and deadline parameters.
    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_completion_tokens.max(1),
            timeout: Duration::from_secs(self.llm_timeout_secs.max(1)),
        }
    }

    /// Builds the selected provider.
    pub fn build(&self) -> Result<Arc<dyn LlmProvider>> {
        let params = self.params();
        let provider: Arc<dyn LlmProvider> = match self.llm_provider {
            LlmKind::Gemini => {
                let key = self
                    .gemini_api_key
                    .clone()
                    .ok_or_else(|| anyhow!("GEMINI_API_KEY must be set for the Gemini provider"))?;
                Arc::new(
                    GeminiProvider::new(key, &self.gemini_model, params)
                        .context("failed to build Gemini provider")?,
                )
            }
            LlmKind::Openai => {
                let key = self
                    .llm_openai_key
                    .clone()
                    .ok_or_else(|| anyhow!("OPENAI_API_KEY must be set for the OpenAI provider"))?;
                Arc::new(
                    OpenAiProvider::new(
                        key,
                        self.llm_openai_model.clone(),
                        &self.llm_openai_base,
                        params,
                    )
                    .context("failed to build OpenAI provider")?,
                )
            }
            LlmKind::Anthropic => {
                let key = self.anthropic_api_key.clone().ok_or_else(|| {
                    anyhow!("ANTHROPIC_API_KEY must be set for the Anthropic provider")
                })?;
                Arc::new(
                    AnthropicProvider::new(key, self.anthropic_model.clone(), params)
                        .context("failed to build Anthropic provider")?,
                )
            }
        };
        Ok(provider)
    }
}
