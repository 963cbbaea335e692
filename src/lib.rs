#![warn(missing_docs)]
//! Retrieval-augmented classification of free-text event-log messages.
//!
//! A fixed knowledge base of taxonomy statements is embedded into an exact L2
//! index. Each log message retrieves its nearest statements, a language model
//! labels it, and the model's confidence is blended with retrieval similarity.

pub mod batch;
pub mod classifier;
pub mod embedder;
pub mod extract;
pub mod http;
pub mod index;
pub mod io;
pub mod knowledge;
pub mod llm;
pub mod prompt;
pub mod retriever;
pub mod retry;
pub mod settings;
pub mod store;
pub mod taxonomy;

pub use batch::{BatchOutcome, BatchRunner, CancelFlag, EventId, LogInput, ResultRecord};
pub use classifier::{
    Classification, ClassificationError, Classifier, ClassifierContext, ErrorReason,
};
pub use embedder::Embedder;
pub use http::ProviderError;
pub use index::{FlatL2Index, IndexError, Neighbor};
pub use knowledge::KnowledgeStatement;
pub use llm::{GenerationParams, LlmProvider};
pub use retriever::{Retrieval, RetrievalError, RetrievedContext, Retriever};
pub use retry::{RetryError, RetryPolicy, Transient};
pub use settings::{BatchSettings, ClassifierSettings, TuningArgs};
pub use store::{KnowledgeStore, StoreError};
