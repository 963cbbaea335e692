//! Query embedding, top-k lookup, and distance-derived confidence.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::embedder::Embedder;
use crate::index::{FlatL2Index, IndexError};
use crate::knowledge::KnowledgeStatement;

/// Failure while retrieving context for a query.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The embedder could not encode the query.
    #[error("query embedding failed: {0}")]
    Embedding(String),
    /// The index rejected the query.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// A knowledge statement selected for a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedContext {
    /// Statement text.
    pub text: String,
    /// Squared L2 distance to the query embedding.
    pub distance: f32,
    /// 1-based position among the surviving hits, closest first.
    pub rank: usize,
}

/// Ranked context plus the confidence derived from its distances.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    /// Hits ordered by ascending distance.
    pub contexts: Vec<RetrievedContext>,
    /// Mean of `similarity(distance)` over `contexts`, or 0 when empty.
    pub vector_confidence: f64,
}

/// Maps a non-negative distance into `(0, 1]`; strictly decreasing.
pub fn similarity(distance: f64) -> f64 {
    1.0 / (1.0 + distance)
}

/// Mean similarity of the contexts, `0.0` for none.
pub fn vector_confidence(contexts: &[RetrievedContext]) -> f64 {
    if contexts.is_empty() {
        return 0.0;
    }
    let total: f64 = contexts
        .iter()
        .map(|c| similarity(f64::from(c.distance)))
        .sum();
    total / contexts.len() as f64
}

/// Embeds queries and resolves nearest knowledge statements.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    /// Creates a retriever over the given embedder.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Returns up to `k` statements closest to `query`.
    ///
    /// Positions the index reports beyond `knowledge` are dropped rather than
    /// treated as fatal; ranks are assigned after dropping.
    pub fn retrieve(
        &self,
        query: &str,
        k: usize,
        knowledge: &[KnowledgeStatement],
        index: &FlatL2Index,
    ) -> Result<Retrieval, RetrievalError> {
        let embedding = self
            .embedder
            .encode_one(query)
            .map_err(|err| RetrievalError::Embedding(format!("{err:#}")))?;
        let hits = index.search(&embedding, k)?;

        let mut contexts = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(statement) = knowledge.get(hit.position) else {
                warn!(
                    position = hit.position,
                    statements = knowledge.len(),
                    "index position outside knowledge base; skipping"
                );
                continue;
            };
            contexts.push(RetrievedContext {
                text: statement.text.clone(),
                distance: hit.distance,
                rank: contexts.len() + 1,
            });
        }
        let vector_confidence = vector_confidence(&contexts);
        debug!(hits = contexts.len(), vector_confidence, "retrieved context");
        Ok(Retrieval {
            contexts,
            vector_confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    struct AxisEmbedder;

    impl Embedder for AxisEmbedder {
        fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 0.0])
                .collect())
        }
    }

    fn statements(texts: &[&str]) -> Vec<KnowledgeStatement> {
        texts
            .iter()
            .enumerate()
            .map(|(id, text)| KnowledgeStatement {
                id,
                text: text.to_string(),
            })
            .collect()
    }

    #[test]
    fn similarity_is_bounded_and_decreasing() {
        assert_eq!(similarity(0.0), 1.0);
        let mut previous = similarity(0.0);
        for step in 1..50 {
            let current = similarity(step as f64 * 0.37);
            assert!(current > 0.0 && current < previous);
            previous = current;
        }
    }

    fn context(text: &str, distance: f32, rank: usize) -> RetrievedContext {
        RetrievedContext {
            text: text.to_string(),
            distance,
            rank,
        }
    }

    #[test]
    fn confidence_is_mean_similarity() {
        let contexts = vec![
            context("a", 0.0, 1),
            context("b", 1.0, 2),
            context("c", 3.0, 3),
        ];
        let expected = (1.0 + 0.5 + 0.25) / 3.0;
        assert!((vector_confidence(&contexts) - expected).abs() < 1e-12);
        assert_eq!(vector_confidence(&[]), 0.0);
    }

    #[test]
    fn ranks_follow_distance() {
        let knowledge = statements(&["xx", "xxxx", "x"]);
        let index = FlatL2Index::build(&[vec![2.0, 0.0], vec![4.0, 0.0], vec![1.0, 0.0]])
            .expect("index");
        let retriever = Retriever::new(Arc::new(AxisEmbedder));
        let retrieval = retriever.retrieve("xxx", 2, &knowledge, &index).expect("retrieve");
        let ranked: Vec<(&str, usize)> = retrieval
            .contexts
            .iter()
            .map(|c| (c.text.as_str(), c.rank))
            .collect();
        assert_eq!(ranked, vec![("xx", 1), ("xxxx", 2)]);
        assert!((retrieval.vector_confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn positions_beyond_knowledge_are_dropped() {
        let knowledge = statements(&["x"]);
        let index = FlatL2Index::build(&[vec![3.0, 0.0], vec![1.0, 0.0]]).expect("index");
        let retriever = Retriever::new(Arc::new(AxisEmbedder));
        let retrieval = retriever.retrieve("xxx", 5, &knowledge, &index).expect("retrieve");
        assert_eq!(retrieval.contexts.len(), 1);
        assert_eq!(retrieval.contexts[0].rank, 1);
        assert_eq!(retrieval.contexts[0].text, "x");
    }
}
