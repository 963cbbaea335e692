//! Text embedding capability and its HTTP-backed implementations.

use anyhow::Result;

pub mod openai;
pub mod qdrant;

pub use openai::OpenAiEmbedder;
pub use qdrant::QdrantEmbedder;

/// Maps texts to fixed-dimension dense vectors.
///
/// Implementations must be deterministic for a fixed model and return exactly one
/// vector per input, in input order.
pub trait Embedder: Send + Sync {
    /// Embeds every text, splitting into provider-sized batches as needed.
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embeds a single text.
    fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.encode(&[text])?;
        anyhow::ensure!(
            vectors.len() == 1,
            "embedder returned {} vectors for one input",
            vectors.len()
        );
        Ok(vectors.remove(0))
    }
}

impl<E: Embedder + ?Sized> Embedder for std::sync::Arc<E> {
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        (**self).encode(texts)
    }
}

/// Runs `embed_batch` over `batch_size`-sized slices and concatenates the results.
pub(crate) fn encode_in_batches<F>(
    texts: &[&str],
    batch_size: usize,
    mut embed_batch: F,
) -> Result<Vec<Vec<f32>>>
where
    F: FnMut(&[&str]) -> Result<Vec<Vec<f32>>>,
{
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = embed_batch(batch)?;
        anyhow::ensure!(
            vectors.len() == batch.len(),
            "embedding count {} mismatched batch of {}",
            vectors.len(),
            batch.len()
        );
        out.extend(vectors);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_preserve_order() {
        let texts = ["a", "bb", "ccc", "dddd", "eeeee"];
        let mut calls = 0;
        let vectors = encode_in_batches(&texts, 2, |batch| {
            calls += 1;
            Ok(batch.iter().map(|t| vec![t.len() as f32]).collect())
        })
        .expect("encode");
        assert_eq!(calls, 3);
        let lens: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lens, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn short_batch_is_an_error() {
        let texts = ["a", "b"];
        let result = encode_in_batches(&texts, 8, |_| Ok(vec![vec![0.0]]));
        assert!(result.is_err());
    }
}
