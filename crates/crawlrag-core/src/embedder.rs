//! Embedding boundary: the [`Embedder`] trait, its error type, and an offline
//! feature-hashing implementation.

use async_trait::async_trait;
use thiserror::Error;

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Embed a single non-empty string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed several strings. Returns one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("cannot embed empty text")]
    EmptyInput,
    #[error("input of {len} chars exceeds the embedding limit of {max}")]
    TooLong { len: usize, max: usize },
    #[error("embedder returned {actual} vectors for {expected} inputs")]
    UnexpectedCount { expected: usize, actual: usize },
    #[error("embedding backend failed: {0}")]
    Backend(String),
}

/// Rejects empty input and input over `max_chars` (0 disables the length check).
pub fn check_input(text: &str, max_chars: usize) -> Result<(), EmbeddingError> {
    if text.trim().is_empty() {
        return Err(EmbeddingError::EmptyInput);
    }
    if max_chars > 0 {
        let len = text.chars().count();
        if len > max_chars {
            return Err(EmbeddingError::TooLong { len, max: max_chars });
        }
    }
    Ok(())
}

/// Deterministic bag-of-words embedder using signed feature hashing.
///
/// Texts sharing words point in similar directions, which is enough for
/// offline runs and tests. No model or network required.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    max_chars: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            max_chars: 0,
        }
    }

    /// Reject inputs longer than `max_chars`, mirroring a model's input limit.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(&token.to_lowercase());
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        check_input(text, self.max_chars)?;
        Ok(self.embed_sync(text))
    }
}

fn fnv1a(s: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    s.bytes()
        .fold(OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let e = HashEmbedder::new(64);
        let a = e.embed("Rust is fast").await.unwrap();
        let b = e.embed("rust IS fast!").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn hash_embedder_rejects_empty_and_long() {
        let e = HashEmbedder::new(8).with_max_chars(5);
        assert!(matches!(e.embed("   ").await, Err(EmbeddingError::EmptyInput)));
        assert!(matches!(
            e.embed("too long").await,
            Err(EmbeddingError::TooLong { len: 8, max: 5 })
        ));
    }

    #[tokio::test]
    async fn batch_matches_single_calls() {
        let e = HashEmbedder::new(16);
        let texts = vec!["alpha beta".to_string(), "gamma".to_string()];
        let batch = e.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[0], e.embed("alpha beta").await.unwrap());
        assert_eq!(batch[1], e.embed("gamma").await.unwrap());
    }
}
