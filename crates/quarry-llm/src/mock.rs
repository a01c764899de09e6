//! Test-only deterministic embedding provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::LlmError;
use crate::provider::EmbeddingProvider;

/// Hashed bag-of-words embedder.
///
/// Every alphanumeric token is hashed into one of `dimension` buckets and the
/// resulting count vector is L2-normalised, so texts sharing vocabulary land
/// close together under cosine similarity.
#[derive(Debug, Clone)]
pub struct MockProvider {
    pub dimension: usize,
    pub fail_embed: bool,
    /// Milliseconds to sleep before returning an embedding.
    pub delay_ms: u64,
    calls: Arc<AtomicUsize>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MockProvider {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            fail_embed: false,
            delay_ms: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_embed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Number of `embed` calls made so far, shared across clones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn hashed_embedding(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let dim = self.dimension as u64;
        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&hash.as_bytes()[..8]);
            let bucket = usize::try_from(u64::from_le_bytes(head) % dim).unwrap_or(0);
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl EmbeddingProvider for MockProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail_embed {
            return Err(LlmError::Other("mock embedding error".into()));
        }
        Ok(self.hashed_embedding(text))
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn embedding_is_deterministic() {
        let p = MockProvider::new(32);
        let a = p.embed("fn parse_config(path: &Path)").await.unwrap();
        let b = p.embed("fn parse_config(path: &Path)").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher() {
        let p = MockProvider::new(256);
        let query = p.embed("parse config file").await.unwrap();
        let near = p.embed("parse the config file from disk").await.unwrap();
        let far = p.embed("render widget tree").await.unwrap();
        assert!(cosine(&query, &near) > cosine(&query, &far));
    }

    #[tokio::test]
    async fn failing_provider_errors_and_counts_calls() {
        let p = MockProvider::failing();
        assert!(p.embed("x").await.is_err());
        assert!(p.embed("y").await.is_err());
        assert_eq!(p.calls(), 2);
    }

    #[test]
    fn empty_text_yields_zero_vector() {
        let v = MockProvider::new(8).hashed_embedding("  ");
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
