use std::future::Future;

use crate::error::LlmError;

/// Text embedding backend.
///
/// Identical input should yield a usable vector on every call; the indexer
/// reads the dimensionality once from a probe call and sizes collections by it.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text` into a dense vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or the response is invalid.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    fn name(&self) -> &str;
}
