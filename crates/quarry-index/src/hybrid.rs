//! Semantic retrieval re-ranked by query-term occurrence.

use std::cmp::Ordering;
use std::collections::HashMap;

use quarry_llm::EmbeddingProvider;
use quarry_store::ScoredVectorPoint;
use serde::Serialize;

use crate::analyzer::SemanticChunk;
use crate::coordinator::StorageHandle;
use crate::error::{IndexError, Result};
use crate::indexer::CONTENT_FIELD;

pub const SEMANTIC_WEIGHT: f32 = 0.6;
pub const LEXICAL_WEIGHT: f32 = 0.4;
/// Candidates fetched per requested result.
pub const OVERFETCH: u64 = 5;
pub const MIN_CANDIDATES: u64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct HybridHit {
    pub id: String,
    pub collection: String,
    pub semantic_score: f32,
    /// Raw occurrence count of query tokens in the stored content.
    pub lexical_score: f32,
    /// `None` when no candidate matched lexically and ranking fell back to semantic order.
    pub combined_score: Option<f32>,
    pub payload: HashMap<String, serde_json::Value>,
}

impl HybridHit {
    /// Ranking score: combined when available, semantic otherwise.
    #[must_use]
    pub fn score(&self) -> f32 {
        self.combined_score.unwrap_or(self.semantic_score)
    }

    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(serde_json::Value::as_str)
    }

    /// The stored chunk, if the payload carries one.
    #[must_use]
    pub fn chunk(&self) -> Option<SemanticChunk> {
        serde_json::from_str(self.payload_str("chunk")?).ok()
    }
}

#[must_use]
pub fn candidate_limit(limit: usize) -> u64 {
    u64::try_from(limit)
        .unwrap_or(u64::MAX)
        .saturating_mul(OVERFETCH)
        .max(MIN_CANDIDATES)
}

/// Lower-cased whitespace tokens.
#[must_use]
pub fn tokenize(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}

/// Sum of raw occurrence counts of `tokens` in `content`, case-insensitive.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn lexical_score(tokens: &[String], content: &str) -> f32 {
    let content = content.to_lowercase();
    tokens
        .iter()
        .map(|t| content.matches(t.as_str()).count())
        .sum::<usize>() as f32
}

fn descending(a: f32, b: f32) -> Ordering {
    b.total_cmp(&a)
}

/// Re-rank semantic candidates of one collection.
///
/// Candidates without any query token are dropped unless none has one, in
/// which case the top `limit` are returned in semantic order.
#[must_use]
pub fn rank(
    query: &str,
    collection: &str,
    candidates: Vec<ScoredVectorPoint>,
    limit: usize,
) -> Vec<HybridHit> {
    let tokens = tokenize(query);
    let mut hits: Vec<HybridHit> = candidates
        .into_iter()
        .map(|c| {
            let lexical = c
                .payload_str(CONTENT_FIELD)
                .map_or(0.0, |content| lexical_score(&tokens, content));
            HybridHit {
                id: c.id,
                collection: collection.to_string(),
                semantic_score: c.score,
                lexical_score: lexical,
                combined_score: None,
                payload: c.payload,
            }
        })
        .collect();

    let max_lexical = hits.iter().map(|h| h.lexical_score).fold(0.0f32, f32::max);
    if max_lexical <= 0.0 {
        hits.sort_by(|a, b| descending(a.semantic_score, b.semantic_score));
        hits.truncate(limit);
        return hits;
    }

    hits.retain(|h| h.lexical_score > 0.0);
    for hit in &mut hits {
        let normalized = hit.lexical_score / max_lexical;
        hit.combined_score = Some(SEMANTIC_WEIGHT * hit.semantic_score + LEXICAL_WEIGHT * normalized);
    }
    hits.sort_by(|a, b| descending(a.score(), b.score()));
    hits.truncate(limit);
    hits
}

/// Hybrid search over one collection.
///
/// # Errors
///
/// Returns [`IndexError::EmbeddingFailed`] or [`IndexError::StorageFailed`].
pub async fn hybrid_search<P: EmbeddingProvider>(
    provider: &P,
    handle: &StorageHandle,
    query: &str,
    limit: usize,
) -> Result<Vec<HybridHit>> {
    let vector = provider.embed(query).await?;
    let candidates = handle.search(vector, candidate_limit(limit)).await?;
    tracing::debug!(collection = %handle.collection(), candidates = candidates.len(), "semantic candidates");
    Ok(rank(query, handle.collection(), candidates, limit))
}

/// Order hits from several collections and keep the top `limit`.
///
/// Combined and semantic-only scores are on different scales, so every hit
/// with a combined score ranks ahead of every fallback hit.
#[must_use]
pub fn merge_ranked(mut hits: Vec<HybridHit>, limit: usize) -> Vec<HybridHit> {
    hits.sort_by(|a, b| {
        b.combined_score
            .is_some()
            .cmp(&a.combined_score.is_some())
            .then_with(|| descending(a.score(), b.score()))
    });
    hits.truncate(limit);
    hits
}

/// Hybrid search over several collections with one query embedding.
///
/// A failing collection is skipped. Results are merged by [`merge_ranked`].
///
/// # Errors
///
/// Returns [`IndexError::NoCollections`] for an empty `handles`, the
/// embedding error, or the first storage error when every collection fails.
pub async fn search_collections<P: EmbeddingProvider>(
    provider: &P,
    handles: &[StorageHandle],
    query: &str,
    limit: usize,
) -> Result<Vec<HybridHit>> {
    if handles.is_empty() {
        return Err(IndexError::NoCollections);
    }
    let vector = provider.embed(query).await?;

    let mut merged = Vec::new();
    let mut first_error = None;
    let mut failures = 0usize;
    for handle in handles {
        match handle.search(vector.clone(), candidate_limit(limit)).await {
            Ok(candidates) => merged.extend(rank(query, handle.collection(), candidates, limit)),
            Err(e) => {
                tracing::warn!(collection = %handle.collection(), "search skipped: {e:#}");
                failures += 1;
                first_error.get_or_insert(e);
            }
        }
    }
    if failures == handles.len()
        && let Some(e) = first_error
    {
        return Err(e);
    }

    Ok(merge_ranked(merged, limit))
}
