//! Chunk → embedding → vector store.

use std::collections::HashMap;
use std::sync::Arc;

use quarry_llm::EmbeddingProvider;
use quarry_store::{VectorPoint, VectorStore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::analyzer::SemanticChunk;
use crate::error::{IndexError, Result};

/// Namespace for chunk document ids.
const CHUNK_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x1c, 0x2b, 0x5e, 0x3a, 0x47, 0x4d, 0x1e, 0x9b, 0x80, 0x2c, 0x51, 0x7e, 0x0d, 0x43, 0xa9,
]);

/// Payload key holding the file path; stale chunks are deleted by it.
pub const FILE_FIELD: &str = "file";
/// Payload key holding the text used for lexical scoring.
pub const CONTENT_FIELD: &str = "content";

/// Outcome of indexing one batch of chunks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexedCount {
    pub indexed: usize,
    /// Chunks with nothing to embed.
    pub skipped: usize,
}

/// Non-empty parts of docstring, signature and code, newline-joined.
#[must_use]
pub fn embedding_input(chunk: &SemanticChunk) -> Option<String> {
    let parts: Vec<&str> = [&chunk.docstring, &chunk.signature, &chunk.code]
        .into_iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n"))
}

/// Deterministic id over file, line range and name.
#[must_use]
pub fn document_id(chunk: &SemanticChunk) -> String {
    let key = format!(
        "{}:{}:{}:{}",
        chunk.file_path, chunk.start_line, chunk.end_line, chunk.name
    );
    Uuid::new_v5(&CHUNK_NAMESPACE, key.as_bytes()).to_string()
}

fn chunk_payload(
    chunk: &SemanticChunk,
    content: String,
) -> Result<HashMap<String, serde_json::Value>> {
    let serialized = serde_json::to_string(chunk)?;
    Ok(HashMap::from([
        ("chunk".into(), serialized.into()),
        (FILE_FIELD.into(), chunk.file_path.clone().into()),
        ("package".into(), chunk.package.clone().into()),
        ("name".into(), chunk.name.clone().into()),
        ("kind".into(), chunk.kind.clone().into()),
        ("signature".into(), chunk.signature.clone().into()),
        ("start_line".into(), chunk.start_line.into()),
        ("end_line".into(), chunk.end_line.into()),
        ("language".into(), chunk.language.id().into()),
        ("source".into(), chunk.source.id().into()),
        (CONTENT_FIELD.into(), content.into()),
    ]))
}

/// Embeds chunks and upserts them into one collection.
pub struct Indexer<P> {
    provider: Arc<P>,
    store: Arc<dyn VectorStore>,
}

impl<P: EmbeddingProvider> Indexer<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, store: Arc<dyn VectorStore>) -> Self {
        Self { provider, store }
    }

    /// Embed and upsert `chunks` one by one.
    ///
    /// Stops at the first embedding or storage failure. Points already
    /// upserted stay; ids are deterministic, so a rerun overwrites them.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::EmbeddingFailed`], [`IndexError::StorageFailed`],
    /// or [`IndexError::Cancelled`] when `cancel` fires between chunks.
    pub async fn index_chunks(
        &self,
        collection: &str,
        chunks: &[SemanticChunk],
        cancel: &CancellationToken,
    ) -> Result<IndexedCount> {
        let mut count = IndexedCount::default();
        for chunk in chunks {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            let Some(input) = embedding_input(chunk) else {
                count.skipped += 1;
                continue;
            };
            let vector = self.provider.embed(&input).await?;
            let point = VectorPoint {
                id: document_id(chunk),
                vector,
                payload: chunk_payload(chunk, input)?,
            };
            self.store.upsert(collection, vec![point]).await?;
            count.indexed += 1;
            tracing::debug!(
                collection,
                file = %chunk.file_path,
                name = %chunk.name,
                "chunk indexed"
            );
        }
        Ok(count)
    }
}
