use crate::{GenerationError, StoreError, TextChunk};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Ordered text fragments produced by a streaming generation call.
pub type FragmentReceiver = mpsc::Receiver<Result<String, GenerationError>>;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn delete_all_chunks(&self) -> Result<(), StoreError>;

    async fn create_chunks(&self, chunks: &[TextChunk], document_id: &str) -> Result<(), StoreError>;

    /// Chunks whose text contains `needle`, compared case-insensitively.
    async fn find_chunks_containing(
        &self,
        needle: &str,
        limit: usize,
    ) -> Result<Vec<TextChunk>, StoreError>;

    async fn find_any_chunks(&self, limit: usize) -> Result<Vec<TextChunk>, StoreError>;

    /// Replaces the stored corpus with `chunks`. The default deletes first and
    /// then writes batch by batch; a failure part way leaves the earlier
    /// batches in place.
    async fn replace_chunks(
        &self,
        chunks: &[TextChunk],
        document_id: &str,
        batch_size: usize,
    ) -> Result<(), StoreError> {
        replace_in_batches(self, chunks, document_id, batch_size).await
    }
}

pub async fn replace_in_batches<S>(
    store: &S,
    chunks: &[TextChunk],
    document_id: &str,
    batch_size: usize,
) -> Result<(), StoreError>
where
    S: ChunkStore + ?Sized,
{
    store.delete_all_chunks().await?;
    for (index, batch) in chunks.chunks(batch_size.max(1)).enumerate() {
        store.create_chunks(batch, document_id).await?;
        debug!(batch = index, size = batch.len(), "stored chunk batch");
    }
    Ok(())
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    async fn stream(&self, prompt: &str) -> Result<FragmentReceiver, GenerationError>;
}
