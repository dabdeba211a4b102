use crate::chatbot::CorpusLock;
use crate::chunking::{chunk_text, ChunkingConfig};
use crate::config::ChatbotConfig;
use crate::extractor::{ExtractedPages, LopdfExtractor, PdfExtractor, PdfSource};
use crate::models::{IngestionOptions, IngestionReport};
use crate::traits::ChunkStore;
use crate::{IngestError, TextChunk};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

/// Turns one uploaded document into the chunk corpus, replacing whatever was
/// stored before.
pub struct DocumentIngestor<S, E = LopdfExtractor> {
    store: Arc<S>,
    extractor: E,
    options: IngestionOptions,
    corpus_lock: CorpusLock,
}

impl<S: ChunkStore> DocumentIngestor<S> {
    pub fn new(store: Arc<S>, config: &ChatbotConfig, corpus_lock: CorpusLock) -> Self {
        Self {
            store,
            extractor: LopdfExtractor,
            options: config.ingestion.clone(),
            corpus_lock,
        }
    }
}

impl<S, E> DocumentIngestor<S, E>
where
    S: ChunkStore,
    E: PdfExtractor,
{
    pub fn with_extractor<X: PdfExtractor>(self, extractor: X) -> DocumentIngestor<S, X> {
        DocumentIngestor {
            store: self.store,
            extractor,
            options: self.options,
            corpus_lock: self.corpus_lock,
        }
    }

    /// Extracts, chunks and stores a PDF. Nothing in the store changes unless
    /// extraction and chunking both produced content.
    pub async fn ingest(&self, source: PdfSource) -> Result<IngestionReport, IngestError> {
        let (name, bytes) = source.load().await?;
        let document_id = digest_bytes(&bytes);

        let extracted: ExtractedPages = self.extractor.extract_pages(&bytes)?;
        if !extracted.warnings.is_empty() {
            warn!(
                document = %name,
                skipped = extracted.warnings.len(),
                "some pages could not be extracted"
            );
        }

        let text = extracted.joined_text();
        info!(
            document = %name,
            pages = extracted.page_count,
            chars = text.chars().count(),
            "extracted document text"
        );

        let chunk_count = self.store_text(&text, &document_id).await?;

        Ok(IngestionReport {
            document_id,
            document_name: name,
            page_count: extracted.page_count,
            skipped_pages: extracted.warnings,
            text_chars: text.chars().count(),
            chunk_count,
            ingested_at: Utc::now(),
        })
    }

    /// Same as [`ingest`](Self::ingest) for text that was already extracted.
    pub async fn ingest_text(&self, name: &str, text: &str) -> Result<IngestionReport, IngestError> {
        let document_id = digest_bytes(text.as_bytes());
        let chunk_count = self.store_text(text, &document_id).await?;

        Ok(IngestionReport {
            document_id,
            document_name: name.to_string(),
            page_count: 0,
            skipped_pages: Vec::new(),
            text_chars: text.chars().count(),
            chunk_count,
            ingested_at: Utc::now(),
        })
    }

    async fn store_text(&self, text: &str, document_id: &str) -> Result<usize, IngestError> {
        if text.trim().is_empty() {
            return Err(IngestError::NothingToIngest(
                "no text could be extracted".to_string(),
            ));
        }

        let chunks: Vec<TextChunk> = chunk_text(text, ChunkingConfig::from(&self.options))?
            .into_iter()
            .enumerate()
            .map(|(seq, text)| TextChunk::new(seq as u64, text))
            .collect();
        if chunks.is_empty() {
            return Err(IngestError::NothingToIngest(
                "text produced no chunks".to_string(),
            ));
        }

        let _write = self.corpus_lock.write().await;
        self.store
            .replace_chunks(&chunks, document_id, self.options.write_batch_size)
            .await?;

        info!(document_id, chunk_count = chunks.len(), "stored chunks");
        Ok(chunks.len())
    }
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
