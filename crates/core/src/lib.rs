pub mod chatbot;
pub mod chunking;
pub mod config;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod responder;
pub mod retrieval;
pub mod stores;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use chatbot::{Chatbot, CorpusLock};
pub use chunking::{chunk_text, ChunkingConfig};
pub use config::{ChatbotConfig, GeminiConfig, Neo4jConfig};
pub use error::{ConfigError, GenerationError, IngestError, StoreError};
pub use extractor::{ExtractedPages, LopdfExtractor, PageText, PdfExtractor, PdfSource};
pub use ingest::{digest_bytes, DocumentIngestor};
pub use llm::{GeminiClient, SseDecoder};
pub use models::{
    AnswerEvent, FailureKind, GenerationOptions, IngestionOptions, IngestionReport, Outcome,
    PageWarning, Retrieval, RetrievalOptions, RetrievalTier, TextChunk,
};
pub use responder::QueryResponder;
pub use retrieval::Retriever;
pub use stores::Neo4jStore;
pub use traits::{ChunkStore, FragmentReceiver, TextGenerator};
