use crate::config::ChatbotConfig;
use crate::error::{ConfigError, IngestError};
use crate::extractor::PdfSource;
use crate::ingest::DocumentIngestor;
use crate::llm::GeminiClient;
use crate::models::{AnswerEvent, IngestionReport, Outcome};
use crate::responder::QueryResponder;
use crate::stores::Neo4jStore;
use crate::traits::{ChunkStore, TextGenerator};
use futures_util::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Serializes corpus replacement against retrieval: ingestion holds the write
/// half while it swaps chunks, queries hold the read half while they search.
pub type CorpusLock = Arc<RwLock<()>>;

/// The ingestor and responder wired to one shared store.
pub struct Chatbot<S, G> {
    ingestor: DocumentIngestor<S>,
    responder: QueryResponder<S, G>,
}

impl Chatbot<Neo4jStore, GeminiClient> {
    pub fn connect(config: &ChatbotConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let store = Neo4jStore::new(&config.neo4j)
            .with_atomic_replace(config.ingestion.atomic_replace);
        Self::new(Arc::new(store), GeminiClient::new(&config.gemini), config)
    }
}

impl<S, G> Chatbot<S, G>
where
    S: ChunkStore,
    G: TextGenerator,
{
    pub fn new(store: Arc<S>, generator: G, config: &ChatbotConfig) -> Result<Self, ConfigError> {
        let corpus_lock: CorpusLock = Arc::new(RwLock::new(()));
        Ok(Self {
            ingestor: DocumentIngestor::new(Arc::clone(&store), config, Arc::clone(&corpus_lock)),
            responder: QueryResponder::new(store, generator, config, corpus_lock)?,
        })
    }

    pub fn ingestor(&self) -> &DocumentIngestor<S> {
        &self.ingestor
    }

    pub fn responder(&self) -> &QueryResponder<S, G> {
        &self.responder
    }

    pub async fn ingest(&self, source: PdfSource) -> Result<IngestionReport, IngestError> {
        self.ingestor.ingest(source).await
    }

    pub async fn answer(&self, question: &str) -> Outcome {
        self.responder.answer(question).await
    }

    pub fn answer_stream<'a>(&'a self, question: &'a str) -> BoxStream<'a, AnswerEvent> {
        self.responder.answer_stream(question)
    }
}
