use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A window of document text as persisted in the chunk store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub id: String,
    pub seq: u64,
    pub text: String,
}

impl TextChunk {
    pub fn new(seq: u64, text: impl Into<String>) -> Self {
        Self {
            id: format!("chunk-{seq}"),
            seq,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub write_batch_size: usize,
    pub atomic_replace: bool,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            write_batch_size: 10,
            atomic_replace: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub match_limit: usize,
    pub sample_limit: usize,
    pub context_budget: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            match_limit: 5,
            sample_limit: 3,
            context_budget: 8_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RetrievalTier {
    Exact,
    Keyword,
    Sample,
    Empty,
}

#[derive(Debug, Clone)]
pub struct Retrieval {
    pub tier: RetrievalTier,
    pub chunks: Vec<String>,
    /// Set when at least one store query failed and nothing was retrieved.
    pub store_unavailable: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FailureKind {
    EmptyQuestion,
    NoContext,
    StoreUnavailable,
    Generation,
}

/// Result of answering one question. Every variant carries displayable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Answer(String),
    Error { kind: FailureKind, message: String },
}

impl Outcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Answer(text) => text,
            Self::Error { message, .. } => message,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Answer(text) => text,
            Self::Error { message, .. } => message,
        }
    }

    pub fn is_answer(&self) -> bool {
        matches!(self, Self::Answer(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerEvent {
    Fragment(String),
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageWarning {
    pub page: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub document_id: String,
    pub document_name: String,
    pub page_count: usize,
    pub skipped_pages: Vec<PageWarning>,
    pub text_chars: usize,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}
