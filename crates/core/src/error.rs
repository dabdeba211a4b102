use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("nothing to ingest: {0}")]
    NothingToIngest(String),

    #[error("chunk store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transaction failed: {0}")]
    Transaction(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation endpoint returned {status}: {details}")]
    Status { status: u16, details: String },

    #[error("generation endpoint returned no text")]
    EmptyResponse,

    #[error("response stream broke: {0}")]
    Stream(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GenerationError {
    /// Whether another attempt with the same prompt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::EmptyResponse | Self::Stream(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Serialization(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid url {value}: {source}")]
    Url {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}
