use crate::error::ConfigError;
use crate::models::{GenerationOptions, IngestionOptions, RetrievalOptions};
use url::Url;

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:7474".to_string(),
            database: "neo4j".to_string(),
            username: "neo4j".to_string(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub temperature: Option<f32>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEMINI_URL.to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_key: String::new(),
            temperature: None,
        }
    }
}

/// Everything the chatbot needs, built once at startup and handed to the
/// components by reference.
#[derive(Debug, Clone, Default)]
pub struct ChatbotConfig {
    pub neo4j: Neo4jConfig,
    pub gemini: GeminiConfig,
    pub ingestion: IngestionOptions,
    pub retrieval: RetrievalOptions,
    pub generation: GenerationOptions,
}

impl ChatbotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_url(&self.neo4j.url)?;
        parse_url(&self.gemini.base_url)?;

        if self.gemini.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("gemini api key is empty".to_string()));
        }
        if self.gemini.model.trim().is_empty() {
            return Err(ConfigError::Invalid("gemini model is empty".to_string()));
        }

        let ingestion = &self.ingestion;
        if ingestion.chunk_size <= ingestion.chunk_overlap {
            return Err(ConfigError::Invalid(format!(
                "chunk size {} must exceed overlap {}",
                ingestion.chunk_size, ingestion.chunk_overlap
            )));
        }
        if ingestion.write_batch_size == 0 {
            return Err(ConfigError::Invalid("write batch size must be positive".to_string()));
        }

        validate_retrieval(&self.retrieval)?;
        if self.retrieval.context_budget < ingestion.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "context budget {} is smaller than chunk size {}",
                self.retrieval.context_budget, ingestion.chunk_size
            )));
        }

        if self.generation.max_attempts == 0 {
            return Err(ConfigError::Invalid("max attempts must be at least 1".to_string()));
        }

        Ok(())
    }
}

pub(crate) fn validate_retrieval(options: &RetrievalOptions) -> Result<(), ConfigError> {
    if options.match_limit == 0 || options.sample_limit == 0 {
        return Err(ConfigError::Invalid(
            "retrieval limits must be positive".to_string(),
        ));
    }
    if options.context_budget == 0 {
        return Err(ConfigError::Invalid("context budget must be positive".to_string()));
    }
    Ok(())
}

fn parse_url(value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::Url {
        value: value.to_string(),
        source,
    })
}
