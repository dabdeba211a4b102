use crate::config::validate_retrieval;
use crate::error::ConfigError;
use crate::models::{Retrieval, RetrievalOptions, RetrievalTier};
use crate::traits::ChunkStore;
use crate::TextChunk;
use regex::Regex;
use tracing::{debug, warn};

/// Words of at most this many characters are not searched on their own.
const MIN_KEYWORD_CHARS: usize = 4;

/// Tiered substring retrieval: the whole question, then its keywords, then an
/// arbitrary sample of stored chunks.
#[derive(Debug, Clone)]
pub struct Retriever {
    options: RetrievalOptions,
    word_pattern: Regex,
}

impl Retriever {
    pub fn new(options: RetrievalOptions) -> Result<Self, ConfigError> {
        validate_retrieval(&options)?;
        Ok(Self {
            options,
            word_pattern: Regex::new(r"\w+")?,
        })
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    /// Lowercased words longer than three characters, first occurrence order.
    pub fn keywords(&self, question: &str) -> Vec<String> {
        let mut keywords: Vec<String> = Vec::new();
        for word in self.word_pattern.find_iter(question) {
            let word = word.as_str().to_lowercase();
            if word.chars().count() >= MIN_KEYWORD_CHARS && !keywords.contains(&word) {
                keywords.push(word);
            }
        }
        keywords
    }

    /// Store failures count as "nothing found" for that tier; the returned
    /// retrieval flags the store as unavailable only if nothing was found at all.
    pub async fn retrieve<S>(&self, store: &S, question: &str) -> Retrieval
    where
        S: ChunkStore + ?Sized,
    {
        let question = question.trim();
        let limit = self.options.match_limit;
        let mut failures = 0usize;

        match store.find_chunks_containing(question, limit).await {
            Ok(chunks) if !chunks.is_empty() => {
                return found(RetrievalTier::Exact, chunks);
            }
            Ok(_) => debug!("no exact match"),
            Err(error) => {
                failures += 1;
                warn!(%error, "exact match query failed");
            }
        }

        let mut collected: Vec<String> = Vec::new();
        for keyword in self.keywords(question) {
            if collected.len() >= limit {
                break;
            }
            match store.find_chunks_containing(&keyword, limit).await {
                Ok(chunks) => {
                    for chunk in chunks {
                        if collected.len() >= limit {
                            break;
                        }
                        if !collected.contains(&chunk.text) {
                            collected.push(chunk.text);
                        }
                    }
                }
                Err(error) => {
                    failures += 1;
                    warn!(%keyword, %error, "keyword query failed");
                }
            }
        }
        if !collected.is_empty() {
            return Retrieval {
                tier: RetrievalTier::Keyword,
                chunks: collected,
                store_unavailable: false,
            };
        }

        match store.find_any_chunks(self.options.sample_limit).await {
            Ok(chunks) if !chunks.is_empty() => return found(RetrievalTier::Sample, chunks),
            Ok(_) => debug!("chunk store is empty"),
            Err(error) => {
                failures += 1;
                warn!(%error, "sample query failed");
            }
        }

        Retrieval {
            tier: RetrievalTier::Empty,
            chunks: Vec::new(),
            store_unavailable: failures > 0,
        }
    }
}

fn found(tier: RetrievalTier, chunks: Vec<TextChunk>) -> Retrieval {
    Retrieval {
        tier,
        chunks: chunks.into_iter().map(|chunk| chunk.text).collect(),
        store_unavailable: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    fn retriever() -> Retriever {
        Retriever::new(RetrievalOptions::default()).expect("default options are valid")
    }

    #[test]
    fn keywords_skip_short_words_and_duplicates() {
        let keywords = retriever().keywords("What is the Refund window, and the refund policy?");
        assert_eq!(keywords, vec!["what", "refund", "window", "policy"]);
    }

    #[tokio::test]
    async fn verbatim_question_uses_exact_tier() {
        let store = MemoryStore::with_texts(&[
            "Shipping takes a week.",
            "The refund window is 30 days from purchase.",
        ]);

        let retrieval = retriever().retrieve(&store, "REFUND window").await;

        assert_eq!(retrieval.tier, RetrievalTier::Exact);
        assert_eq!(retrieval.chunks, vec!["The refund window is 30 days from purchase."]);
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn keyword_tier_deduplicates_and_caps() {
        let texts: Vec<String> = (0..8)
            .map(|index| format!("section {index}: warranty and shipping terms"))
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let store = MemoryStore::with_texts(&refs);

        let retrieval = retriever()
            .retrieve(&store, "does the warranty cover shipping damage?")
            .await;

        assert_eq!(retrieval.tier, RetrievalTier::Keyword);
        assert_eq!(retrieval.chunks.len(), 5);
        let mut unique = retrieval.chunks.clone();
        unique.dedup();
        assert_eq!(unique.len(), 5);
    }

    #[tokio::test]
    async fn unrelated_question_falls_back_to_samples() {
        let store = MemoryStore::with_texts(&["alpha", "beta", "gamma", "delta"]);

        let retrieval = retriever().retrieve(&store, "quantum chromodynamics").await;

        assert_eq!(retrieval.tier, RetrievalTier::Sample);
        assert_eq!(retrieval.chunks, vec!["alpha", "beta", "gamma"]);
        assert!(!retrieval.store_unavailable);
    }

    #[tokio::test]
    async fn empty_store_is_not_reported_as_unavailable() {
        let store = MemoryStore::default();
        let retrieval = retriever().retrieve(&store, "anything at all").await;
        assert_eq!(retrieval.tier, RetrievalTier::Empty);
        assert!(!retrieval.store_unavailable);
    }

    #[tokio::test]
    async fn unreachable_store_falls_through_and_is_flagged() {
        let store = MemoryStore::with_texts(&["The refund window is 30 days."]);
        store.set_unavailable(true);

        let retrieval = retriever().retrieve(&store, "refund window").await;

        assert_eq!(retrieval.tier, RetrievalTier::Empty);
        assert!(retrieval.chunks.is_empty());
        assert!(retrieval.store_unavailable);
    }
}
