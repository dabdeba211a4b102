use crate::chatbot::CorpusLock;
use crate::config::ChatbotConfig;
use crate::error::{ConfigError, GenerationError};
use crate::models::{AnswerEvent, FailureKind, GenerationOptions, Outcome};
use crate::prompt::{build_context, compose_prompt};
use crate::retrieval::Retriever;
use crate::traits::{ChunkStore, TextGenerator};
use futures_util::future::{self, FutureExt};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const EMPTY_QUESTION_MESSAGE: &str = "Please enter a question.";
pub const NO_CONTEXT_MESSAGE: &str =
    "I don't have any document content to answer from yet. Please upload a PDF first.";
pub const STORE_UNAVAILABLE_MESSAGE: &str =
    "The document store is unavailable right now. Please try again later.";
pub const GENERATION_FAILED_MESSAGE: &str =
    "Sorry, I couldn't generate an answer right now. Please try again.";

const EVENT_BUFFER: usize = 32;

enum Prepared {
    Ready(Outcome),
    Prompt(String),
}

enum StreamFailure {
    /// Failed before any fragment reached the caller; safe to retry.
    Before(GenerationError),
    Midway(GenerationError),
    Closed,
}

/// Answers questions from whatever chunks the store currently holds. Every
/// call ends in displayable text; errors never escape.
pub struct QueryResponder<S, G> {
    store: Arc<S>,
    generator: G,
    retriever: Retriever,
    generation: GenerationOptions,
    corpus_lock: CorpusLock,
}

impl<S, G> QueryResponder<S, G>
where
    S: ChunkStore,
    G: TextGenerator,
{
    pub fn new(
        store: Arc<S>,
        generator: G,
        config: &ChatbotConfig,
        corpus_lock: CorpusLock,
    ) -> Result<Self, ConfigError> {
        if config.generation.max_attempts == 0 {
            return Err(ConfigError::Invalid("max attempts must be at least 1".to_string()));
        }
        Ok(Self {
            store,
            generator,
            retriever: Retriever::new(config.retrieval.clone())?,
            generation: config.generation.clone(),
            corpus_lock,
        })
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Complete mode: one finished answer.
    pub async fn answer(&self, question: &str) -> Outcome {
        let prompt = match self.prepare(question).await {
            Prepared::Ready(outcome) => return outcome,
            Prepared::Prompt(prompt) => prompt,
        };

        let mut attempt = 1;
        loop {
            match self.generator.generate(&prompt).await {
                Ok(text) => return Outcome::Answer(text),
                Err(error) if self.should_retry(&error, attempt) => {
                    warn!(attempt, %error, "generation failed, retrying");
                    tokio::time::sleep(self.generation.retry_delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    warn!(attempt, %error, "generation failed");
                    return Outcome::failure(FailureKind::Generation, GENERATION_FAILED_MESSAGE);
                }
            }
        }
    }

    /// Streaming mode as a lazy sequence: nothing runs until it is polled, and
    /// the last item is always `AnswerEvent::End`.
    pub fn answer_stream<'a>(&'a self, question: &'a str) -> BoxStream<'a, AnswerEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let producer = self
            .answer_into(question, tx)
            .into_stream()
            .filter_map(|()| future::ready(None::<AnswerEvent>));
        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        stream::select(producer, events).boxed()
    }

    /// Streaming mode pushing fragments, in order, into `sink`, followed by
    /// `AnswerEvent::End`. Stops early if the receiver goes away.
    pub async fn answer_into(&self, question: &str, sink: mpsc::Sender<AnswerEvent>) {
        let prompt = match self.prepare(question).await {
            Prepared::Ready(outcome) => {
                if sink.send(AnswerEvent::Fragment(outcome.into_text())).await.is_ok() {
                    let _ = sink.send(AnswerEvent::End).await;
                }
                return;
            }
            Prepared::Prompt(prompt) => prompt,
        };

        let mut attempt = 1;
        loop {
            match self.stream_once(&prompt, &sink).await {
                Ok(()) => break,
                Err(StreamFailure::Before(error)) if self.should_retry(&error, attempt) => {
                    warn!(attempt, %error, "stream failed before first fragment, retrying");
                    tokio::time::sleep(self.generation.retry_delay).await;
                    attempt += 1;
                }
                Err(StreamFailure::Before(error)) => {
                    warn!(attempt, %error, "stream failed");
                    let apology = GENERATION_FAILED_MESSAGE.to_string();
                    if sink.send(AnswerEvent::Fragment(apology)).await.is_err() {
                        return;
                    }
                    break;
                }
                Err(StreamFailure::Midway(error)) => {
                    warn!(%error, "stream broke after partial answer");
                    let apology = format!("\n\n{GENERATION_FAILED_MESSAGE}");
                    if sink.send(AnswerEvent::Fragment(apology)).await.is_err() {
                        return;
                    }
                    break;
                }
                Err(StreamFailure::Closed) => return,
            }
        }

        let _ = sink.send(AnswerEvent::End).await;
    }

    async fn prepare(&self, question: &str) -> Prepared {
        if question.trim().is_empty() {
            return Prepared::Ready(Outcome::failure(
                FailureKind::EmptyQuestion,
                EMPTY_QUESTION_MESSAGE,
            ));
        }

        let retrieval = {
            let _read = self.corpus_lock.read().await;
            self.retriever
                .retrieve(self.store.as_ref(), question)
                .await
        };
        info!(
            tier = ?retrieval.tier,
            chunk_count = retrieval.chunks.len(),
            "retrieved context"
        );

        if retrieval.chunks.is_empty() {
            let outcome = if retrieval.store_unavailable {
                Outcome::failure(FailureKind::StoreUnavailable, STORE_UNAVAILABLE_MESSAGE)
            } else {
                Outcome::failure(FailureKind::NoContext, NO_CONTEXT_MESSAGE)
            };
            return Prepared::Ready(outcome);
        }

        let context = build_context(&retrieval.chunks, self.retriever.options().context_budget);
        if context.is_empty() {
            warn!(
                budget = self.retriever.options().context_budget,
                "no retrieved chunk fits the context budget"
            );
            return Prepared::Ready(Outcome::failure(FailureKind::NoContext, NO_CONTEXT_MESSAGE));
        }
        Prepared::Prompt(compose_prompt(question, &context))
    }

    async fn stream_once(
        &self,
        prompt: &str,
        sink: &mpsc::Sender<AnswerEvent>,
    ) -> Result<(), StreamFailure> {
        let mut fragments = self
            .generator
            .stream(prompt)
            .await
            .map_err(StreamFailure::Before)?;

        let mut emitted = false;
        while let Some(item) = fragments.recv().await {
            match item {
                Ok(text) if text.is_empty() => {}
                Ok(text) => {
                    emitted = true;
                    sink.send(AnswerEvent::Fragment(text))
                        .await
                        .map_err(|_| StreamFailure::Closed)?;
                }
                Err(error) if emitted => return Err(StreamFailure::Midway(error)),
                Err(error) => return Err(StreamFailure::Before(error)),
            }
        }

        if emitted {
            Ok(())
        } else {
            Err(StreamFailure::Before(GenerationError::EmptyResponse))
        }
    }

    fn should_retry(&self, error: &GenerationError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.generation.max_attempts
    }
}
