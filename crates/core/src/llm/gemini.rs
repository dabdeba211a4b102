use super::sse::SseDecoder;
use crate::config::GeminiConfig;
use crate::traits::{FragmentReceiver, TextGenerator};
use crate::GenerationError;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const FRAGMENT_BUFFER: usize = 32;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate, parts concatenated in order.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Client for the hosted Gemini `generateContent` endpoints.
#[derive(Clone)]
pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key: String,
    temperature: Option<f32>,
    client: Client,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            client: Client::new(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, self.model, method)
    }

    fn request_body<'a>(&self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [RequestPart { text: prompt }],
            }],
            generation_config: self
                .temperature
                .map(|temperature| GenerationConfig { temperature }),
        }
    }

    async fn send(&self, url: &str, prompt: &str) -> Result<Response, GenerationError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                details,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = self.send(&self.method_url("generateContent"), prompt).await?;
        let payload: GenerateResponse = response.json().await?;
        let text = payload.text();

        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        debug!(model = %self.model, chars = text.len(), "generated answer");
        Ok(text)
    }

    async fn stream(&self, prompt: &str) -> Result<FragmentReceiver, GenerationError> {
        let url = format!("{}?alt=sse", self.method_url("streamGenerateContent"));
        let response = self.send(&url, prompt).await?;

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        let mut body = response.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            let mut emitted = false;

            while let Some(item) = body.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        let _ = tx.send(Err(GenerationError::Stream(error.to_string()))).await;
                        return;
                    }
                };

                for data in decoder.push(&bytes) {
                    match forward_event(&tx, &data).await {
                        Forwarded::Text => emitted = true,
                        Forwarded::Nothing => {}
                        Forwarded::Stop => return,
                    }
                }
            }

            if let Some(data) = decoder.finish() {
                match forward_event(&tx, &data).await {
                    Forwarded::Text => emitted = true,
                    Forwarded::Nothing => {}
                    Forwarded::Stop => return,
                }
            }

            if !emitted {
                let _ = tx.send(Err(GenerationError::EmptyResponse)).await;
            }
        });

        Ok(rx)
    }
}

enum Forwarded {
    Text,
    Nothing,
    Stop,
}

/// Sends the text of one SSE event. An unreadable event ends the stream with
/// an error so a gap in the answer is never passed off as complete.
async fn forward_event(
    tx: &mpsc::Sender<Result<String, GenerationError>>,
    data: &str,
) -> Forwarded {
    match fragment_text(data) {
        Ok(Some(text)) => {
            if tx.send(Ok(text)).await.is_err() {
                Forwarded::Stop
            } else {
                Forwarded::Text
            }
        }
        Ok(None) => Forwarded::Nothing,
        Err(error) => {
            warn!(%error, "unreadable stream event");
            let _ = tx
                .send(Err(GenerationError::Stream(format!(
                    "unreadable stream event: {error}"
                ))))
                .await;
            Forwarded::Stop
        }
    }
}

fn fragment_text(data: &str) -> Result<Option<String>, GenerationError> {
    let payload: GenerateResponse = serde_json::from_str(data)?;
    let text = payload.text();
    Ok(if text.is_empty() { None } else { Some(text) })
}
