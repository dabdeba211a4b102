use crate::config::Neo4jConfig;
use crate::traits::{replace_in_batches, ChunkStore};
use crate::{StoreError, TextChunk};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

const BACKEND: &str = "neo4j";

const DELETE_ALL_CHUNKS: &str = "MATCH (c:TextChunk) DETACH DELETE c";

const CREATE_CHUNKS: &str = r#"
    UNWIND $rows AS row
    CREATE (c:TextChunk {
        id: row.id,
        seq: row.seq,
        text: row.text,
        document_id: row.document_id,
        ingested_at: row.ingested_at
    })
"#;

const FIND_CHUNKS_CONTAINING: &str = r#"
    MATCH (c:TextChunk)
    WHERE toLower(c.text) CONTAINS toLower($needle)
    RETURN c.id AS id, c.seq AS seq, c.text AS text
    ORDER BY c.seq
    LIMIT $limit
"#;

const FIND_ANY_CHUNKS: &str = r#"
    MATCH (c:TextChunk)
    RETURN c.id AS id, c.seq AS seq, c.text AS text
    ORDER BY c.seq
    LIMIT $limit
"#;

/// Chunk store backed by the Neo4j HTTP transaction API. One client is shared
/// by every call; each call runs in its own transaction.
pub struct Neo4jStore {
    endpoint: String,
    database: String,
    username: String,
    password: String,
    atomic_replace: bool,
    client: Client,
}

impl Neo4jStore {
    pub fn new(config: &Neo4jConfig) -> Self {
        Self {
            endpoint: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            atomic_replace: true,
            client: Client::new(),
        }
    }

    /// When disabled, `replace_chunks` deletes and writes in separate
    /// transactions and a failure can leave the store empty.
    pub fn with_atomic_replace(mut self, atomic_replace: bool) -> Self {
        self.atomic_replace = atomic_replace;
        self
    }

    fn tx_url(&self) -> String {
        format!("{}/db/{}/tx", self.endpoint, self.database)
    }

    fn commit_url(&self) -> String {
        format!("{}/commit", self.tx_url())
    }

    async fn post(&self, url: &str, statements: Vec<Value>) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "statements": statements }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        check_errors(&body)?;
        Ok(body)
    }

    async fn run(&self, statement: Value) -> Result<Value, StoreError> {
        self.post(&self.commit_url(), vec![statement]).await
    }

    async fn replace_in_transaction(
        &self,
        chunks: &[TextChunk],
        document_id: &str,
        batch_size: usize,
    ) -> Result<(), StoreError> {
        let begin = self
            .post(&self.tx_url(), vec![cypher(DELETE_ALL_CHUNKS, json!({}))])
            .await?;
        let tx_id = transaction_id(&begin).ok_or_else(|| {
            StoreError::Transaction("begin response carried no commit url".to_string())
        })?;
        let open_tx = format!("{}/{}", self.tx_url(), tx_id);

        let ingested_at = Utc::now().to_rfc3339();
        for batch in chunks.chunks(batch_size.max(1)) {
            let statement = cypher(
                CREATE_CHUNKS,
                json!({ "rows": chunk_rows(batch, document_id, &ingested_at) }),
            );
            if let Err(error) = self.post(&open_tx, vec![statement]).await {
                self.rollback(&open_tx).await;
                return Err(error);
            }
        }

        if let Err(error) = self.post(&format!("{open_tx}/commit"), Vec::new()).await {
            self.rollback(&open_tx).await;
            return Err(error);
        }

        info!(tx = %tx_id, chunk_count = chunks.len(), "replaced chunk corpus");
        Ok(())
    }

    async fn rollback(&self, open_tx: &str) {
        let result = self
            .client
            .delete(open_tx)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(tx = %open_tx, "rolled back transaction");
            }
            Ok(response) => warn!(tx = %open_tx, status = %response.status(), "rollback rejected"),
            Err(error) => warn!(tx = %open_tx, %error, "rollback request failed"),
        }
    }
}

#[async_trait]
impl ChunkStore for Neo4jStore {
    async fn delete_all_chunks(&self) -> Result<(), StoreError> {
        self.run(cypher(DELETE_ALL_CHUNKS, json!({}))).await?;
        debug!("cleared existing chunks");
        Ok(())
    }

    async fn create_chunks(&self, chunks: &[TextChunk], document_id: &str) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let ingested_at = Utc::now().to_rfc3339();
        self.run(cypher(
            CREATE_CHUNKS,
            json!({ "rows": chunk_rows(chunks, document_id, &ingested_at) }),
        ))
        .await?;
        Ok(())
    }

    async fn find_chunks_containing(
        &self,
        needle: &str,
        limit: usize,
    ) -> Result<Vec<TextChunk>, StoreError> {
        let body = self
            .run(cypher(
                FIND_CHUNKS_CONTAINING,
                json!({ "needle": needle, "limit": limit }),
            ))
            .await?;
        Ok(parse_chunks(&body))
    }

    async fn find_any_chunks(&self, limit: usize) -> Result<Vec<TextChunk>, StoreError> {
        let body = self
            .run(cypher(FIND_ANY_CHUNKS, json!({ "limit": limit })))
            .await?;
        Ok(parse_chunks(&body))
    }

    async fn replace_chunks(
        &self,
        chunks: &[TextChunk],
        document_id: &str,
        batch_size: usize,
    ) -> Result<(), StoreError> {
        if self.atomic_replace {
            self.replace_in_transaction(chunks, document_id, batch_size)
                .await
        } else {
            replace_in_batches(self, chunks, document_id, batch_size).await
        }
    }
}

fn cypher(statement: &str, parameters: Value) -> Value {
    json!({
        "statement": statement,
        "parameters": parameters,
    })
}

fn chunk_rows(chunks: &[TextChunk], document_id: &str, ingested_at: &str) -> Vec<Value> {
    chunks
        .iter()
        .map(|chunk| {
            json!({
                "id": chunk.id,
                "seq": chunk.seq,
                "text": chunk.text,
                "document_id": document_id,
                "ingested_at": ingested_at,
            })
        })
        .collect()
}

/// The HTTP API answers 200 even when a statement fails; failures are listed
/// in the `errors` array.
fn check_errors(payload: &Value) -> Result<(), StoreError> {
    let Some(errors) = payload.pointer("/errors").and_then(Value::as_array) else {
        return Ok(());
    };

    match errors.first() {
        None => Ok(()),
        Some(first) => {
            let code = first.pointer("/code").and_then(Value::as_str).unwrap_or("unknown");
            let message = first
                .pointer("/message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Err(StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{code}: {message}"),
            })
        }
    }
}

/// Pulls the transaction id out of a begin response's `commit` url
/// (`.../db/{db}/tx/{id}/commit`).
fn transaction_id(payload: &Value) -> Option<String> {
    let commit = payload.pointer("/commit").and_then(Value::as_str)?;
    let mut segments = commit.trim_end_matches('/').rsplit('/');
    match (segments.next(), segments.next()) {
        (Some("commit"), Some(id)) if !id.is_empty() => Some(id.to_string()),
        _ => None,
    }
}

fn parse_chunks(payload: &Value) -> Vec<TextChunk> {
    extract_rows(payload)
        .into_iter()
        .enumerate()
        .filter_map(|(position, row)| {
            let values = row.as_array()?;
            let text = values.get(2).and_then(Value::as_str)?.to_string();
            let seq = values
                .get(1)
                .and_then(Value::as_u64)
                .unwrap_or(position as u64);
            let id = values
                .first()
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("chunk-{seq}"));
            Some(TextChunk { id, seq, text })
        })
        .collect()
}

fn extract_rows(payload: &Value) -> Vec<&Value> {
    payload
        .pointer("/results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|result| result.pointer("/data").and_then(Value::as_array))
                .flatten()
                .filter_map(|entry| {
                    entry
                        .pointer("/row")
                        .or(Some(entry))
                        .filter(|candidate| candidate.is_array())
                })
                .collect()
        })
        .unwrap_or_default()
}
