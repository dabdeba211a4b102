//! In-process doubles for the chunk store and the generation endpoint.

use crate::traits::{ChunkStore, FragmentReceiver, TextGenerator};
use crate::{GenerationError, StoreError, TextChunk};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct MemoryStore {
    chunks: Mutex<Vec<(TextChunk, String)>>,
    unavailable: AtomicBool,
    fail_writes: AtomicBool,
    queries: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn with_texts(texts: &[&str]) -> Self {
        let store = Self::default();
        {
            let mut chunks = store.lock();
            for (seq, text) in texts.iter().enumerate() {
                chunks.push((TextChunk::new(seq as u64, *text), "seed".to_string()));
            }
        }
        store
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn texts(&self) -> Vec<String> {
        self.lock().iter().map(|(chunk, _)| chunk.text.clone()).collect()
    }

    pub fn document_ids(&self) -> Vec<String> {
        self.lock().iter().map(|(_, document)| document.clone()).collect()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(TextChunk, String)>> {
        self.chunks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::BackendResponse {
                backend: "memory".to_string(),
                details: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn delete_all_chunks(&self) -> Result<(), StoreError> {
        self.check_available()?;
        self.lock().clear();
        Ok(())
    }

    async fn create_chunks(&self, chunks: &[TextChunk], document_id: &str) -> Result<(), StoreError> {
        // lets a concurrently polled query observe the half-written corpus
        tokio::task::yield_now().await;
        self.check_available()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Transaction("write rejected".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.lock().extend(
            chunks
                .iter()
                .map(|chunk| (chunk.clone(), document_id.to_string())),
        );
        Ok(())
    }

    async fn find_chunks_containing(
        &self,
        needle: &str,
        limit: usize,
    ) -> Result<Vec<TextChunk>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let needle = needle.to_lowercase();
        Ok(self
            .lock()
            .iter()
            .filter(|(chunk, _)| chunk.text.to_lowercase().contains(&needle))
            .take(limit)
            .map(|(chunk, _)| chunk.clone())
            .collect())
    }

    async fn find_any_chunks(&self, limit: usize) -> Result<Vec<TextChunk>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self
            .lock()
            .iter()
            .take(limit)
            .map(|(chunk, _)| chunk.clone())
            .collect())
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Fixed(String),
    /// Answers with the context block found in the prompt.
    EchoContext,
}

/// Deterministic generator. `generate` and `stream` produce the same text; the
/// stream splits it into word-sized fragments.
pub struct StubGenerator {
    reply: Reply,
    failures_before_success: AtomicUsize,
    stream_break_after: Option<usize>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl StubGenerator {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            failures_before_success: AtomicUsize::new(0),
            stream_break_after: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn fixed(text: &str) -> Self {
        Self::new(Reply::Fixed(text.to_string()))
    }

    /// The first `count` calls fail with a transient error.
    pub fn failing_first(self, count: usize) -> Self {
        self.failures_before_success.store(count, Ordering::SeqCst);
        self
    }

    /// Streams break with an error after `fragments` fragments.
    pub fn breaking_stream_after(mut self, fragments: usize) -> Self {
        self.stream_break_after = Some(fragments);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }

    fn respond(&self, prompt: &str) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(prompt.to_string());

        let remaining = self.failures_before_success.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_before_success.store(remaining - 1, Ordering::SeqCst);
            return Err(GenerationError::Status {
                status: 503,
                details: "model overloaded".to_string(),
            });
        }

        Ok(match &self.reply {
            Reply::Fixed(text) => text.clone(),
            Reply::EchoContext => {
                let context = prompt
                    .split_once("Context:\n")
                    .and_then(|(_, rest)| rest.split_once("\n\nQuestion:"))
                    .map(|(context, _)| context)
                    .unwrap_or_default();
                format!("According to the document: {context}")
            }
        })
    }
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.respond(prompt)
    }

    async fn stream(&self, prompt: &str) -> Result<FragmentReceiver, GenerationError> {
        let text = self.respond(prompt)?;
        let fragments: Vec<String> = text.split_inclusive(' ').map(str::to_string).collect();

        let (tx, rx) = mpsc::channel(fragments.len() + 1);
        for (index, fragment) in fragments.into_iter().enumerate() {
            if self.stream_break_after == Some(index) {
                let _ = tx.try_send(Err(GenerationError::Stream("connection reset".to_string())));
                return Ok(rx);
            }
            let _ = tx.try_send(Ok(fragment));
        }
        Ok(rx)
    }
}

/// One request seen by [`serve_sequence`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// A complete HTTP/1.1 response with a JSON body.
pub fn json_response(status: u16, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} Status\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// An event stream response delimited by closing the connection.
pub fn sse_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n{body}"
    )
}

/// A response that promises more bytes than it sends before hanging up.
pub fn truncated_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len() + 512
    )
}

/// Serves `responses` in order, one connection each, on a local port. The
/// handle resolves to the requests received once every response was sent.
pub async fn serve_sequence(responses: Vec<String>) -> (String, JoinHandle<Vec<RecordedRequest>>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind local listener");
    let address = listener.local_addr().expect("listener address");

    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.expect("accept connection");
            requests.push(read_request(&mut socket).await);
            socket
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            let _ = socket.shutdown().await;
        }
        requests
    });

    (format!("http://{address}"), handle)
}

async fn read_request(socket: &mut TcpStream) -> RecordedRequest {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(position) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
        let read = socket.read(&mut chunk).await.expect("read request");
        assert!(read > 0, "connection closed before the request headers ended");
        buffer.extend_from_slice(&chunk[..read]);
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < header_end + content_length {
        let read = socket.read(&mut chunk).await.expect("read request body");
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }

    RecordedRequest {
        method,
        path,
        body: String::from_utf8_lossy(&buffer[header_end..]).to_string(),
    }
}
