//! OpenAI-compatible chat completion and embeddings client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use ragline_shared::{OpenAiConfig, RaglineError, Result, api_key};

use crate::sse::{SseData, SseDecoder};
use crate::{ChatMessage, ChatRequest, CompletionService, DeltaStream, Embedder, USER_AGENT};

/// Request timeout for single-shot calls (completion, embeddings).
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Buffered deltas between the reader task and the consumer.
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Longest provider error body echoed into an error message.
const MAX_ERROR_BODY: usize = 300;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: Option<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingsBody<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for an OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    embedding_model: String,
}

impl OpenAiClient {
    /// Create a client against `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Result<Self> {
        // No whole-request timeout: a streamed answer may legitimately run long.
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RaglineError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            embedding_model: embedding_model.into(),
        })
    }

    /// Build from the `[openai]` config section, reading the key from the environment.
    pub fn from_config(config: &OpenAiConfig) -> Result<Self> {
        let key = api_key(&config.api_key_env, "OpenAI")?;
        Self::new(&config.base_url, key, &config.embedding_model)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let url = format!("{}/{path}", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RaglineError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(RaglineError::Generation(format!("{url}: HTTP {status}: {body}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    #[instrument(skip_all, fields(model = %request.model))]
    async fn complete(&self, request: &ChatRequest) -> Result<Option<String>> {
        let body = CompletionBody {
            model: &request.model,
            messages: &request.messages,
            stream: false,
        };
        let response = self
            .post(
                "chat/completions",
                &body,
                Some(Duration::from_secs(REQUEST_TIMEOUT_SECS)),
            )
            .await?;

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| RaglineError::parse(format!("invalid completion response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.trim().is_empty());

        debug!(has_content = content.is_some(), "completion received");
        Ok(content)
    }

    #[instrument(skip_all, fields(model = %request.model))]
    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream> {
        let body = CompletionBody {
            model: &request.model,
            messages: &request.messages,
            stream: true,
        };
        let response = self.post("chat/completions", &body, None).await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(pump_stream(response, tx));
        Ok(rx)
    }
}

/// Read SSE chunks off the response and forward content deltas in order.
async fn pump_stream(mut response: Response, tx: mpsc::Sender<Result<String>>) {
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                let _ = tx
                    .send(Err(RaglineError::Network(format!("stream read failed: {e}"))))
                    .await;
                return;
            }
        };

        for data in decoder.push(&chunk) {
            if !forward(data, &tx).await {
                return;
            }
        }
    }

    if let Some(data) = decoder.finish() {
        forward(data, &tx).await;
    }
}

/// Send one decoded line downstream. Returns `false` once the stream is over
/// (terminator seen, undecodable payload, or the consumer hung up).
async fn forward(data: SseData, tx: &mpsc::Sender<Result<String>>) -> bool {
    let payload = match data {
        SseData::Done => return false,
        SseData::Payload(payload) => payload,
    };

    let chunk: StreamChunk = match serde_json::from_str(&payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(error = %e, "undecodable stream chunk");
            let _ = tx
                .send(Err(RaglineError::parse(format!("invalid stream chunk: {e}"))))
                .await;
            return false;
        }
    };

    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .unwrap_or_default();

    if delta.is_empty() {
        return true;
    }
    tx.send(Ok(delta)).await.is_ok()
}

#[async_trait]
impl Embedder for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.embedding_model, inputs = inputs.len()))]
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingsBody {
            model: &self.embedding_model,
            input: inputs,
        };
        let response = self
            .post(
                "embeddings",
                &body,
                Some(Duration::from_secs(REQUEST_TIMEOUT_SECS)),
            )
            .await?;

        let mut parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| RaglineError::parse(format!("invalid embeddings response: {e}")))?;

        if parsed.data.len() != inputs.len() {
            return Err(RaglineError::Generation(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|item| item.index);
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}
