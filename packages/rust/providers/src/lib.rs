//! External collaborators: completion, embeddings, web search, page fetch.
//!
//! Each collaborator is an object-safe async trait so the pipeline can hold
//! injected `Arc<dyn …>` handles and tests can substitute deterministic fakes.
//! This crate provides:
//! - [`CompletionService`] / [`Embedder`]: implemented by [`OpenAiClient`]
//! - [`SearchProvider`]: implemented by [`BraveSearch`]
//! - [`PageSource`]: implemented by [`HttpPageSource`]

mod brave;
mod openai;
mod page;
mod sse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use url::Url;

use ragline_shared::Result;

pub use brave::BraveSearch;
pub use openai::OpenAiClient;
pub use page::HttpPageSource;
pub use sse::{SseData, SseDecoder};

/// User-Agent string for outbound requests.
pub(crate) const USER_AGENT: &str = concat!("Ragline/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Role tag on a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A completion request: model id plus ordered messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// The common system + user prompt shape.
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
        }
    }
}

/// Ordered incremental text deltas. The channel closing is end-of-stream;
/// an `Err` item means the provider failed mid-stream.
pub type DeltaStream = mpsc::Receiver<Result<String>>;

/// Generative completion service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Single-shot completion. `Ok(None)` means the model returned no content.
    async fn complete(&self, request: &ChatRequest) -> Result<Option<String>>;

    /// Streaming completion.
    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream>;
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// Text embedding provider. Returns one vector per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// A raw search result. Fields may be empty; normalization happens downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

/// Web search provider.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Results in the provider's own ranking order.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;

    /// The provider's own domain, whose links are never treated as sources.
    fn own_domain(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Page source
// ---------------------------------------------------------------------------

/// Raw page payload fetcher.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String>;
}
