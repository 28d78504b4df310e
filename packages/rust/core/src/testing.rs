//! Deterministic collaborator fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use ragline_providers::{
    ChatRequest, CompletionService, DeltaStream, Embedder, PageSource, SearchHit, SearchProvider,
};
use ragline_shared::{EventId, EventKind, EventPayload, PersistedEvent, RaglineError, Result};
use ragline_storage::{MemorySink, MessageSink};

use crate::events::RunObserver;
use crate::prompts::REPHRASE_SYSTEM;

pub fn link(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub fn hit(title: &str, link: &str) -> SearchHit {
    SearchHit {
        title: title.into(),
        link: link.into(),
        snippet: String::new(),
    }
}

/// An HTML page whose extracted text starts with `lead` and is padded well
/// past the minimum content length.
pub fn article(lead: &str) -> String {
    let filler = "Lorem ipsum dolor sit amet consectetur adipiscing elit sed do eiusmod tempor. ".repeat(6);
    format!(
        "<html><head><title>t</title></head><body><nav>Home</nav><p>{lead}</p><p>{filler}</p></body></html>"
    )
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

const DIMS: usize = 256;

/// Bag-of-words hashing embedder: texts sharing words score as similar.
#[derive(Debug, Default)]
pub struct FakeEmbedder {
    drop_last: bool,
    fail: bool,
    pub calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dropping_last_vector(mut self) -> Self {
        self.drop_last = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in word.bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x100000001b3);
            }
            v[(hash % DIMS as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RaglineError::Network("embeddings unavailable".into()));
        }
        let mut out: Vec<Vec<f32>> = inputs.iter().map(|t| Self::vector(t)).collect();
        if self.drop_last {
            out.pop();
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// How the fake answers a single-shot call.
#[derive(Debug, Clone)]
pub enum Reply {
    Content(String),
    Empty,
    Error,
}

#[derive(Debug)]
pub struct FakeCompletion {
    rephrase: Reply,
    followup: Reply,
    deltas: Vec<String>,
    open_error: bool,
    fail_after: Option<usize>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl FakeCompletion {
    pub fn new() -> Self {
        Self {
            rephrase: Reply::Content("capital of France".into()),
            followup: Reply::Content(
                r#"{"follow_up": ["What is the population of Paris?", "When did Paris become the capital?", "What is the capital of Germany?", "What river runs through Paris?"]}"#
                    .into(),
            ),
            deltas: vec!["Paris".into(), " is the capital.".into()],
            open_error: false,
            fail_after: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn rephrase(mut self, reply: Reply) -> Self {
        self.rephrase = reply;
        self
    }

    pub fn followup(mut self, reply: Reply) -> Self {
        self.followup = reply;
        self
    }

    pub fn deltas(mut self, deltas: &[&str]) -> Self {
        self.deltas = deltas.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn failing_to_open(mut self) -> Self {
        self.open_error = true;
        self
    }

    /// Emit `n` deltas, then a mid-stream error.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn recorded(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn reply(reply: &Reply) -> Result<Option<String>> {
    match reply {
        Reply::Content(c) => Ok(Some(c.clone())),
        Reply::Empty => Ok(None),
        Reply::Error => Err(RaglineError::Generation("HTTP 500".into())),
    }
}

#[async_trait]
impl CompletionService for FakeCompletion {
    async fn complete(&self, request: &ChatRequest) -> Result<Option<String>> {
        self.requests.lock().unwrap().push(request.clone());
        if request.messages[0].content == REPHRASE_SYSTEM {
            reply(&self.rephrase)
        } else {
            reply(&self.followup)
        }
    }

    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream> {
        self.requests.lock().unwrap().push(request.clone());
        if self.open_error {
            return Err(RaglineError::Network("connection refused".into()));
        }

        let (tx, rx) = mpsc::channel(self.deltas.len() + 1);
        let take = self.fail_after.unwrap_or(self.deltas.len());
        for delta in self.deltas.iter().take(take) {
            let _ = tx.try_send(Ok(delta.clone()));
        }
        if self.fail_after.is_some() {
            let _ = tx.try_send(Err(RaglineError::Network("stream reset".into())));
        }
        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FakeSearch {
    hits: Vec<SearchHit>,
    fail: bool,
    pub queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            fail: false,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            hits: Vec::new(),
            fail: true,
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(RaglineError::Network("search: HTTP 503".into()));
        }
        Ok(self.hits.clone())
    }

    fn own_domain(&self) -> &str {
        "brave.com"
    }
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Page {
    Body(String),
    Slow(Duration, String),
    Fail,
    Panic,
}

#[derive(Debug, Default)]
pub struct FakePages {
    pages: HashMap<String, Page>,
}

impl FakePages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, page: Page) -> Self {
        self.pages.insert(link(url).to_string(), page);
        self
    }
}

#[async_trait]
impl PageSource for FakePages {
    async fn fetch(&self, url: &Url) -> Result<String> {
        match self.pages.get(url.as_str()) {
            Some(Page::Body(body)) => Ok(body.clone()),
            Some(Page::Slow(delay, body)) => {
                tokio::time::sleep(*delay).await;
                Ok(body.clone())
            }
            Some(Page::Panic) => panic!("page source crashed on {url}"),
            Some(Page::Fail) | None => Err(RaglineError::Network(format!("{url}: HTTP 404"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Sink that only supports insert and delete, so `replace` falls back to
/// delete-then-insert. Tracks the most answer records ever live at once.
#[derive(Debug, Default)]
pub struct DeleteInsertSink {
    records: Mutex<Vec<(EventId, PersistedEvent)>>,
    max_live_answers: AtomicUsize,
    fail_insert: Option<usize>,
    pub inserts: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl DeleteInsertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The n-th insert (1-based) fails after nothing was written.
    pub fn failing_insert_on(n: usize) -> Self {
        Self {
            fail_insert: Some(n),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<PersistedEvent> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn ids(&self) -> Vec<EventId> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn max_live_answers(&self) -> usize {
        self.max_live_answers.load(Ordering::SeqCst)
    }

    fn observe(&self, records: &[(EventId, PersistedEvent)]) {
        let live = records
            .iter()
            .filter(|(_, e)| e.kind() == EventKind::Gpt)
            .count();
        self.max_live_answers.fetch_max(live, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageSink for DeleteInsertSink {
    async fn insert(&self, event: &PersistedEvent) -> Result<EventId> {
        let n = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_insert == Some(n) {
            return Err(RaglineError::Storage(format!("insert {n} rejected")));
        }
        let id = EventId::generate();
        let mut records = self.records.lock().unwrap();
        records.push((id.clone(), event.clone()));
        self.observe(&records);
        Ok(id)
    }

    async fn delete(&self, id: &EventId) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap();
        records.retain(|(existing, _)| existing != id);
        self.observe(&records);
        Ok(())
    }
}

/// Sink whose n-th write (1-based, counting insert/delete/replace) fails.
#[derive(Debug)]
pub struct FlakySink {
    inner: MemorySink,
    fail_on: Vec<usize>,
    writes: AtomicUsize,
}

impl FlakySink {
    pub fn failing_on(fail_on: &[usize]) -> Self {
        Self {
            inner: MemorySink::new(),
            fail_on: fail_on.to_vec(),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn events(&self) -> Vec<PersistedEvent> {
        self.inner.events()
    }

    fn tick(&self) -> Result<()> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&n) {
            return Err(RaglineError::Storage(format!("write {n} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSink for FlakySink {
    async fn insert(&self, event: &PersistedEvent) -> Result<EventId> {
        self.tick()?;
        self.inner.insert(event).await
    }

    async fn delete(&self, id: &EventId) -> Result<()> {
        self.tick()?;
        self.inner.delete(id).await
    }

    async fn replace(&self, id: &EventId, event: &PersistedEvent) -> Result<EventId> {
        self.tick()?;
        self.inner.replace(id, event).await
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Observer that records every callback.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    phases: Mutex<Vec<String>>,
    sources: Mutex<Vec<(Url, bool, usize, usize)>>,
    payloads: Mutex<Vec<EventPayload>>,
}

impl RecordingObserver {
    pub fn phases(&self) -> Vec<String> {
        self.phases.lock().unwrap().clone()
    }

    pub fn sources(&self) -> Vec<(Url, bool, usize, usize)> {
        self.sources.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<EventPayload> {
        self.payloads.lock().unwrap().clone()
    }
}

impl RunObserver for RecordingObserver {
    fn phase(&self, name: &str) {
        self.phases.lock().unwrap().push(name.to_string());
    }

    fn source_processed(&self, link: &Url, found: bool, processed: usize, total: usize) {
        self.sources
            .lock()
            .unwrap()
            .push((link.clone(), found, processed, total));
    }

    fn published(&self, payload: &EventPayload) {
        self.payloads.lock().unwrap().push(payload.clone());
    }
}
