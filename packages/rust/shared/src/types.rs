//! Core domain types for a Ragline run.

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Maximum number of sources (and surviving fragments) per run.
pub const MAX_SOURCES: usize = 4;

/// Content of the `VectorCreation` progress event.
pub const VECTOR_CREATION_DONE: &str = "Finished Scanning Sources.";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one orchestration run (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Sink-assigned identifier of a persisted event record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Generate a fresh identifier (used by sinks that assign ids locally).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Sources and fragments
// ---------------------------------------------------------------------------

/// A search result that survived normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCandidate {
    /// Result title as reported by the search provider.
    pub title: String,
    /// Page location.
    pub link: Url,
}

/// A bounded slice of one source's extracted text, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    #[serde(rename = "source")]
    pub source_link: Url,
}

/// The best fragment per source, in completion order, capped at [`MAX_SOURCES`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FragmentSet(Vec<Fragment>);

impl FragmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment. Returns `false` (and drops it) when the set is full.
    pub fn push(&mut self, fragment: Fragment) -> bool {
        if self.0.len() >= MAX_SOURCES {
            return false;
        }
        self.0.push(fragment);
        true
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Fragment> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Fragment] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Fragment> {
        self.0
    }
}

impl FromIterator<Fragment> for FragmentSet {
    fn from_iter<I: IntoIterator<Item = Fragment>>(iter: I) -> Self {
        let mut set = Self::new();
        for fragment in iter {
            if !set.push(fragment) {
                break;
            }
        }
        set
    }
}

// ---------------------------------------------------------------------------
// Persisted events
// ---------------------------------------------------------------------------

/// Kind tag of a persisted event, in causal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Query,
    Sources,
    VectorCreation,
    #[serde(rename = "GPT")]
    Gpt,
    FollowUp,
}

impl EventKind {
    /// Tag stored alongside the payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "Query",
            Self::Sources => "Sources",
            Self::VectorCreation => "VectorCreation",
            Self::Gpt => "GPT",
            Self::FollowUp => "FollowUp",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event body, serialized as `{"type": ..., "content": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content")]
pub enum EventPayload {
    Query(String),
    Sources(Vec<SourceCandidate>),
    VectorCreation(String),
    #[serde(rename = "GPT")]
    Gpt(String),
    FollowUp(Vec<String>),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Query(_) => EventKind::Query,
            Self::Sources(_) => EventKind::Sources,
            Self::VectorCreation(_) => EventKind::VectorCreation,
            Self::Gpt(_) => EventKind::Gpt,
            Self::FollowUp(_) => EventKind::FollowUp,
        }
    }
}

/// The unit pushed to the message sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEvent {
    /// Run that produced this event.
    pub run_id: RunId,
    /// Typed event body.
    pub payload: EventPayload,
}

impl PersistedEvent {
    pub fn new(run_id: RunId, payload: EventPayload) -> Self {
        Self { run_id, payload }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
