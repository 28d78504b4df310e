//! Per-source fetch: page → text → fragments → index → best fragment.
//!
//! Every exit path yields a [`SourceOutcome`]. Absence is an expected result,
//! never an error the caller has to handle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use ragline_extract::{chunk_text, extract_text};
use ragline_providers::{Embedder, PageSource};
use ragline_shared::{Fragment, PipelineConfig, Result, SourceCandidate};

use crate::index::{EphemeralIndex, Metric};

/// Why a source produced no fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbsenceReason {
    /// The page did not arrive within the deadline.
    Timeout,
    /// Network error, non-2xx status, or refused URL.
    FetchFailed,
    /// Extracted text below the minimum length.
    TooShort { chars: usize },
    /// Extraction left nothing to chunk.
    NoFragments,
    /// Embedding or nearest-neighbour lookup failed.
    IndexFailed,
}

impl fmt::Display for AbsenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::FetchFailed => f.write_str("fetch failed"),
            Self::TooShort { chars } => write!(f, "too short ({chars} chars)"),
            Self::NoFragments => f.write_str("no fragments"),
            Self::IndexFailed => f.write_str("index failed"),
        }
    }
}

/// Result of one source fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Found(Fragment),
    Absent(AbsenceReason),
}

impl SourceOutcome {
    pub fn into_fragment(self) -> Option<Fragment> {
        match self {
            Self::Found(fragment) => Some(fragment),
            Self::Absent(_) => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Tunables for [`SourceFetcher`].
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub deadline: Duration,
    pub min_content_chars: usize,
    pub chunk_size: usize,
    pub metric: Metric,
}

impl FetchSettings {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            deadline: config.fetch_timeout,
            min_content_chars: config.min_content_chars,
            chunk_size: config.chunk_size,
            metric: config.metric.parse()?,
        })
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_millis(1500),
            min_content_chars: 250,
            chunk_size: 200,
            metric: Metric::Cosine,
        }
    }
}

/// Fetches one source and distils it to its best-matching fragment.
#[derive(Clone)]
pub struct SourceFetcher {
    pages: Arc<dyn PageSource>,
    embedder: Arc<dyn Embedder>,
    settings: FetchSettings,
}

impl SourceFetcher {
    pub fn new(pages: Arc<dyn PageSource>, embedder: Arc<dyn Embedder>, settings: FetchSettings) -> Self {
        Self {
            pages,
            embedder,
            settings,
        }
    }

    #[instrument(skip(self, query), fields(link = %candidate.link))]
    pub async fn fetch(&self, candidate: &SourceCandidate, query: &str) -> SourceOutcome {
        let outcome = self.fetch_inner(candidate, query).await;
        match &outcome {
            SourceOutcome::Found(fragment) => {
                debug!(link = %candidate.link, chars = fragment.text.chars().count(), "source found");
            }
            SourceOutcome::Absent(reason) => {
                debug!(link = %candidate.link, %reason, "source absent");
            }
        }
        outcome
    }

    async fn fetch_inner(&self, candidate: &SourceCandidate, query: &str) -> SourceOutcome {
        // The deadline covers the page fetch only; a late page is dropped with the future.
        let page = tokio::time::timeout(self.settings.deadline, self.pages.fetch(&candidate.link)).await;
        let html = match page {
            Err(_) => return SourceOutcome::Absent(AbsenceReason::Timeout),
            Ok(Err(e)) => {
                debug!(link = %candidate.link, error = %e, "page fetch failed");
                return SourceOutcome::Absent(AbsenceReason::FetchFailed);
            }
            Ok(Ok(html)) => html,
        };

        // Parsing a multi-megabyte page is CPU-bound; keep it off the async workers.
        let extracted = match tokio::task::spawn_blocking(move || extract_text(&html)).await {
            Ok(extracted) => extracted,
            Err(e) => {
                debug!(link = %candidate.link, error = %e, "text extraction aborted");
                return SourceOutcome::Absent(AbsenceReason::NoFragments);
            }
        };
        if !extracted.is_at_least(self.settings.min_content_chars) {
            return SourceOutcome::Absent(AbsenceReason::TooShort {
                chars: extracted.char_count,
            });
        }

        let chunks = match chunk_text(&extracted.text, self.settings.chunk_size) {
            Ok(chunks) if !chunks.is_empty() => chunks,
            _ => return SourceOutcome::Absent(AbsenceReason::NoFragments),
        };

        let index = match EphemeralIndex::build(
            self.embedder.as_ref(),
            candidate.link.clone(),
            chunks,
            self.settings.metric,
        )
        .await
        {
            Ok(index) => index,
            Err(e) => {
                debug!(link = %candidate.link, error = %e, "index build failed");
                return SourceOutcome::Absent(AbsenceReason::IndexFailed);
            }
        };

        match index.nearest(self.embedder.as_ref(), query).await {
            Ok(Some(fragment)) => SourceOutcome::Found(fragment),
            Ok(None) => SourceOutcome::Absent(AbsenceReason::NoFragments),
            Err(e) => {
                debug!(link = %candidate.link, error = %e, "nearest lookup failed");
                SourceOutcome::Absent(AbsenceReason::IndexFailed)
            }
        }
    }
}
