//! Rephrase → search → normalize → concurrent per-source fetch → aggregate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{info, instrument, warn};
use url::Url;

use ragline_providers::{ChatRequest, CompletionService, SearchHit, SearchProvider};
use ragline_shared::{
    EventPayload, FragmentSet, MAX_SOURCES, RaglineError, Result, SourceCandidate,
    VECTOR_CREATION_DONE,
};

use crate::events::{EventPublisher, RunObserver};
use crate::fetcher::{SourceFetcher, SourceOutcome};
use crate::prompts::REPHRASE_SYSTEM;

/// Everything retrieval hands to answer generation.
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// The search-engine phrasing of the query.
    pub rephrased: String,
    /// Sources that survived normalization, as published.
    pub candidates: Vec<SourceCandidate>,
    /// Best fragment per successful source, in completion order.
    pub fragments: FragmentSet,
    /// Sources accounted for, found or absent. Always equals `candidates.len()`.
    pub processed: usize,
}

#[derive(Clone)]
pub struct RetrievalCoordinator {
    completion: Arc<dyn CompletionService>,
    search: Arc<dyn SearchProvider>,
    fetcher: SourceFetcher,
    model: String,
    max_sources: usize,
}

impl RetrievalCoordinator {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        search: Arc<dyn SearchProvider>,
        fetcher: SourceFetcher,
        model: impl Into<String>,
        max_sources: usize,
    ) -> Self {
        Self {
            completion,
            search,
            fetcher,
            model: model.into(),
            max_sources: max_sources.min(MAX_SOURCES),
        }
    }

    /// Run retrieval for `query`, publishing `Sources` and `VectorCreation`.
    ///
    /// Fails only when rephrasing yields nothing or the search itself fails;
    /// individual sources never fail the run.
    #[instrument(skip_all, fields(run_id = %publisher.run_id()))]
    pub async fn retrieve(&self, query: &str, publisher: &EventPublisher) -> Result<Retrieval> {
        let observer = publisher.observer();

        observer.phase("Rephrasing query");
        let rephrased = self.rephrase(query).await?;

        observer.phase("Searching the web");
        let hits = self.search.search(&rephrased).await?;
        let raw_count = hits.len();
        let candidates = normalize_candidates(hits, self.search.own_domain(), self.max_sources);
        info!(%rephrased, raw = raw_count, kept = candidates.len(), "search results normalized");

        publisher
            .publish(EventPayload::Sources(candidates.clone()))
            .await;

        observer.phase("Scanning sources");
        let (fragments, processed) = self.gather(&candidates, query, observer).await;
        info!(
            fragments = fragments.len(),
            processed,
            total = candidates.len(),
            "sources scanned"
        );

        publisher
            .publish(EventPayload::VectorCreation(VECTOR_CREATION_DONE.to_string()))
            .await;

        Ok(Retrieval {
            rephrased,
            candidates,
            fragments,
            processed,
        })
    }

    async fn rephrase(&self, query: &str) -> Result<String> {
        let request = ChatRequest::new(&self.model, REPHRASE_SYSTEM, query);
        let content = self
            .completion
            .complete(&request)
            .await
            .map_err(|e| RaglineError::Rephrase(e.to_string()))?;

        content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| RaglineError::Rephrase("model returned no content".into()))
    }

    /// Fetch every candidate concurrently and keep the present fragments in
    /// completion order.
    async fn gather(
        &self,
        candidates: &[SourceCandidate],
        query: &str,
        observer: &dyn RunObserver,
    ) -> (FragmentSet, usize) {
        let mut tasks = JoinSet::new();
        let mut links = HashMap::new();

        for candidate in candidates {
            let fetcher = self.fetcher.clone();
            let candidate = candidate.clone();
            let query = query.to_string();
            let link = candidate.link.clone();
            let handle = tasks.spawn(async move { fetcher.fetch(&candidate, &query).await });
            links.insert(handle.id(), link);
        }

        let total = candidates.len();
        let mut fragments = FragmentSet::new();
        let mut processed = 0;

        while let Some(joined) = tasks.join_next_with_id().await {
            processed += 1;
            // A panicked fetch counts as an absent source.
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, Some(outcome)),
                Err(e) => {
                    warn!(error = %e, "source task did not complete");
                    (e.id(), None)
                }
            };

            let found = match outcome {
                Some(SourceOutcome::Found(fragment)) => fragments.push(fragment),
                _ => false,
            };
            if let Some(link) = links.get(&id) {
                observer.source_processed(link, found, processed, total);
            }
        }

        (fragments, processed)
    }
}

/// Filter raw search hits down to usable, distinct sources.
///
/// Keeps hits with a non-empty title and an http(s) link, drops links on the
/// provider's own domain (or any subdomain of it), removes duplicates, and
/// only then caps at `max`.
pub fn normalize_candidates(hits: Vec<SearchHit>, own_domain: &str, max: usize) -> Vec<SourceCandidate> {
    let own_domain = own_domain.trim().trim_start_matches('.').to_ascii_lowercase();
    let mut seen = HashSet::new();

    hits.into_iter()
        .filter_map(|hit| {
            let title = hit.title.trim();
            let link = hit.link.trim();
            if title.is_empty() || link.is_empty() {
                return None;
            }

            let mut url = Url::parse(link).ok()?;
            if !matches!(url.scheme(), "http" | "https") {
                return None;
            }
            let host = url.host_str()?.to_ascii_lowercase();
            if is_own_domain(&host, &own_domain) {
                return None;
            }

            url.set_fragment(None);
            if !seen.insert(url.to_string()) {
                return None;
            }

            Some(SourceCandidate {
                title: title.to_string(),
                link: url,
            })
        })
        .take(max)
        .collect()
}

fn is_own_domain(host: &str, own_domain: &str) -> bool {
    if own_domain.is_empty() {
        return false;
    }
    host == own_domain
        || host
            .strip_suffix(own_domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
