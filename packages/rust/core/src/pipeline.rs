//! End-to-end run: Query → retrieval → streamed answer → follow-ups.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use ragline_providers::{CompletionService, Embedder, PageSource, SearchProvider};
use ragline_shared::{
    EventPayload, FragmentSet, PipelineConfig, RaglineError, Result, RunId, SourceCandidate,
};
use ragline_storage::MessageSink;

use crate::answer::StreamingAnswerer;
use crate::events::{EventPublisher, RunObserver};
use crate::fetcher::{FetchSettings, SourceFetcher};
use crate::followup::FollowupGenerator;
use crate::retrieval::{Retrieval, RetrievalCoordinator};

/// Injected external collaborators for a [`Pipeline`].
#[derive(Clone)]
pub struct Collaborators {
    pub completion: Arc<dyn CompletionService>,
    pub search: Arc<dyn SearchProvider>,
    pub pages: Arc<dyn PageSource>,
    pub embedder: Arc<dyn Embedder>,
    pub sink: Arc<dyn MessageSink>,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: RunId,
    pub query: String,
    pub rephrased: String,
    pub sources: Vec<SourceCandidate>,
    pub fragments: FragmentSet,
    pub answer: String,
    pub follow_ups: Vec<String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Success,
    Failure,
}

/// Immediate reply to a submitted query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acknowledgment {
    #[serde(skip)]
    pub status: AckStatus,
    pub message: String,
}

impl Acknowledgment {
    pub fn success() -> Self {
        Self {
            status: AckStatus::Success,
            message: "Success".into(),
        }
    }

    /// The cause is logged, never returned to the caller.
    pub fn failure() -> Self {
        Self {
            status: AckStatus::Failure,
            message: "Internal Server Error".into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AckStatus::Success
    }
}

/// An accepted (or rejected) query. When accepted, `handle` resolves once the
/// answer and follow-ups have been published.
pub struct Submission {
    pub run_id: RunId,
    pub ack: Acknowledgment,
    pub handle: Option<JoinHandle<RunSummary>>,
}

/// The retrieval-augmented answer pipeline.
#[derive(Clone)]
pub struct Pipeline {
    retrieval: RetrievalCoordinator,
    answerer: StreamingAnswerer,
    followups: FollowupGenerator,
    sink: Arc<dyn MessageSink>,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig, collaborators: Collaborators) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(RaglineError::config("pipeline.chunk_size must be greater than zero"));
        }
        if config.max_sources == 0 {
            return Err(RaglineError::config("pipeline.max_sources must be greater than zero"));
        }

        let fetcher = SourceFetcher::new(
            collaborators.pages,
            collaborators.embedder,
            FetchSettings::from_config(config)?,
        );

        Ok(Self {
            retrieval: RetrievalCoordinator::new(
                collaborators.completion.clone(),
                collaborators.search,
                fetcher,
                &config.chat_model,
                config.max_sources,
            ),
            answerer: StreamingAnswerer::new(collaborators.completion.clone(), &config.chat_model),
            followups: FollowupGenerator::new(collaborators.completion, &config.followup_model),
            sink: collaborators.sink,
        })
    }

    /// Run the whole pipeline and wait for it.
    ///
    /// Errors only when the query is empty, rephrasing yields nothing, or the
    /// search fails. Everything after retrieval is best-effort.
    pub async fn run(&self, query: &str, observer: Arc<dyn RunObserver>) -> Result<RunSummary> {
        let query = validate_query(query)?;
        let started = Instant::now();
        let publisher = EventPublisher::new(self.sink.clone(), observer, RunId::new());

        let retrieval = self.begin(&query, &publisher).await?;
        Ok(self.complete(query, retrieval, publisher, started).await)
    }

    /// Accept a query and acknowledge once retrieval has succeeded; answer
    /// generation and follow-ups continue on a background task.
    pub async fn submit(&self, query: &str, observer: Arc<dyn RunObserver>) -> Submission {
        let run_id = RunId::new();

        let query = match validate_query(query) {
            Ok(query) => query,
            Err(e) => {
                warn!(%run_id, error = %e, "query rejected");
                return Submission {
                    run_id,
                    ack: Acknowledgment::failure(),
                    handle: None,
                };
            }
        };

        let started = Instant::now();
        let publisher = EventPublisher::new(self.sink.clone(), observer, run_id);

        match self.begin(&query, &publisher).await {
            Ok(retrieval) => {
                let pipeline = self.clone();
                let handle = tokio::spawn(async move {
                    pipeline.complete(query, retrieval, publisher, started).await
                });
                Submission {
                    run_id,
                    ack: Acknowledgment::success(),
                    handle: Some(handle),
                }
            }
            Err(e) => {
                error!(%run_id, error = %e, "run failed");
                Submission {
                    run_id,
                    ack: Acknowledgment::failure(),
                    handle: None,
                }
            }
        }
    }

    /// Publish the query and run retrieval.
    #[instrument(skip_all, fields(run_id = %publisher.run_id()))]
    async fn begin(&self, query: &str, publisher: &EventPublisher) -> Result<Retrieval> {
        info!(%query, "starting run");
        publisher.publish(EventPayload::Query(query.to_string())).await;
        self.retrieval.retrieve(query, publisher).await
    }

    /// Stream the answer, then publish follow-ups.
    #[instrument(skip_all, fields(run_id = %publisher.run_id()))]
    async fn complete(
        &self,
        query: String,
        retrieval: Retrieval,
        publisher: EventPublisher,
        started: Instant,
    ) -> RunSummary {
        let observer = publisher.observer();

        observer.phase("Generating answer");
        let answer = self
            .answerer
            .answer(&query, &retrieval.fragments, &publisher)
            .await;

        observer.phase("Generating follow-ups");
        let follow_ups = self.followups.generate(&query).await;
        publisher
            .publish(EventPayload::FollowUp(follow_ups.clone()))
            .await;

        let elapsed = started.elapsed();
        info!(
            sources = retrieval.candidates.len(),
            fragments = retrieval.fragments.len(),
            answer_chars = answer.text.chars().count(),
            follow_ups = follow_ups.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "run complete"
        );

        RunSummary {
            run_id: publisher.run_id(),
            query,
            rephrased: retrieval.rephrased,
            sources: retrieval.candidates,
            fragments: retrieval.fragments,
            answer: answer.text,
            follow_ups,
            elapsed,
        }
    }
}

/// Reject blank queries. Accepted queries are kept exactly as submitted.
fn validate_query(query: &str) -> Result<String> {
    if query.trim().is_empty() {
        return Err(RaglineError::validation("query must not be empty"));
    }
    Ok(query.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SilentObserver;
    use crate::testing::{
        DeleteInsertSink, FakeCompletion, FakeEmbedder, FakePages, FakeSearch, FlakySink, Page,
        RecordingObserver, Reply, article, hit,
    };
    use ragline_shared::{EventKind, PersistedEvent, VECTOR_CREATION_DONE};
    use ragline_storage::MemorySink;

    const QUERY: &str = "What is the capital of France?";

    fn france_search() -> FakeSearch {
        FakeSearch::new(vec![
            hit("Brave", "https://search.brave.com/search?q=capital+of+france"),
            hit("Paris - Wikipedia", "https://en.wikipedia.org/wiki/Paris"),
            hit("France facts", "https://facts.example.com/france"),
            hit("Capitals", "https://capitals.example.org/europe"),
            hit("Slow", "https://slow.example.net/paris"),
        ])
    }

    fn france_pages() -> FakePages {
        FakePages::new()
            .with(
                "https://en.wikipedia.org/wiki/Paris",
                Page::Body(article("Paris is the capital of France.")),
            )
            .with(
                "https://facts.example.com/france",
                Page::Body(article("France has Paris as its capital city.")),
            )
            .with(
                "https://capitals.example.org/europe",
                Page::Body(article("The capital of France is Paris.")),
            )
            .with(
                "https://slow.example.net/paris",
                Page::Slow(Duration::from_secs(30), article("Paris.")),
            )
    }

    fn pipeline(
        completion: FakeCompletion,
        search: FakeSearch,
        pages: FakePages,
        sink: Arc<dyn MessageSink>,
    ) -> Pipeline {
        Pipeline::new(
            &PipelineConfig::default(),
            Collaborators {
                completion: Arc::new(completion),
                search: Arc::new(search),
                pages: Arc::new(pages),
                embedder: Arc::new(FakeEmbedder::new()),
                sink,
            },
        )
        .unwrap()
    }

    fn kinds(events: &[PersistedEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn france_scenario_end_to_end() {
        let sink = Arc::new(DeleteInsertSink::new());
        let pipeline = pipeline(FakeCompletion::new(), france_search(), france_pages(), sink.clone());

        let summary = pipeline.run(QUERY, Arc::new(SilentObserver)).await.unwrap();

        assert_eq!(summary.sources.len(), 4);
        assert_eq!(summary.fragments.len(), 3);
        assert_eq!(summary.answer, "Paris is the capital.");
        assert_eq!(summary.follow_ups.len(), 4);

        let events = sink.events();
        assert_eq!(
            kinds(&events),
            vec![
                EventKind::Query,
                EventKind::Sources,
                EventKind::VectorCreation,
                EventKind::Gpt,
                EventKind::FollowUp
            ]
        );
        assert_eq!(events[0].payload, EventPayload::Query(QUERY.into()));
        assert_eq!(
            events[2].payload,
            EventPayload::VectorCreation(VECTOR_CREATION_DONE.into())
        );
        assert_eq!(events[3].payload, EventPayload::Gpt("Paris is the capital.".into()));
        match &events[4].payload {
            EventPayload::FollowUp(questions) => assert_eq!(questions.len(), 4),
            other => panic!("expected follow-ups, got {other:?}"),
        }
        assert_eq!(sink.max_live_answers(), 1);
        assert!(events.iter().all(|e| e.run_id == summary.run_id));
    }

    #[tokio::test]
    async fn all_absent_still_answers() {
        let pages = FakePages::new()
            .with("https://en.wikipedia.org/wiki/Paris", Page::Fail)
            .with("https://facts.example.com/france", Page::Fail)
            .with("https://capitals.example.org/europe", Page::Body("<p>short</p>".into()))
            .with("https://slow.example.net/paris", Page::Fail);
        let completion = Arc::new(FakeCompletion::new());
        let sink = Arc::new(MemorySink::new());
        let pipeline = Pipeline::new(
            &PipelineConfig::default(),
            Collaborators {
                completion: completion.clone(),
                search: Arc::new(france_search()),
                pages: Arc::new(pages),
                embedder: Arc::new(FakeEmbedder::new()),
                sink: sink.clone(),
            },
        )
        .unwrap();

        let summary = pipeline.run(QUERY, Arc::new(SilentObserver)).await.unwrap();
        assert!(summary.fragments.is_empty());
        assert!(!summary.answer.is_empty());

        let answer_prompt = completion
            .recorded()
            .into_iter()
            .find(|r| r.messages[0].content == crate::prompts::ANSWER_SYSTEM)
            .unwrap();
        assert!(answer_prompt.messages[1].content.ends_with("Top Results: []"));
    }

    #[tokio::test]
    async fn rephrase_failure_aborts_after_query_event() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = pipeline(
            FakeCompletion::new().rephrase(Reply::Empty),
            france_search(),
            france_pages(),
            sink.clone(),
        );

        let err = pipeline.run(QUERY, Arc::new(SilentObserver)).await.unwrap_err();
        assert!(matches!(err, RaglineError::Rephrase(_)));
        assert_eq!(kinds(&sink.events()), vec![EventKind::Query]);
    }

    #[tokio::test]
    async fn follow_up_failure_publishes_empty_list() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = pipeline(
            FakeCompletion::new().followup(Reply::Content("I cannot do that.".into())),
            FakeSearch::new(vec![]),
            FakePages::new(),
            sink.clone(),
        );

        let summary = pipeline.run(QUERY, Arc::new(SilentObserver)).await.unwrap();
        assert!(summary.follow_ups.is_empty());
        let last = sink.events().pop().unwrap();
        assert_eq!(last.payload, EventPayload::FollowUp(vec![]));
    }

    #[tokio::test]
    async fn sink_failures_do_not_fail_the_run() {
        let sink = Arc::new(FlakySink::failing_on(&[1, 2, 3, 4, 5, 6, 7, 8]));
        let pipeline = pipeline(FakeCompletion::new(), FakeSearch::new(vec![]), FakePages::new(), sink);

        let summary = pipeline.run(QUERY, Arc::new(SilentObserver)).await.unwrap();
        assert_eq!(summary.answer, "Paris is the capital.");
    }

    #[tokio::test]
    async fn query_is_published_as_submitted() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = pipeline(FakeCompletion::new(), FakeSearch::new(vec![]), FakePages::new(), sink.clone());

        let submitted = "  What is the capital of France?\n";
        let summary = pipeline.run(submitted, Arc::new(SilentObserver)).await.unwrap();

        assert_eq!(summary.query, submitted);
        assert_eq!(sink.events()[0].payload, EventPayload::Query(submitted.to_string()));
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = pipeline(FakeCompletion::new(), france_search(), france_pages(), sink.clone());

        let err = pipeline.run("   ", Arc::new(SilentObserver)).await.unwrap_err();
        assert!(matches!(err, RaglineError::Validation { .. }));
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn observer_sees_phases_and_sources() {
        let observer = Arc::new(RecordingObserver::default());
        let pages = FakePages::new().with(
            "https://en.wikipedia.org/wiki/Paris",
            Page::Body(article("Paris is the capital of France.")),
        );
        let search = FakeSearch::new(vec![hit("Paris", "https://en.wikipedia.org/wiki/Paris")]);
        let pipeline = pipeline(FakeCompletion::new(), search, pages, Arc::new(MemorySink::new()));

        pipeline.run(QUERY, observer.clone()).await.unwrap();

        assert_eq!(
            observer.phases(),
            vec![
                "Rephrasing query",
                "Searching the web",
                "Scanning sources",
                "Generating answer",
                "Generating follow-ups"
            ]
        );
        let sources = observer.sources();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].1);
        assert_eq!((sources[0].2, sources[0].3), (1, 1));
    }

    #[tokio::test]
    async fn submit_acknowledges_then_finishes_in_background() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = pipeline(FakeCompletion::new(), FakeSearch::new(vec![]), FakePages::new(), sink.clone());

        let submission = pipeline.submit(QUERY, Arc::new(SilentObserver)).await;
        assert!(submission.ack.is_success());
        assert_eq!(submission.ack.message, "Success");

        let summary = submission.handle.unwrap().await.unwrap();
        assert_eq!(summary.run_id, submission.run_id);
        assert_eq!(
            kinds(&sink.events()),
            vec![
                EventKind::Query,
                EventKind::Sources,
                EventKind::VectorCreation,
                EventKind::Gpt,
                EventKind::FollowUp
            ]
        );
    }

    #[tokio::test]
    async fn submit_reports_generic_failure() {
        let pipeline = pipeline(
            FakeCompletion::new().rephrase(Reply::Error),
            france_search(),
            france_pages(),
            Arc::new(MemorySink::new()),
        );

        let submission = pipeline.submit(QUERY, Arc::new(SilentObserver)).await;
        assert!(!submission.ack.is_success());
        assert_eq!(submission.ack.message, "Internal Server Error");
        assert!(submission.handle.is_none());

        let empty = pipeline.submit("", Arc::new(SilentObserver)).await;
        assert_eq!(empty.ack, Acknowledgment::failure());
    }

    #[test]
    fn acknowledgment_serializes_message_only() {
        let json = serde_json::to_string(&Acknowledgment::success()).unwrap();
        assert_eq!(json, r#"{"message":"Success"}"#);
    }

    #[test]
    fn rejects_invalid_config() {
        let collaborators = || Collaborators {
            completion: Arc::new(FakeCompletion::new()),
            search: Arc::new(FakeSearch::new(vec![])),
            pages: Arc::new(FakePages::new()),
            embedder: Arc::new(FakeEmbedder::new()),
            sink: Arc::new(MemorySink::new()),
        };

        let zero_chunk = PipelineConfig {
            chunk_size: 0,
            ..PipelineConfig::default()
        };
        assert!(Pipeline::new(&zero_chunk, collaborators()).is_err());

        let bad_metric = PipelineConfig {
            metric: "jaccard".into(),
            ..PipelineConfig::default()
        };
        assert!(Pipeline::new(&bad_metric, collaborators()).is_err());
    }
}
