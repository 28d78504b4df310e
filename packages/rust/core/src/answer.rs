//! Streamed answer generation with a single live, growing answer record.
//!
//! `Idle → Streaming → Complete`. Entering `Streaming` inserts an empty answer
//! record; each delta appends to the accumulator and replaces that record.
//! Any stream error moves straight to `Complete` keeping what arrived.
//!
//! A failed replace may leave the previous record in the sink. It is kept as
//! stale and deleted before the next insert, so a run never has two live
//! answer records.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use ragline_providers::{ChatRequest, CompletionService};
use ragline_shared::{EventId, EventPayload, FragmentSet};

use crate::events::EventPublisher;
use crate::prompts::{ANSWER_SYSTEM, answer_user};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerState {
    Idle,
    Streaming,
    Complete,
}

/// Final state of one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOutcome {
    /// Concatenation of every delta, in arrival order.
    pub text: String,
    /// Number of non-empty deltas applied.
    pub batches: usize,
    /// The live answer record, if the last write succeeded.
    pub record: Option<EventId>,
}

/// Accumulator plus the current record identifier for one answer.
struct AnswerRun<'a> {
    publisher: &'a EventPublisher,
    state: AnswerState,
    text: String,
    batches: usize,
    record: Option<EventId>,
    /// Record left behind by a failed replace, not yet deleted.
    stale: Option<EventId>,
    /// Set when the latest text has not reached the sink.
    dirty: bool,
}

impl<'a> AnswerRun<'a> {
    fn new(publisher: &'a EventPublisher) -> Self {
        Self {
            publisher,
            state: AnswerState::Idle,
            text: String::new(),
            batches: 0,
            record: None,
            stale: None,
            dirty: false,
        }
    }

    async fn begin(&mut self) {
        debug_assert_eq!(self.state, AnswerState::Idle);
        self.state = AnswerState::Streaming;
        self.record = self.publisher.publish(EventPayload::Gpt(String::new())).await;
    }

    async fn apply(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.text.push_str(delta);
        self.batches += 1;
        self.write().await;
    }

    async fn write(&mut self) {
        if let Some(stale) = self.stale.take() {
            if !self.publisher.retract(&stale).await {
                // Retried on the next write.
                self.stale = Some(stale);
                self.dirty = true;
                return;
            }
        }

        let previous = self.record.take();
        self.record = self
            .publisher
            .republish(previous.as_ref(), EventPayload::Gpt(self.text.clone()))
            .await;
        self.dirty = self.record.is_none();
        if self.dirty {
            self.stale = previous;
        }
    }

    /// One more attempt when the final text never landed.
    async fn settle(&mut self) {
        if self.dirty {
            self.write().await;
        }
    }

    fn finish(mut self) -> AnswerOutcome {
        debug!(from = ?self.state, batches = self.batches, "answer complete");
        self.state = AnswerState::Complete;
        AnswerOutcome {
            text: self.text,
            batches: self.batches,
            record: self.record,
        }
    }
}

#[derive(Clone)]
pub struct StreamingAnswerer {
    completion: Arc<dyn CompletionService>,
    model: String,
}

impl StreamingAnswerer {
    pub fn new(completion: Arc<dyn CompletionService>, model: impl Into<String>) -> Self {
        Self {
            completion,
            model: model.into(),
        }
    }

    /// Stream an answer for `query` grounded on `fragments`. Never fails.
    #[instrument(skip_all, fields(run_id = %publisher.run_id(), fragments = fragments.len()))]
    pub async fn answer(
        &self,
        query: &str,
        fragments: &FragmentSet,
        publisher: &EventPublisher,
    ) -> AnswerOutcome {
        let mut run = AnswerRun::new(publisher);
        let request = ChatRequest::new(&self.model, ANSWER_SYSTEM, answer_user(query, fragments));

        let mut stream = match self.completion.stream(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "answer stream could not be opened");
                return run.finish();
            }
        };

        run.begin().await;

        // One delta at a time: each replace finishes before the next is read.
        while let Some(item) = stream.recv().await {
            match item {
                Ok(delta) => run.apply(&delta).await,
                Err(e) => {
                    warn!(error = %e, batches = run.batches, "answer stream failed");
                    break;
                }
            }
        }

        run.settle().await;
        let outcome = run.finish();
        info!(chars = outcome.text.chars().count(), batches = outcome.batches, "answer streamed");
        outcome
    }
}
