//! Retrieval-augmented answer pipeline for Ragline.
//!
//! A run takes one query through rephrasing, web search, concurrent
//! per-source fetching and indexing, a streamed answer and follow-up
//! questions, publishing each stage's output to a [`MessageSink`] as soon as
//! it is ready.
//!
//! [`MessageSink`]: ragline_storage::MessageSink

pub mod answer;
pub mod events;
pub mod fetcher;
pub mod followup;
pub mod index;
pub mod pipeline;
pub mod prompts;
pub mod retrieval;

#[cfg(test)]
mod testing;

pub use answer::{AnswerOutcome, AnswerState, StreamingAnswerer};
pub use events::{EventPublisher, RunObserver, SilentObserver};
pub use fetcher::{AbsenceReason, FetchSettings, SourceFetcher, SourceOutcome};
pub use followup::{FollowupGenerator, parse_follow_ups};
pub use index::{EphemeralIndex, Metric};
pub use pipeline::{AckStatus, Acknowledgment, Collaborators, Pipeline, RunSummary, Submission};
pub use retrieval::{Retrieval, RetrievalCoordinator, normalize_candidates};
