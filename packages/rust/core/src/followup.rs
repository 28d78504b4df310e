//! Best-effort follow-up question generation.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use ragline_providers::{ChatRequest, CompletionService};

use crate::prompts::{followup_system, followup_user};

/// Questions kept from one reply.
pub const MAX_FOLLOW_UPS: usize = 4;

#[derive(Debug, Deserialize)]
struct FollowUpReply {
    follow_up: Vec<serde_json::Value>,
}

#[derive(Clone)]
pub struct FollowupGenerator {
    completion: Arc<dyn CompletionService>,
    model: String,
}

impl FollowupGenerator {
    pub fn new(completion: Arc<dyn CompletionService>, model: impl Into<String>) -> Self {
        Self {
            completion,
            model: model.into(),
        }
    }

    /// Ask for follow-up questions about `query`. Any failure yields an empty list.
    #[instrument(skip(self))]
    pub async fn generate(&self, query: &str) -> Vec<String> {
        let request = ChatRequest::new(&self.model, followup_system(query), followup_user(query));

        let content = match self.completion.complete(&request).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                debug!("follow-up model returned no content");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "follow-up generation failed");
                return Vec::new();
            }
        };

        let questions = parse_follow_ups(&content);
        debug!(count = questions.len(), "follow-ups parsed");
        questions
    }
}

/// Extract up to [`MAX_FOLLOW_UPS`] non-empty questions from a model reply.
///
/// Tolerates code fences and prose on either side of the JSON object: the
/// first `{` that starts a complete `{"follow_up": [...]}` value wins and
/// whatever follows it is ignored. Non-string entries are skipped.
pub fn parse_follow_ups(content: &str) -> Vec<String> {
    let reply = content.match_indices('{').find_map(|(start, _)| {
        serde_json::Deserializer::from_str(&content[start..])
            .into_iter::<FollowUpReply>()
            .next()?
            .ok()
    });

    let Some(reply) = reply else {
        debug!("no follow-up object in reply");
        return Vec::new();
    };

    reply
        .follow_up
        .into_iter()
        .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .take(MAX_FOLLOW_UPS)
        .collect()
}
