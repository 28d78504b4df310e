//! Brave web search client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use ragline_shared::{RaglineError, Result, SearchConfig, api_key};

use crate::{SearchHit, SearchProvider, USER_AGENT};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    web: Option<WebResults>,
}

#[derive(Debug, Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[derive(Debug, Deserialize)]
struct WebResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

/// Web search over the Brave Search API.
#[derive(Debug, Clone)]
pub struct BraveSearch {
    client: Client,
    api_key: String,
    endpoint: String,
    own_domain: String,
    count: u32,
}

impl BraveSearch {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        own_domain: impl Into<String>,
        count: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| RaglineError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            own_domain: own_domain.into(),
            count,
        })
    }

    /// Build from the `[search]` config section, reading the key from the environment.
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let key = api_key(&config.api_key_env, "Brave Search")?;
        Self::new(
            key,
            &config.endpoint,
            &config.provider_domain,
            config.result_count,
        )
    }
}

#[async_trait]
impl SearchProvider for BraveSearch {
    #[instrument(skip(self))]
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .get(&self.endpoint)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .query(&[("q", query), ("count", &self.count.to_string())])
            .send()
            .await
            .map_err(|e| RaglineError::Network(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RaglineError::Network(format!("search: HTTP {status}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| RaglineError::parse(format!("invalid search response: {e}")))?;

        let hits: Vec<SearchHit> = parsed
            .web
            .map(|web| web.results)
            .unwrap_or_default()
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                link: r.url,
                snippet: r.description,
            })
            .collect();

        debug!(hits = hits.len(), "search returned");
        Ok(hits)
    }

    fn own_domain(&self) -> &str {
        &self.own_domain
    }
}
