//! Throwaway per-source vector index.
//!
//! One [`EphemeralIndex`] holds the embedded fragments of a single page for
//! the duration of one source fetch and answers a top-1 nearest query.

use std::str::FromStr;

use tracing::{debug, instrument};
use url::Url;

use ragline_providers::Embedder;
use ragline_shared::{Fragment, RaglineError, Result};

/// Similarity measure between two embeddings. Higher scores are closer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Metric {
    #[default]
    Cosine,
    Dot,
    /// Negative euclidean distance.
    Euclidean,
}

impl Metric {
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => {
                let norm = dot(a, a).sqrt() * dot(b, b).sqrt();
                if norm == 0.0 { 0.0 } else { dot(a, b) / norm }
            }
            Self::Dot => dot(a, b),
            Self::Euclidean => {
                let sq: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                -sq.sqrt()
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Dot => "dot",
            Self::Euclidean => "euclidean",
        }
    }
}

impl FromStr for Metric {
    type Err = RaglineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" | "dot_product" => Ok(Self::Dot),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            other => Err(RaglineError::config(format!(
                "unknown similarity metric '{other}' (expected cosine, dot or euclidean)"
            ))),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Embedded fragments of one source.
#[derive(Debug)]
pub struct EphemeralIndex {
    source_link: Url,
    texts: Vec<String>,
    vectors: Vec<Vec<f32>>,
    metric: Metric,
}

impl EphemeralIndex {
    /// Embed `texts` in one batch and hold them in memory.
    #[instrument(skip(embedder, texts), fields(source = %source_link, fragments = texts.len()))]
    pub async fn build(
        embedder: &dyn Embedder,
        source_link: Url,
        texts: Vec<String>,
        metric: Metric,
    ) -> Result<Self> {
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(RaglineError::Generation(format!(
                "embedder returned {} vectors for {} fragments",
                vectors.len(),
                texts.len()
            )));
        }

        Ok(Self {
            source_link,
            texts,
            vectors,
            metric,
        })
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// The single fragment most similar to `query`, or `None` when empty.
    ///
    /// Ties go to the earliest fragment.
    pub async fn nearest(&self, embedder: &dyn Embedder, query: &str) -> Result<Option<Fragment>> {
        if self.is_empty() {
            return Ok(None);
        }

        let query_vec = embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RaglineError::Generation("embedder returned no query vector".into()))?;

        Ok(self.nearest_to(&query_vec))
    }

    fn nearest_to(&self, query_vec: &[f32]) -> Option<Fragment> {
        let mut best: Option<(usize, f32)> = None;
        for (i, vector) in self.vectors.iter().enumerate() {
            let score = self.metric.score(vector, query_vec);
            if score.is_nan() {
                continue;
            }
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((i, score)),
            }
        }

        let (i, score) = best?;
        debug!(index = i, score, metric = self.metric.as_str(), "nearest fragment");
        Some(Fragment {
            text: self.texts[i].clone(),
            source_link: self.source_link.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEmbedder, link};

    #[test]
    fn metric_parsing() {
        assert_eq!("cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert_eq!("DOT".parse::<Metric>().unwrap(), Metric::Dot);
        assert_eq!("l2".parse::<Metric>().unwrap(), Metric::Euclidean);
        assert!("manhattan".parse::<Metric>().is_err());
    }

    #[test]
    fn metric_scores() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert_eq!(Metric::Cosine.score(&a, &a), 1.0);
        assert_eq!(Metric::Cosine.score(&a, &b), 0.0);
        assert_eq!(Metric::Cosine.score(&a, &[0.0, 0.0]), 0.0);
        assert_eq!(Metric::Dot.score(&[2.0, 3.0], &[4.0, 5.0]), 23.0);
        assert_eq!(Metric::Euclidean.score(&[0.0, 0.0], &[3.0, 4.0]), -5.0);
    }

    #[tokio::test]
    async fn nearest_picks_most_similar_fragment() {
        let embedder = FakeEmbedder::new();
        let index = EphemeralIndex::build(
            &embedder,
            link("https://example.com/paris"),
            vec![
                "The Eiffel Tower opened in 1889.".into(),
                "Paris is the capital of France.".into(),
                "Croissants are popular pastries.".into(),
            ],
            Metric::Cosine,
        )
        .await
        .unwrap();

        let best = index
            .nearest(&embedder, "What is the capital of France?")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.text, "Paris is the capital of France.");
        assert_eq!(best.source_link, link("https://example.com/paris"));
    }

    #[tokio::test]
    async fn ties_resolve_to_earliest() {
        let embedder = FakeEmbedder::new();
        let index = EphemeralIndex::build(
            &embedder,
            link("https://example.com/"),
            vec!["same words".into(), "same words".into()],
            Metric::Dot,
        )
        .await
        .unwrap();

        let vectors = embedder.embed(&["same words".to_string()]).await.unwrap();
        let best = index.nearest_to(&vectors[0]).unwrap();
        assert_eq!(best.text, "same words");

        // Identical scores: the first fragment wins.
        let idx = EphemeralIndex {
            source_link: link("https://example.com/"),
            texts: vec!["first".into(), "second".into()],
            vectors: vec![vec![1.0, 0.0], vec![1.0, 0.0]],
            metric: Metric::Cosine,
        };
        assert_eq!(idx.nearest_to(&[1.0, 0.0]).unwrap().text, "first");
    }

    #[tokio::test]
    async fn empty_index_returns_none() {
        let embedder = FakeEmbedder::new();
        let index = EphemeralIndex::build(&embedder, link("https://example.com/"), vec![], Metric::Cosine)
            .await
            .unwrap();
        assert!(index.is_empty());
        assert!(index.nearest(&embedder, "anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn embedding_count_mismatch_is_an_error() {
        let embedder = FakeEmbedder::new().dropping_last_vector();
        let result = EphemeralIndex::build(
            &embedder,
            link("https://example.com/"),
            vec!["a".into(), "b".into()],
            Metric::Cosine,
        )
        .await;
        assert!(result.is_err());
    }
}
