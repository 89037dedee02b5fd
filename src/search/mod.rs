pub mod matcher;
pub mod query;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use crate::errors::SearchError;

pub use matcher::{MatchResult, Matcher, MatcherConfig, NoMatchReason};
pub use query::SearchQuery;

/// Which kind of service produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    YouTube,
    YouTubeMusic,
    Piped,
    SoundCloud,
}

impl Provider {
    /// Higher is more trusted. Music services beat generic video hosts.
    pub fn trust_rank(&self) -> u8 {
        match self {
            Provider::YouTubeMusic => 3,
            Provider::SoundCloud => 2,
            Provider::YouTube => 1,
            Provider::Piped => 1,
        }
    }

    pub const MAX_TRUST_RANK: u8 = 3;
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::YouTube => "youtube",
            Provider::YouTubeMusic => "youtube-music",
            Provider::Piped => "piped",
            Provider::SoundCloud => "soundcloud",
        };
        f.write_str(name)
    }
}

/// A single search hit that may or may not be the track we want.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub uploader: String,
    pub duration: Option<u64>, // seconds
    pub source_ref: String,
    pub provider: Provider,
}

impl Candidate {
    pub fn new(
        title: impl Into<String>,
        uploader: impl Into<String>,
        duration: Option<u64>,
        source_ref: impl Into<String>,
        provider: Provider,
    ) -> Self {
        Self {
            title: title.into(),
            uploader: uploader.into(),
            duration,
            source_ref: source_ref.into(),
            provider,
        }
    }
}

#[async_trait::async_trait]
pub trait CandidateSource {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Candidate>, SearchError>;
    fn get_name(&self) -> &str;
}

/// Fans a query out to every configured source and merges the answers.
#[derive(Clone, Default)]
pub struct SearchManager {
    sources: Vec<Arc<dyn CandidateSource + Send + Sync>>,
}

impl SearchManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, source: Arc<dyn CandidateSource + Send + Sync>) {
        self.sources.push(source);
    }

    pub fn with_source(mut self, source: Arc<dyn CandidateSource + Send + Sync>) -> Self {
        self.add_source(source);
        self
    }

    pub fn get_available_sources(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.get_name().to_string()).collect()
    }

    /// Queries all sources concurrently and concatenates results in source order.
    ///
    /// Individual source failures are tolerated while anything else returns
    /// candidates. With no candidates at all, a transient failure wins over a
    /// permanent one so the task stays retryable.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Candidate>, SearchError> {
        let results = futures::future::join_all(
            self.sources.iter().map(|source| source.search(query)),
        )
        .await;

        let mut candidates = Vec::new();
        let mut transient = None;
        let mut permanent = None;

        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(found) => {
                    log::debug!(
                        "[SEARCH] {} returned {} candidates for '{}'",
                        source.get_name(),
                        found.len(),
                        query.text
                    );
                    candidates.extend(found);
                }
                Err(e) => {
                    log::warn!("[SEARCH] {} failed for '{}': {}", source.get_name(), query.text, e);
                    if matches!(e, SearchError::Transient(_)) {
                        transient.get_or_insert(e);
                    } else {
                        permanent.get_or_insert(e);
                    }
                }
            }
        }

        if candidates.is_empty() {
            if let Some(e) = transient.or(permanent) {
                return Err(e);
            }
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Track;

    struct FixedSource {
        name: &'static str,
        result: Result<Vec<Candidate>, SearchError>,
    }

    #[async_trait::async_trait]
    impl CandidateSource for FixedSource {
        async fn search(&self, _query: &SearchQuery) -> Result<Vec<Candidate>, SearchError> {
            self.result.clone()
        }

        fn get_name(&self) -> &str {
            self.name
        }
    }

    fn query() -> SearchQuery {
        let track = Track::new("t1", "Song A", vec!["Artist X".to_string()]);
        SearchQuery::from_track(&track).unwrap()
    }

    fn candidate(title: &str, provider: Provider) -> Candidate {
        Candidate::new(title, "Artist X", Some(200), format!("ref:{title}"), provider)
    }

    #[tokio::test]
    async fn merges_sources_in_configuration_order() {
        let manager = SearchManager::new()
            .with_source(Arc::new(FixedSource {
                name: "ytm",
                result: Ok(vec![candidate("first", Provider::YouTubeMusic)]),
            }))
            .with_source(Arc::new(FixedSource {
                name: "yt",
                result: Ok(vec![
                    candidate("second", Provider::YouTube),
                    candidate("third", Provider::YouTube),
                ]),
            }));

        let titles: Vec<String> = manager
            .search(&query())
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
        assert_eq!(manager.get_available_sources(), vec!["ytm", "yt"]);
    }

    #[tokio::test]
    async fn failing_source_is_ignored_when_others_answer() {
        let manager = SearchManager::new()
            .with_source(Arc::new(FixedSource {
                name: "broken",
                result: Err(SearchError::Transient("timeout".into())),
            }))
            .with_source(Arc::new(FixedSource {
                name: "yt",
                result: Ok(vec![candidate("only", Provider::YouTube)]),
            }));

        assert_eq!(manager.search(&query()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transient_failure_wins_when_nothing_found() {
        let manager = SearchManager::new()
            .with_source(Arc::new(FixedSource {
                name: "strict",
                result: Err(SearchError::Permanent("unsupported".into())),
            }))
            .with_source(Arc::new(FixedSource {
                name: "flaky",
                result: Err(SearchError::Transient("503".into())),
            }));

        assert_eq!(
            manager.search(&query()).await,
            Err(SearchError::Transient("503".into()))
        );
    }

    #[tokio::test]
    async fn empty_results_are_not_an_error() {
        let manager = SearchManager::new().with_source(Arc::new(FixedSource {
            name: "yt",
            result: Ok(vec![]),
        }));

        assert_eq!(manager.search(&query()).await, Ok(vec![]));
    }
}
