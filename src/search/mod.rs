// Search module
// Vector similarity search over current embeddings with a substring fallback


use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::database::sqlite::{RecipeVersion, TextMatch};
use crate::embeddings::EmbeddingStore;
use crate::enrichment::EnrichmentPipeline;
use crate::versions::VersionStore;
use crate::{RecipeError, Result};

/// Similarity assigned to every text-path hit. Not comparable to vector scores.
pub const TEXT_MATCH_SIMILARITY: f32 = 0.5;

/// Extra candidates fetched from the vector store to survive stale and project filtering.
const VECTOR_OVERFETCH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Vector,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub recipe_id: i64,
    pub short_id: String,
    pub title: String,
    pub version_id: i64,
    pub version_number: i64,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub projects: Vec<String>,
    pub similarity: f32,
    pub source: MatchSource,
}

impl SearchHit {
    fn from_version(
        short_id: String,
        version: RecipeVersion,
        similarity: f32,
        source: MatchSource,
    ) -> Self {
        Self {
            recipe_id: version.recipe_id,
            short_id,
            title: version.title,
            version_id: version.id,
            version_number: version.version_number,
            summary: version.ai_summary,
            tags: version.tags,
            projects: version.projects,
            similarity,
            source,
        }
    }
}

impl From<TextMatch> for SearchHit {
    #[inline]
    fn from(text_match: TextMatch) -> Self {
        Self::from_version(
            text_match.short_id,
            text_match.version,
            TEXT_MATCH_SIMILARITY,
            MatchSource::Text,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSettings {
    pub default_limit: usize,
    pub similarity_threshold: f32,
    /// Bound on embedding the query plus the vector lookup.
    pub query_timeout: Duration,
}

impl Default for SearchSettings {
    #[inline]
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

impl From<&SearchConfig> for SearchSettings {
    #[inline]
    fn from(config: &SearchConfig) -> Self {
        Self {
            default_limit: config.default_limit,
            similarity_threshold: config.similarity_threshold,
            query_timeout: config.query_timeout(),
        }
    }
}

/// Hybrid recipe search. Reads only; safe to share across tasks.
pub struct SearchService {
    versions: Arc<VersionStore>,
    embeddings: Arc<dyn EmbeddingStore>,
    pipeline: Arc<dyn EnrichmentPipeline>,
    settings: SearchSettings,
}

impl SearchService {
    #[inline]
    pub fn new(
        versions: Arc<VersionStore>,
        embeddings: Arc<dyn EmbeddingStore>,
        pipeline: Arc<dyn EnrichmentPipeline>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            versions,
            embeddings,
            pipeline,
            settings,
        }
    }

    #[inline]
    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Embed the query and return current versions at or above `threshold`.
    #[inline]
    pub async fn vector_search(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        self.vector_search_in(query, limit, threshold, None).await
    }

    #[inline]
    pub async fn vector_search_in(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
        project: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let lookup = async {
            let query_vector = self.pipeline.embed(query).await?;
            self.embeddings
                .similarity_search(
                    &query_vector,
                    limit.saturating_mul(VECTOR_OVERFETCH),
                    threshold,
                )
                .await
        };
        let candidates = tokio::time::timeout(self.settings.query_timeout, lookup)
            .await
            .map_err(|_| {
                RecipeError::Processing(format!(
                    "vector search timed out after {:?}",
                    self.settings.query_timeout
                ))
            })??;

        let mut hits = Vec::with_capacity(limit.min(candidates.len()));
        for candidate in candidates {
            if hits.len() >= limit {
                break;
            }

            let details = match self.versions.read(candidate.recipe_id).await {
                Ok(details) => details,
                Err(RecipeError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let Some(current) = details.current else {
                continue;
            };
            if current.id != candidate.version_id {
                debug!(
                    "Dropping stale vector hit for version {} of {}",
                    candidate.version_id, details.recipe.short_id
                );
                continue;
            }
            if project.is_some_and(|name| !current.in_project(name)) {
                continue;
            }

            hits.push(SearchHit::from_version(
                details.recipe.short_id,
                current,
                candidate.similarity,
                MatchSource::Vector,
            ));
        }

        Ok(hits)
    }

    /// Case-insensitive substring search over current versions. Title matches rank first.
    #[inline]
    pub async fn text_search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.text_search_in(query, limit, None).await
    }

    #[inline]
    pub async fn text_search_in(
        &self,
        query: &str,
        limit: usize,
        project: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let matches = self.versions.text_search(query, limit, project).await?;
        Ok(matches.into_iter().map(SearchHit::from).collect())
    }

    #[inline]
    pub async fn hybrid_search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.hybrid_search_in(query, limit, None).await
    }

    /// Vector search first; on error or zero hits, the text search result.
    ///
    /// Vector-path failures are logged and never returned.
    #[inline]
    pub async fn hybrid_search_in(
        &self,
        query: &str,
        limit: usize,
        project: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        match self
            .vector_search_in(query, limit, self.settings.similarity_threshold, project)
            .await
        {
            Ok(hits) if !hits.is_empty() => {
                debug!("Vector search returned {} hits for '{}'", hits.len(), query);
                return Ok(hits);
            }
            Ok(_) => debug!("No vector hits for '{}', using text search", query),
            Err(e) => warn!("Vector search failed, falling back to text search: {}", e),
        }

        self.text_search_in(query, limit, project).await
    }
}
