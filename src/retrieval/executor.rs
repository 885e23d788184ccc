//! Query execution against a captured snapshot

use super::{
    cosine_similarity, keyword_score, tokenize, ScoringConfig, SearchFilters, SearchMode,
    SearchRequest, SearchResponse, SearchResult,
};
use crate::embedding::EmbeddingGenerator;
use crate::error::{QuarryError, Result};
use crate::index::{IndexEntry, IndexSnapshot};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Stateless search over whichever snapshot it is handed
pub struct SearchExecutor {
    generator: Arc<EmbeddingGenerator>,
    scoring: ScoringConfig,
    default_max_results: usize,
    query_timeout: Duration,
}

/// Per-document scores before ranking
struct Scored<'a> {
    entry: &'a IndexEntry,
    score: f32,
    keyword: f32,
    vector: f32,
}

impl SearchExecutor {
    pub fn new(
        generator: Arc<EmbeddingGenerator>,
        scoring: ScoringConfig,
        default_max_results: usize,
        query_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            scoring,
            default_max_results: default_max_results.max(1),
            query_timeout,
        }
    }

    /// Run `request` against `snapshot`
    ///
    /// Provider trouble never fails the call: vector modes fall back to
    /// keyword scoring and the response is marked degraded.
    pub async fn execute(
        &self,
        snapshot: &IndexSnapshot,
        request: &SearchRequest,
    ) -> Result<SearchResponse> {
        let start = Instant::now();

        if request.query.trim().is_empty() {
            return Err(QuarryError::InvalidRequest(
                "Query text must not be empty".to_string(),
            ));
        }

        let limit = if request.max_results == 0 {
            self.default_max_results
        } else {
            request.max_results
        };

        let candidates: Vec<&IndexEntry> = snapshot
            .entries()
            .iter()
            .filter(|entry| matches_filters(entry, &request.content_categories, &request.filters))
            .collect();

        let query_terms = tokenize(&request.query);
        let mut mode_used = request.mode;
        let mut degraded = false;

        let query_vector = if request.mode.uses_vectors() {
            match self.query_embedding(&request.query, snapshot.dimension()).await {
                Some(vector) => Some(vector),
                None => {
                    degraded = true;
                    mode_used = SearchMode::Keyword;
                    None
                }
            }
        } else {
            None
        };

        let mut scored: Vec<Scored> = candidates
            .into_iter()
            .filter_map(|entry| {
                self.score(entry, mode_used, &query_terms, query_vector.as_deref())
            })
            .collect();

        scored.sort_by(rank);
        let total_results = scored.len();
        scored.truncate(limit);

        let results = scored.into_iter().map(to_result).collect();
        let execution_time_ms = start.elapsed().as_millis() as u64;

        debug!(
            "Search '{}' ({} -> {}): {} results in {}ms",
            request.query, request.mode, mode_used, total_results, execution_time_ms
        );

        Ok(SearchResponse {
            results,
            total_results,
            execution_time_ms,
            mode_used,
            degraded,
            generation: snapshot.generation(),
        })
    }

    /// Query embedding, or `None` when the provider cannot supply a usable one
    async fn query_embedding(&self, query: &str, dimension: Option<usize>) -> Option<Vec<f32>> {
        match self.generator.embed_query(query, self.query_timeout).await {
            Ok(vector) if dimension.is_some_and(|d| d != vector.len()) => {
                warn!(
                    "Query embedding has dimension {}, index has {:?}; degrading to keyword",
                    vector.len(),
                    dimension
                );
                None
            }
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!("Query embedding failed, degrading to keyword: {}", e);
                None
            }
        }
    }

    fn score<'a>(
        &self,
        entry: &'a IndexEntry,
        mode: SearchMode,
        query_terms: &[String],
        query_vector: Option<&[f32]>,
    ) -> Option<Scored<'a>> {
        let keyword = keyword_score(query_terms, &entry.terms);
        let keyword_hit = (keyword > 0.0).then_some(keyword);

        let vector_hit = match (query_vector, &entry.embedding) {
            (Some(query), Some(embedding)) => Some(cosine_similarity(query, embedding)),
            _ => None,
        };

        let (score, vector) = match mode {
            SearchMode::Keyword => (keyword_hit?, vector_hit.unwrap_or(0.0)),
            SearchMode::Vector => {
                let vector = vector_hit?;
                (vector, vector)
            }
            SearchMode::Semantic => {
                let vector = self.scoring.semantic(vector_hit?);
                (vector, vector)
            }
            SearchMode::Hybrid => (
                self.scoring.hybrid(keyword_hit, vector_hit)?,
                vector_hit.unwrap_or(0.0),
            ),
        };

        Some(Scored {
            entry,
            score,
            keyword,
            vector,
        })
    }
}

fn matches_filters(entry: &IndexEntry, categories: &[String], filters: &SearchFilters) -> bool {
    let doc = &entry.document;

    if !categories.is_empty() && !categories.iter().any(|c| *c == doc.content_category) {
        return false;
    }
    if !filters.file_kinds.is_empty() && !filters.file_kinds.iter().any(|k| *k == doc.file_kind) {
        return false;
    }
    if filters
        .modified_after
        .is_some_and(|after| doc.modified_at < after)
    {
        return false;
    }
    if filters
        .modified_before
        .is_some_and(|before| doc.modified_at > before)
    {
        return false;
    }
    true
}

/// Score desc, then most recently modified, then id
fn rank(a: &Scored, b: &Scored) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.entry.document.modified_at.cmp(&a.entry.document.modified_at))
        .then_with(|| a.entry.document.id.cmp(&b.entry.document.id))
}

fn to_result(scored: Scored) -> SearchResult {
    let doc = &scored.entry.document;
    SearchResult {
        document_id: doc.id.clone(),
        score: scored.score,
        keyword_score: scored.keyword,
        vector_score: scored.vector,
        title: doc.title.clone(),
        summary: doc.summary.clone(),
        content_category: doc.content_category.clone(),
        file_kind: doc.file_kind.clone(),
        source_locator: doc.source_locator.clone(),
        modified_at: doc.modified_at,
        key_phrases: doc.key_phrases.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Embedding};
    use crate::embedding::test_support::ScriptedProvider;
    use crate::embedding::{content_hash, GeneratorSettings};
    use crate::storage::LoadedCorpus;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    const DIM: usize = 32;

    fn corpus(provider: &ScriptedProvider, documents: Vec<Document>, embed: bool) -> IndexSnapshot {
        let embeddings = if embed {
            documents
                .iter()
                .map(|doc| Embedding {
                    document_id: doc.id.clone(),
                    content_hash: content_hash(&doc.body),
                    vector: provider.vector_for(&doc.body),
                })
                .collect()
        } else {
            Vec::new()
        };

        IndexSnapshot::build(LoadedCorpus {
            dimension: embed.then_some(DIM),
            documents,
            embeddings,
            generation: 1,
            dropped_embeddings: 0,
        })
    }

    fn sample_docs() -> Vec<Document> {
        vec![
            Document::new("a", "azure functions deployment guide"),
            Document::new("b", "cooking recipes for bread"),
        ]
    }

    fn executor(provider: Arc<ScriptedProvider>) -> SearchExecutor {
        let generator = Arc::new(EmbeddingGenerator::new(provider, GeneratorSettings::default()));
        SearchExecutor::new(
            generator,
            ScoringConfig::default(),
            10,
            Duration::from_millis(500),
        )
    }

    fn ids(response: &SearchResponse) -> Vec<&str> {
        response
            .results
            .iter()
            .map(|r| r.document_id.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_keyword_scenario() {
        let provider = Arc::new(ScriptedProvider::new(DIM));
        let snapshot = corpus(&provider, sample_docs(), true);
        let executor = executor(provider.clone());

        let response = executor
            .execute(&snapshot, &SearchRequest::new("azure functions", SearchMode::Keyword))
            .await
            .unwrap();
        assert_eq!(ids(&response), vec!["a"]);
        assert_eq!(response.total_results, 1);
        assert_eq!(response.results[0].score, 1.0);
        assert!(!response.degraded);

        let response = executor
            .execute(&snapshot, &SearchRequest::new("bread", SearchMode::Keyword))
            .await
            .unwrap();
        assert_eq!(ids(&response), vec!["b"]);

        // Keyword mode never calls the provider
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_keyword_results_share_a_term() {
        let provider = Arc::new(ScriptedProvider::new(DIM));
        let docs = vec![
            Document::new("a", "rust async runtime"),
            Document::new("b", "python data science"),
            Document::new("c", "async python web servers"),
            Document::new("d", "gardening tips"),
        ];
        let snapshot = corpus(&provider, docs, false);
        let executor = executor(provider);

        for query in ["async", "rust python", "web gardening", "nothing here"] {
            let response = executor
                .execute(&snapshot, &SearchRequest::new(query, SearchMode::Keyword))
                .await
                .unwrap();
            let query_terms = tokenize(query);
            for result in &response.results {
                let entry = snapshot.get(&result.document_id).unwrap();
                assert!(query_terms.iter().any(|t| entry.terms.contains(t)));
            }
        }
    }

    #[tokio::test]
    async fn test_vector_mode_ranks_by_similarity() {
        let provider = Arc::new(ScriptedProvider::new(DIM));
        let snapshot = corpus(&provider, sample_docs(), true);
        let executor = executor(provider);

        let response = executor
            .execute(
                &snapshot,
                &SearchRequest::new("azure functions deployment guide", SearchMode::Vector),
            )
            .await
            .unwrap();

        assert_eq!(response.mode_used, SearchMode::Vector);
        assert_eq!(response.total_results, 2);
        assert_eq!(response.results[0].document_id, "a");
        assert!((response.results[0].vector_score - 1.0).abs() < 1e-5);
        assert_eq!(response.results[0].keyword_score, 1.0);
    }

    #[tokio::test]
    async fn test_vector_mode_excludes_documents_without_embedding() {
        let provider = Arc::new(ScriptedProvider::new(DIM));
        let snapshot = corpus(&provider, sample_docs(), false);
        let executor = executor(provider);

        let response = executor
            .execute(&snapshot, &SearchRequest::new("azure", SearchMode::Vector))
            .await
            .unwrap();

        assert!(response.results.is_empty());
        assert!(!response.degraded);
    }

    #[tokio::test]
    async fn test_degrades_when_provider_unavailable() {
        let provider = Arc::new(ScriptedProvider::new(DIM));
        let snapshot = corpus(&provider, sample_docs(), true);
        provider.set_unavailable(true);
        let executor = executor(provider);

        for mode in [SearchMode::Vector, SearchMode::Hybrid, SearchMode::Semantic] {
            let response = executor
                .execute(&snapshot, &SearchRequest::new("azure functions", mode))
                .await
                .unwrap();
            assert!(response.degraded);
            assert_eq!(response.mode_used, SearchMode::Keyword);
            assert_eq!(ids(&response), vec!["a"]);
        }
    }

    #[tokio::test]
    async fn test_degrades_on_query_timeout() {
        let provider =
            Arc::new(ScriptedProvider::new(DIM).with_latency(Duration::from_secs(5)));
        let snapshot = corpus(&provider, sample_docs(), true);
        let executor = executor(provider);

        let response = executor
            .execute(&snapshot, &SearchRequest::new("bread", SearchMode::Hybrid))
            .await
            .unwrap();
        assert!(response.degraded);
        assert_eq!(ids(&response), vec!["b"]);
    }

    #[tokio::test]
    async fn test_degrades_on_dimension_mismatch() {
        let provider = Arc::new(ScriptedProvider::new(DIM));
        let snapshot = corpus(&provider, sample_docs(), true);
        let executor = executor(Arc::new(ScriptedProvider::new(DIM / 2)));

        let response = executor
            .execute(&snapshot, &SearchRequest::new("azure", SearchMode::Vector))
            .await
            .unwrap();
        assert!(response.degraded);
        assert_eq!(response.mode_used, SearchMode::Keyword);
    }

    #[tokio::test]
    async fn test_hybrid_bonus_for_agreement() {
        let provider = Arc::new(ScriptedProvider::new(DIM));
        let snapshot = corpus(&provider, sample_docs(), true);
        let executor = executor(provider);

        let response = executor
            .execute(&snapshot, &SearchRequest::new("azure functions", SearchMode::Hybrid))
            .await
            .unwrap();

        let top = &response.results[0];
        assert_eq!(top.document_id, "a");
        let expected = (0.6 * top.keyword_score + 0.4 * top.vector_score + 0.1).min(1.0);
        assert!((top.score - expected).abs() < 1e-6);
        assert!(top.score <= 1.0);
        assert!(top.score >= top.keyword_score.min(top.vector_score));

        // "b" only qualifies through its vector
        let other = response.results.iter().find(|r| r.document_id == "b").unwrap();
        assert_eq!(other.keyword_score, 0.0);
        assert_eq!(other.score, other.vector_score);
    }

    #[tokio::test]
    async fn test_semantic_boosts_vector_score() {
        let provider = Arc::new(ScriptedProvider::new(DIM));
        let snapshot = corpus(&provider, sample_docs(), true);
        let executor = executor(provider);

        let vector = executor
            .execute(&snapshot, &SearchRequest::new("azure guide", SearchMode::Vector))
            .await
            .unwrap();
        let semantic = executor
            .execute(&snapshot, &SearchRequest::new("azure guide", SearchMode::Semantic))
            .await
            .unwrap();

        let plain = vector.results[0].score;
        let boosted = semantic.results[0].score;
        assert!((boosted - (plain * 1.2).clamp(-1.0, 1.0)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_filters_apply_before_scoring() {
        let provider = Arc::new(ScriptedProvider::new(DIM));
        let old = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let docs = vec![
            Document::new("pdf", "quarterly report").with_file_kind("pdf"),
            Document::new("img", "quarterly report chart")
                .with_category("image")
                .with_file_kind("png"),
            Document::new("old", "quarterly report archive")
                .with_file_kind("pdf")
                .with_modified_at(old),
        ];
        let snapshot = corpus(&provider, docs, false);
        let executor = executor(provider);

        let request =
            SearchRequest::new("quarterly", SearchMode::Keyword).with_categories(["image"]);
        let response = executor.execute(&snapshot, &request).await.unwrap();
        assert_eq!(ids(&response), vec!["img"]);

        let request = SearchRequest::new("quarterly", SearchMode::Keyword)
            .with_file_kinds(["pdf"])
            .modified_between(Some(old + ChronoDuration::days(1)), None);
        let response = executor.execute(&snapshot, &request).await.unwrap();
        assert_eq!(ids(&response), vec!["pdf"]);
        assert_eq!(response.total_results, 1);
    }

    #[tokio::test]
    async fn test_ties_break_on_recency_then_id() {
        let provider = Arc::new(ScriptedProvider::new(DIM));
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let docs = vec![
            Document::new("c", "shared term").with_modified_at(t0),
            Document::new("b", "shared term").with_modified_at(t0),
            Document::new("a", "shared term").with_modified_at(t0 - ChronoDuration::days(1)),
        ];
        let snapshot = corpus(&provider, docs, false);
        let executor = executor(provider);

        let response = executor
            .execute(&snapshot, &SearchRequest::new("shared", SearchMode::Keyword))
            .await
            .unwrap();
        assert_eq!(ids(&response), vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_total_counts_before_truncation() {
        let provider = Arc::new(ScriptedProvider::new(DIM));
        let docs: Vec<Document> = (0..25)
            .map(|i| Document::new(format!("doc-{:02}", i), "common words here"))
            .collect();
        let snapshot = corpus(&provider, docs, false);
        let executor = executor(provider);

        let response = executor
            .execute(
                &snapshot,
                &SearchRequest::new("common", SearchMode::Keyword).with_max_results(5),
            )
            .await
            .unwrap();
        assert_eq!(response.results.len(), 5);
        assert_eq!(response.total_results, 25);

        // Zero selects the default
        let response = executor
            .execute(&snapshot, &SearchRequest::new("common", SearchMode::Keyword))
            .await
            .unwrap();
        assert_eq!(response.results.len(), 10);
    }

    #[tokio::test]
    async fn test_blank_query_rejected() {
        let provider = Arc::new(ScriptedProvider::new(DIM));
        let snapshot = corpus(&provider, sample_docs(), false);
        let executor = executor(provider);

        let result = executor
            .execute(&snapshot, &SearchRequest::new("   ", SearchMode::Keyword))
            .await;
        assert!(matches!(result, Err(QuarryError::InvalidRequest(_))));
    }
}
