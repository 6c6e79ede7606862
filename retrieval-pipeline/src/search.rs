//! Dense/hybrid search with filter assembly, optional reranking, and fire-and-forget
//! access-credit propagation along supersession chains, grounded in the
//! `{fts,scoring,reranking}.rs` query-building/scoring idiom of the teacher crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::backends::embedding::EmbeddingBackend;
use common::backends::reranker::RerankerBackend;
use common::backends::{with_timeout, DEFAULT_NETWORK_TIMEOUT};
use common::chunk::Chunk;
use common::error::AppError;
use common::events::{EventSink, NoopEventSink};
use common::store::filter::{Filter, FilterClause};
use common::store::ChunkStore;
use ingest_pipeline::qntm::QntmGenerator;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

use crate::scoring::reciprocal_rank_fusion;

const MAX_CHAIN_DEPTH: usize = 64;
const ACCESS_CREDIT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub since: Option<DateTime<Utc>>,
    pub qntm_key: Option<String>,
    pub consolidation_level: Option<u8>,
    pub content_type: Option<String>,
    pub agent_role: Option<String>,
    pub temperature: Option<String>,
    pub expand_query: bool,
    pub rerank: bool,
    pub hybrid: bool,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub text: String,
    pub file_path: String,
    pub chunk_index: u32,
    pub score: f32,
    pub created_at: DateTime<Utc>,
    pub qntm_key: Option<String>,
    pub rerank_score: Option<f32>,
}

/// Bounded fire-and-forget dispatcher for access-credit patches. A full queue drops the
/// batch with a `warn!` rather than applying back-pressure onto the search path, per the
/// REDESIGN FLAGS note that access tracking is always fire-and-forget.
struct AccessCreditDispatcher {
    sender: mpsc::Sender<HashMap<String, u32>>,
}

impl AccessCreditDispatcher {
    fn spawn(store: Arc<dyn ChunkStore>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<HashMap<String, u32>>(ACCESS_CREDIT_QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(credits) = receiver.recv().await {
                apply_access_credits(store.as_ref(), credits).await;
            }
        });
        Self { sender }
    }

    fn dispatch(&self, credits: HashMap<String, u32>) {
        if credits.is_empty() {
            return;
        }
        if self.sender.try_send(credits).is_err() {
            warn!("access-credit queue full or closed; dropping this batch");
        }
    }
}

pub struct SearchEngine {
    store: Arc<dyn ChunkStore>,
    embedding: Arc<dyn EmbeddingBackend>,
    reranker: Option<Arc<dyn RerankerBackend>>,
    qntm: Option<Arc<QntmGenerator>>,
    events: Arc<dyn EventSink>,
    access_credit: AccessCreditDispatcher,
    timeout: Duration,
}

impl SearchEngine {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedding: Arc<dyn EmbeddingBackend>,
        reranker: Option<Arc<dyn RerankerBackend>>,
        qntm: Option<Arc<QntmGenerator>>,
    ) -> Self {
        Self::with_events(store, embedding, reranker, qntm, Arc::new(NoopEventSink))
    }

    pub fn with_events(
        store: Arc<dyn ChunkStore>,
        embedding: Arc<dyn EmbeddingBackend>,
        reranker: Option<Arc<dyn RerankerBackend>>,
        qntm: Option<Arc<QntmGenerator>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let access_credit = AccessCreditDispatcher::spawn(Arc::clone(&store));
        Self {
            store,
            embedding,
            reranker,
            qntm,
            events,
            access_credit,
            timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }

    /// Overrides the per-call deadline applied to embedding, reranker and store calls,
    /// normally sourced from `AppConfig::network_timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>, AppError> {
        self.events.on_search_started(&request.query);

        let result = self.run_search(&request).await;

        match &result {
            Ok(results) => self.events.on_search_completed(&request.query, results.len()),
            Err(err) => self.events.on_search_error(&request.query, &err.to_string()),
        }

        result
    }

    async fn run_search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, AppError> {
        if request.hybrid {
            return self.hybrid_search(request).await;
        }

        let expansion_keys = self.expand_query_keys(request).await;
        let query_vector = self.embed_query(&request.query).await?;
        let filter = self.build_filter(request, &expansion_keys);

        let fetch_limit = if request.rerank { request.limit * 3 } else { request.limit };
        let hits = with_timeout(self.timeout, self.store.search(query_vector, &filter, fetch_limit)).await?;

        let (ids, results) = if request.rerank {
            self.rerank_hits(&request.query, hits, request.limit).await?
        } else {
            let truncated: Vec<(Chunk, f32)> = hits.into_iter().take(request.limit).collect();
            let ids = truncated.iter().map(|(chunk, _)| chunk.id.clone()).collect();
            let results = truncated
                .into_iter()
                .map(|(chunk, score)| to_search_result(chunk, score, None))
                .collect();
            (ids, results)
        };

        self.credit_access(&ids).await;

        Ok(results)
    }

    async fn hybrid_search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, AppError> {
        let expansion_keys = self.expand_query_keys(request).await;
        let query_vector = self.embed_query(&request.query).await?;
        let filter = self.build_filter(request, &expansion_keys);
        let fetch_limit = request.limit * 3;

        let dense = with_timeout(self.timeout, self.store.search(query_vector, &filter, fetch_limit)).await?;
        let fts = with_timeout(
            self.timeout,
            self.store.full_text_search(&request.query, &filter, fetch_limit),
        )
        .await?;

        let fused = reciprocal_rank_fusion(dense, fts, request.limit);
        let ids: Vec<String> = fused.iter().map(|(chunk, _)| chunk.id.clone()).collect();
        let results: Vec<SearchResult> = fused
            .into_iter()
            .map(|(chunk, score)| to_search_result(chunk, score, Some(score)))
            .collect();

        self.credit_access(&ids).await;

        Ok(results)
    }

    async fn expand_query_keys(&self, request: &SearchRequest) -> Vec<String> {
        if !request.expand_query {
            return Vec::new();
        }
        match &self.qntm {
            Some(qntm) => qntm.generate_query_qntm_keys(&request.query, &[]).await,
            None => Vec::new(),
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, AppError> {
        let batch = with_timeout(
            self.timeout,
            self.embedding.embed_text(std::slice::from_ref(&query.to_string())),
        )
        .await?;
        batch
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("embedding backend returned no vector for query".into()))
    }

    fn build_filter(&self, request: &SearchRequest, expansion_keys: &[String]) -> Filter {
        let mut filter = Filter::visible_heads();

        if let Some(since) = request.since {
            filter = filter.must(FilterClause::Range {
                key: "created_at".to_string(),
                gte: Some(json!(since)),
                lte: None,
            });
        }
        if let Some(key) = &request.qntm_key {
            filter = filter.must(FilterClause::MatchAny {
                key: "qntm_keys".to_string(),
                values: vec![json!(key)],
            });
        }
        if let Some(level) = request.consolidation_level {
            filter = filter.must(FilterClause::Match {
                key: "consolidation_level".to_string(),
                value: json!(level),
            });
        }
        if let Some(content_type) = &request.content_type {
            filter = filter.must(FilterClause::Match {
                key: "content_type".to_string(),
                value: json!(content_type),
            });
        }
        if let Some(agent_role) = &request.agent_role {
            filter = filter.must(FilterClause::Match {
                key: "agent_role".to_string(),
                value: json!(agent_role),
            });
        }
        if let Some(temperature) = &request.temperature {
            filter = filter.must(FilterClause::Match {
                key: "temperature".to_string(),
                value: json!(temperature),
            });
        }
        if !expansion_keys.is_empty() {
            let values = expansion_keys.iter().map(|k| json!(k)).collect();
            filter = filter.should(FilterClause::MatchAny {
                key: "qntm_keys".to_string(),
                values,
            });
        }

        filter
    }

    async fn rerank_hits(
        &self,
        query: &str,
        hits: Vec<(Chunk, f32)>,
        limit: usize,
    ) -> Result<(Vec<String>, Vec<SearchResult>), AppError> {
        let Some(reranker) = &self.reranker else {
            let truncated: Vec<(Chunk, f32)> = hits.into_iter().take(limit).collect();
            let ids = truncated.iter().map(|(chunk, _)| chunk.id.clone()).collect();
            let results = truncated
                .into_iter()
                .map(|(chunk, score)| to_search_result(chunk, score, None))
                .collect();
            return Ok((ids, results));
        };

        let documents: Vec<String> = hits.iter().map(|(chunk, _)| chunk.original_text.clone()).collect();
        let ranked = with_timeout(self.timeout, reranker.rerank(query, &documents, limit)).await?;

        let mut chunks: Vec<Option<Chunk>> = hits.into_iter().map(|(chunk, _)| Some(chunk)).collect();
        let mut ids = Vec::new();
        let mut results = Vec::new();
        for hit in ranked {
            if let Some(chunk) = chunks.get_mut(hit.index).and_then(Option::take) {
                ids.push(chunk.id.clone());
                results.push(to_search_result(chunk, hit.relevance_score, Some(hit.relevance_score)));
            }
        }

        Ok((ids, results))
    }

    /// Walks `superseded_by` from each retrieved id to its current head, aggregates
    /// per-head increments, and dispatches the patch onto the background queue. Never
    /// returns an error: broken chains are demoted to `warn!` per the REDESIGN FLAGS.
    async fn credit_access(&self, ids: &[String]) {
        let mut credits: HashMap<String, u32> = HashMap::new();
        for id in ids {
            let head = self.resolve_head(id).await;
            *credits.entry(head).or_insert(0) += 1;
        }
        self.access_credit.dispatch(credits);
    }

    async fn resolve_head(&self, start_id: &str) -> String {
        let mut visited = std::collections::HashSet::new();
        let mut current = start_id.to_string();

        for _ in 0..MAX_CHAIN_DEPTH {
            if !visited.insert(current.clone()) {
                warn!(chunk_id = %start_id, "supersession cycle detected; stopping at last good node");
                return current;
            }

            match with_timeout(self.timeout, self.store.retrieve(&current)).await {
                Ok(Some(chunk)) => match chunk.superseded_by {
                    Some(next) => current = next,
                    None => return current,
                },
                Ok(None) => {
                    warn!(chunk_id = %current, "supersession chain references missing chunk; stopping at last good node");
                    return current;
                }
                Err(err) => {
                    warn!(chunk_id = %current, error = %err, "failed to resolve supersession head; stopping at last good node");
                    return current;
                }
            }
        }

        warn!(chunk_id = %start_id, "supersession chain exceeded max depth; stopping at last good node");
        current
    }

    /// Scrolls chunks created since `since`, most recent implementation detail aside: all
    /// results carry `score = 1.0` since a timeline has no ranking signal.
    pub async fn timeline(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<SearchResult>, AppError> {
        let filter = Filter::visible_heads().must(FilterClause::Range {
            key: "created_at".to_string(),
            gte: Some(json!(since)),
            lte: None,
        });
        let chunks = with_timeout(self.timeout, self.store.scroll(&filter, limit)).await?;
        Ok(chunks.into_iter().map(|chunk| to_search_result(chunk, 1.0, None)).collect())
    }
}

async fn apply_access_credits(store: &dyn ChunkStore, credits: HashMap<String, u32>) {
    for (head_id, increment) in credits {
        let current = match store.retrieve(&head_id).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                let tag = AppError::AccessTrackingFailure {
                    chunk_id: head_id.clone(),
                    reason: "target vanished before patch".to_string(),
                };
                warn!(chunk_id = %head_id, error = %tag, "access-credit target vanished before patch");
                continue;
            }
            Err(err) => {
                let tag = AppError::AccessTrackingFailure {
                    chunk_id: head_id.clone(),
                    reason: err.to_string(),
                };
                warn!(chunk_id = %head_id, error = %tag, "failed to read chunk for access credit");
                continue;
            }
        };

        let new_count = current.access_count + u64::from(increment);
        let patch = json!({
            "access_count": new_count,
            "last_accessed_at": Utc::now(),
        });

        if let Err(err) = store.set_payload(&head_id, patch).await {
            let tag = AppError::AccessTrackingFailure {
                chunk_id: head_id.clone(),
                reason: err.to_string(),
            };
            warn!(chunk_id = %head_id, error = %tag, "failed to apply access credit");
        }
    }
}

fn to_search_result(chunk: Chunk, score: f32, rerank_score: Option<f32>) -> SearchResult {
    SearchResult {
        text: chunk.original_text,
        file_path: chunk.file_path,
        chunk_index: chunk.chunk_index,
        score,
        created_at: chunk.created_at,
        qntm_key: chunk.qntm_keys.into_iter().next(),
        rerank_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::backends::embedding::HashedEmbedder;
    use common::store::filter::Filter;
    use common::store::CollectionInfo;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::Mutex;

    struct FakeStore {
        chunks: Mutex<StdHashMap<String, Chunk>>,
    }

    impl FakeStore {
        fn new(chunks: Vec<Chunk>) -> Self {
            Self {
                chunks: Mutex::new(chunks.into_iter().map(|c| (c.id.clone(), c)).collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChunkStore for FakeStore {
        async fn create_collection(&self, _dimension: usize) -> Result<(), AppError> {
            Ok(())
        }
        async fn collection_exists(&self) -> Result<bool, AppError> {
            Ok(true)
        }
        async fn delete_collection(&self) -> Result<(), AppError> {
            Ok(())
        }
        async fn get_collection_info(&self) -> Result<CollectionInfo, AppError> {
            unimplemented!("not exercised by these tests")
        }
        async fn set_hnsw_enabled(&self, _enabled: bool) -> Result<(), AppError> {
            Ok(())
        }
        async fn upsert(&self, _points: Vec<common::store::ChunkPoint>) -> Result<(), AppError> {
            Ok(())
        }
        async fn retrieve(&self, id: &str) -> Result<Option<Chunk>, AppError> {
            Ok(self.chunks.lock().await.get(id).cloned())
        }
        async fn delete(&self, _ids: &[String]) -> Result<(), AppError> {
            Ok(())
        }
        async fn set_payload(&self, id: &str, patch: serde_json::Value) -> Result<(), AppError> {
            let mut chunks = self.chunks.lock().await;
            if let Some(chunk) = chunks.get_mut(id) {
                if let Some(count) = patch.get("access_count").and_then(|v| v.as_u64()) {
                    chunk.access_count = count;
                }
            }
            Ok(())
        }
        async fn search(
            &self,
            _vector: Vec<f32>,
            _filter: &Filter,
            _limit: usize,
        ) -> Result<Vec<(Chunk, f32)>, AppError> {
            Ok(Vec::new())
        }
        async fn full_text_search(
            &self,
            _query: &str,
            _filter: &Filter,
            _limit: usize,
        ) -> Result<Vec<(Chunk, f32)>, AppError> {
            Ok(Vec::new())
        }
        async fn scroll(&self, _filter: &Filter, _limit: usize) -> Result<Vec<Chunk>, AppError> {
            Ok(Vec::new())
        }
    }

    fn chunk(id: &str, superseded_by: Option<&str>) -> Chunk {
        let mut c = Chunk::new(id.to_string(), "text".into(), "p.md".into(), "p.md".into(), "md".into(), 0, 1);
        c.superseded_by = superseded_by.map(|s| s.to_string());
        c
    }

    fn engine(store: Arc<dyn ChunkStore>) -> SearchEngine {
        SearchEngine::new(store, Arc::new(HashedEmbedder::new(8)), None, None)
    }

    #[tokio::test]
    async fn resolve_head_walks_supersession_chain_to_current_head() {
        let store: Arc<dyn ChunkStore> = Arc::new(FakeStore::new(vec![
            chunk("a", Some("b")),
            chunk("b", Some("c")),
            chunk("c", None),
        ]));
        let engine = engine(Arc::clone(&store));
        assert_eq!(engine.resolve_head("a").await, "c");
    }

    #[tokio::test]
    async fn resolve_head_stops_at_last_good_node_on_cycle() {
        let store: Arc<dyn ChunkStore> = Arc::new(FakeStore::new(vec![
            chunk("a", Some("b")),
            chunk("b", Some("a")),
        ]));
        let engine = engine(Arc::clone(&store));
        let head = engine.resolve_head("a").await;
        assert!(head == "a" || head == "b");
    }

    #[tokio::test]
    async fn resolve_head_stops_at_last_good_node_on_missing_successor() {
        let store: Arc<dyn ChunkStore> = Arc::new(FakeStore::new(vec![chunk("a", Some("missing"))]));
        let engine = engine(Arc::clone(&store));
        assert_eq!(engine.resolve_head("a").await, "missing");
    }

    #[tokio::test]
    async fn credit_access_aggregates_multiple_ancestors_onto_one_head() {
        let store: Arc<dyn ChunkStore> = Arc::new(FakeStore::new(vec![
            chunk("a", Some("head")),
            chunk("b", Some("head")),
            chunk("head", None),
        ]));
        let engine = engine(Arc::clone(&store));
        engine.credit_access(&["a".to_string(), "b".to_string()]).await;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let head = store.retrieve("head").await.unwrap().unwrap();
        assert_eq!(head.access_count, 2);
    }
}
