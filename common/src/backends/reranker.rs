use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct RerankHit {
    pub index: usize,
    pub relevance_score: f32,
}

/// A capability that scores (query, document) pairs for relevance, used to refine the
/// top of a dense-search result set.
#[async_trait]
pub trait RerankerBackend: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankHit>, AppError>;
}

/// Bounds concurrent access to a set of reranker engine instances, the way the teacher's
/// `RerankerPool`/`RerankerLease` bound concurrent access to local `fastembed::TextRerank`
/// instances. Generalized here to any `RerankerBackend`, since a real deployment may back
/// this with either a local model or a rate-limited remote endpoint.
pub struct RerankerPool {
    engines: Vec<Arc<dyn RerankerBackend>>,
    semaphore: Arc<Semaphore>,
    next: AtomicUsize,
}

pub struct RerankerLease<'a> {
    _permit: SemaphorePermit<'a>,
    pub engine: Arc<dyn RerankerBackend>,
}

impl RerankerPool {
    pub fn new(engines: Vec<Arc<dyn RerankerBackend>>) -> Self {
        let permits = engines.len().max(1);
        Self {
            engines,
            semaphore: Arc::new(Semaphore::new(permits)),
            next: AtomicUsize::new(0),
        }
    }

    fn pick_engine_index(&self) -> usize {
        if self.engines.is_empty() {
            return 0;
        }
        self.next.fetch_add(1, Ordering::Relaxed) % self.engines.len()
    }

    pub async fn checkout(&self) -> Result<RerankerLease<'_>, AppError> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let engine = self.engines[self.pick_engine_index()].clone();
        Ok(RerankerLease {
            _permit: permit,
            engine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub;

    #[async_trait]
    impl RerankerBackend for Stub {
        async fn rerank(
            &self,
            _query: &str,
            documents: &[String],
            top_k: usize,
        ) -> Result<Vec<RerankHit>, AppError> {
            Ok(documents
                .iter()
                .enumerate()
                .take(top_k)
                .map(|(i, _)| RerankHit {
                    index: i,
                    relevance_score: 1.0 - i as f32 * 0.1,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn pool_round_robins_across_engines() {
        let pool = RerankerPool::new(vec![Arc::new(Stub), Arc::new(Stub)]);
        let first = pool.checkout().await.expect("checkout");
        let hits = first
            .engine
            .rerank("q", &["a".into(), "b".into()], 2)
            .await
            .expect("rerank");
        assert_eq!(hits.len(), 2);
    }
}
