use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::backends::{Capability, EmbeddingRegistry, LlmRegistry, DEFAULT_NETWORK_TIMEOUT};
use common::error::AppError;
use common::store::ChunkStore;
use futures::future::join_all;

use crate::concurrency::AdaptiveExecutor;
use crate::qntm::QntmGenerator;
use crate::tokenize::TokenizerService;

/// Seam between the pipeline's stage functions and the actual I/O they perform, so tests
/// can substitute a fake for any of embedding/QNTM/storage.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn split_into_chunks(&self, text: &str, max_tokens: usize) -> Result<Vec<String>, AppError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;

    /// Generates QNTM keys for every chunk concurrently (bounded by the adaptive
    /// executor), each primed with the same `existing_keys_sample` fetched once before
    /// the batch starts.
    async fn generate_keys_batch(
        &self,
        texts: &[String],
        existing_keys_sample: &[String],
        file_name: &str,
        level: u8,
    ) -> Vec<Vec<String>>;

    async fn upsert(&self, points: Vec<common::store::ChunkPoint>) -> Result<(), AppError>;

    fn embedding_dimension(&self) -> Result<usize, AppError>;
}

pub struct DefaultPipelineServices {
    embeddings: Arc<EmbeddingRegistry>,
    qntm: Arc<QntmGenerator>,
    tokenizer: Arc<TokenizerService>,
    store: Arc<dyn ChunkStore>,
    executor: Arc<AdaptiveExecutor>,
    timeout: Duration,
}

impl DefaultPipelineServices {
    pub fn new(
        embeddings: Arc<EmbeddingRegistry>,
        llm: Arc<LlmRegistry>,
        tokenizer: Arc<TokenizerService>,
        store: Arc<dyn ChunkStore>,
        executor: Arc<AdaptiveExecutor>,
    ) -> Self {
        Self {
            embeddings,
            qntm: Arc::new(QntmGenerator::new(llm)),
            tokenizer,
            store,
            executor,
            timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }

    /// Overrides the per-call deadline applied to embedding and storage calls, normally
    /// sourced from `AppConfig::network_timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn split_into_chunks(&self, text: &str, max_tokens: usize) -> Result<Vec<String>, AppError> {
        self.tokenizer.split_into_documents(text, max_tokens)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let backend = self.embeddings.resolve(Capability::TextEmbedding)?;
        let batch =
            common::backends::with_timeout(self.timeout, backend.embed_text(texts)).await?;
        if batch.embeddings.len() != texts.len() {
            return Err(AppError::Internal(
                "embedding batch length mismatch".into(),
            ));
        }
        Ok(batch.embeddings)
    }

    async fn generate_keys_batch(
        &self,
        texts: &[String],
        existing_keys_sample: &[String],
        file_name: &str,
        level: u8,
    ) -> Vec<Vec<String>> {
        let total = texts.len();
        let tasks = texts.iter().enumerate().map(|(index, text)| {
            let qntm = Arc::clone(&self.qntm);
            let executor = Arc::clone(&self.executor);
            let text = text.clone();
            let existing = existing_keys_sample.to_vec();
            let file_name = file_name.to_string();
            async move {
                executor
                    .run(|| async move {
                        Ok(qntm
                            .generate_chunk_keys(&text, &existing, &file_name, index, total, level)
                            .await)
                    })
                    .await
                    .unwrap_or_default()
            }
        });
        join_all(tasks).await
    }

    async fn upsert(&self, points: Vec<common::store::ChunkPoint>) -> Result<(), AppError> {
        common::backends::with_timeout(self.timeout, self.store.upsert(points)).await
    }

    fn embedding_dimension(&self) -> Result<usize, AppError> {
        Ok(self.embeddings.resolve(Capability::TextEmbedding)?.dimension())
    }
}
