//! Capability-indexed backend registries.
//!
//! Backends (embedding models, JSON-completion LLMs, rerankers) are resolved by a typed
//! `Capability` rather than a string key, so a missing wiring is a compile-time-checked
//! enum variant instead of a typo waiting to happen at runtime.

pub mod embedding;
pub mod llm;
pub mod reranker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use embedding::EmbeddingBackend;
use llm::JsonLlmBackend;
use reranker::RerankerBackend;

/// Default deadline for a network-bound call when a caller hasn't wired one in from
/// `AppConfig` (e.g. a reference backend under test).
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

/// Wraps `op` in a `tokio::time::timeout`, mapping an elapsed deadline onto
/// `AppError::RemoteTransient` so it composes with `retry_with_backoff`.
pub async fn with_timeout<F, T>(duration: Duration, op: F) -> Result<T, AppError>
where
    F: std::future::Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(duration, op).await {
        Ok(result) => result,
        Err(_) => Err(AppError::RemoteTransient(format!(
            "call timed out after {duration:?}"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextEmbedding,
    CodeEmbedding,
    ContextualizedEmbedding,
    TextCompletion,
    JsonCompletion,
    QntmGeneration,
    TextReranking,
}

/// Built once at startup, read-only for the process lifetime.
#[derive(Clone, Default)]
pub struct EmbeddingRegistry(HashMap<Capability, Arc<dyn EmbeddingBackend>>);

impl EmbeddingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: Capability, backend: Arc<dyn EmbeddingBackend>) {
        self.0.insert(capability, backend);
    }

    pub fn resolve(&self, capability: Capability) -> Result<Arc<dyn EmbeddingBackend>, AppError> {
        self.0
            .get(&capability)
            .cloned()
            .ok_or(AppError::BackendUnavailable(capability))
    }
}

#[derive(Clone, Default)]
pub struct LlmRegistry(HashMap<Capability, Arc<dyn JsonLlmBackend>>);

impl LlmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: Capability, backend: Arc<dyn JsonLlmBackend>) {
        self.0.insert(capability, backend);
    }

    /// Resolves `capability`, falling back to `Capability::JsonCompletion` when no
    /// dedicated backend is registered for it (QNTM generation rides on the generic
    /// JSON-completion backend unless a deployment wires something more specific).
    pub fn resolve(&self, capability: Capability) -> Result<Arc<dyn JsonLlmBackend>, AppError> {
        if let Some(backend) = self.0.get(&capability) {
            return Ok(backend.clone());
        }
        self.0
            .get(&Capability::JsonCompletion)
            .cloned()
            .ok_or(AppError::BackendUnavailable(capability))
    }
}

#[derive(Clone, Default)]
pub struct RerankerRegistry(Option<Arc<dyn RerankerBackend>>);

impl RerankerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, backend: Arc<dyn RerankerBackend>) {
        self.0 = Some(backend);
    }

    pub fn get(&self) -> Option<Arc<dyn RerankerBackend>> {
        self.0.clone()
    }
}

/// Exponential backoff retry shared by every remote-backend call. Mirrors the
/// `ExponentialBackoff::from_millis(...).map(jitter).take(n)` + `Retry::spawn` idiom used
/// throughout the storage layer's re-embedding paths, generalized to any fallible future.
pub async fn retry_with_backoff<F, Fut, T>(attempts: usize, op: F) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, AppError>>,
{
    use tokio_retry::strategy::{jitter, ExponentialBackoff};
    use tokio_retry::RetryIf;

    let strategy = ExponentialBackoff::from_millis(1000).map(jitter).take(attempts);

    RetryIf::spawn(
        strategy,
        op,
        |err: &AppError| matches!(err, AppError::RemoteTransient(_)),
    )
    .await
    .map_err(|err| match err {
        AppError::RemoteTransient(msg) => AppError::RemoteFatal(msg),
        other => other,
    })
}
