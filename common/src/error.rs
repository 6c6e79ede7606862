use thiserror::Error;
use tokio::task::JoinError;

use crate::backends::Capability;

/// Crate-wide error type. Library functions always return this; the CLI is the only
/// place an `AppError` gets turned into a process exit code.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(#[from] JoinError),
    #[error("config error: {0}")]
    Config(String),
    #[error("no backend registered for capability {0:?}")]
    BackendUnavailable(Capability),
    #[error("remote call failed, retryable: {0}")]
    RemoteTransient(String),
    #[error("remote call failed: {0}")]
    RemoteFatal(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("partial ingest failure for {path}: {source}")]
    PartialIngest {
        path: String,
        #[source]
        source: Box<AppError>,
    },
    #[error("supersession chain broken at {chunk_id}")]
    BrokenChain { chunk_id: String },
    /// Not thrown; carried as a tag on `IngestResult`'s skip accounting and in `warn!`
    /// fields when a file is skipped for system pressure rather than failed.
    #[error("ingest skipped under system pressure")]
    PressureSkip,
    /// Not thrown; used only as a `tracing::warn!` field tag when an access-credit update
    /// fails, since a tracking-only write is never worth failing the caller's request over.
    #[error("access tracking failed for {chunk_id}: {reason}")]
    AccessTrackingFailure { chunk_id: String, reason: String },
    #[error("internal error: {0}")]
    Internal(String),
}
