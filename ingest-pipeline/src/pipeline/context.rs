use std::path::PathBuf;

use common::chunk::Chunk;
use common::error::AppError;
use tracing::error;

use super::config::IngestionConfig;
use super::services::PipelineServices;

/// One sub-document carved out of the source file, before it is itself split into
/// token-bounded chunks.
pub struct SourceDocument {
    pub relative_path: String,
    pub file_name: String,
    pub file_type: String,
    pub text: String,
}

pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

pub struct PipelineContext<'a> {
    pub file_path: PathBuf,
    pub relative_path: String,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub raw_text: Option<String>,
    pub chunk_texts: Vec<String>,
    pub embedded: Vec<EmbeddedChunk>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        file_path: PathBuf,
        relative_path: String,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
    ) -> Self {
        Self {
            file_path,
            relative_path,
            pipeline_config,
            services,
            raw_text: None,
            chunk_texts: Vec::new(),
            embedded: Vec::new(),
        }
    }

    pub fn raw_text(&self) -> Result<&str, AppError> {
        self.raw_text
            .as_deref()
            .ok_or_else(|| AppError::Internal("raw text expected to be available".into()))
    }

    pub fn abort(&self, err: AppError) -> AppError {
        error!(relative_path = %self.relative_path, error = %err, "ingest pipeline aborted");
        err
    }
}
