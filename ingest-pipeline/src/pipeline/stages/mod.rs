use common::chunk::{Chunk, Importance};
use common::chunk_id::derive_chunk_id;
use common::error::AppError;
use common::store::ChunkPoint;
use state_machines::core::GuardError;
use tracing::{debug, instrument};

use super::context::{EmbeddedChunk, PipelineContext};
use super::state::{Embedded, IngestionMachine, Persisted, Ready, Split, Tagged};

#[instrument(level = "trace", skip_all, fields(relative_path = %ctx.relative_path))]
pub async fn split(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
    text: String,
) -> Result<IngestionMachine<(), Split>, AppError> {
    let safe_limit = crate::tokenize::TokenizerService::safe_limit(
        ctx.pipeline_config.tuning.embedding_context_window,
    );
    ctx.raw_text = Some(text);
    let raw_text = match ctx.raw_text() {
        Ok(text) => text,
        Err(err) => {
            let _ = machine.abort();
            return Err(err);
        }
    };
    let chunks = match ctx.services.split_into_chunks(raw_text, safe_limit).await {
        Ok(chunks) => chunks,
        Err(err) => {
            let _ = machine.abort();
            return Err(err);
        }
    };

    debug!(relative_path = %ctx.relative_path, chunk_count = chunks.len(), "file split into chunks");
    ctx.chunk_texts = chunks;

    machine.split().map_err(|(_, guard)| map_guard_error("split", &guard))
}

#[instrument(level = "trace", skip_all, fields(relative_path = %ctx.relative_path))]
pub async fn embed(
    machine: IngestionMachine<(), Split>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Embedded>, AppError> {
    let vectors = match ctx.services.embed_batch(&ctx.chunk_texts).await {
        Ok(vectors) => vectors,
        Err(err) => {
            let _ = machine.abort();
            return Err(err);
        }
    };
    ctx.embedded = ctx
        .chunk_texts
        .iter()
        .cloned()
        .zip(vectors)
        .map(|(text, vector)| EmbeddedChunk {
            chunk: Chunk::new(
                String::new(),
                text,
                ctx.relative_path.clone(),
                String::new(),
                String::new(),
                0,
                0,
            ),
            vector,
        })
        .collect();

    debug!(relative_path = %ctx.relative_path, embedded = ctx.embedded.len(), "chunks embedded");

    machine.embed().map_err(|(_, guard)| map_guard_error("embed", &guard))
}

#[instrument(level = "trace", skip_all, fields(relative_path = %ctx.relative_path))]
pub async fn tag(
    machine: IngestionMachine<(), Embedded>,
    ctx: &mut PipelineContext<'_>,
    file_name: &str,
    existing_keys_sample: &[String],
    level: u8,
) -> Result<IngestionMachine<(), Tagged>, AppError> {
    let texts: Vec<String> = ctx.embedded.iter().map(|e| e.chunk.original_text.clone()).collect();
    let keys = ctx
        .services
        .generate_keys_batch(&texts, existing_keys_sample, file_name, level)
        .await;

    for (embedded, keys) in ctx.embedded.iter_mut().zip(keys) {
        let empty = keys.is_empty();
        embedded.chunk.qntm_keys = keys;
        if empty {
            tracing::warn!(
                relative_path = %ctx.relative_path,
                chunk_id = %embedded.chunk.id,
                "chunk ingested with empty qntm_keys after retries exhausted"
            );
        }
    }

    machine.tag().map_err(|(_, guard)| map_guard_error("tag", &guard))
}

#[instrument(level = "trace", skip_all, fields(relative_path = %ctx.relative_path))]
pub async fn persist(
    machine: IngestionMachine<(), Tagged>,
    ctx: &mut PipelineContext<'_>,
    file_name: &str,
    file_type: &str,
) -> Result<(IngestionMachine<(), Persisted>, usize), AppError> {
    let total_chunks = ctx.embedded.len() as u32;
    let relative_path = ctx.relative_path.clone();

    let points: Vec<ChunkPoint> = ctx
        .embedded
        .drain(..)
        .enumerate()
        .map(|(index, embedded)| {
            let mut chunk = embedded.chunk;
            chunk.id = derive_chunk_id(&relative_path, index);
            chunk.file_path = relative_path.clone();
            chunk.file_name = file_name.to_string();
            chunk.file_type = file_type.to_string();
            chunk.chunk_index = index as u32;
            chunk.total_chunks = total_chunks;
            chunk.char_count = u32::try_from(chunk.original_text.chars().count()).unwrap_or(u32::MAX);
            chunk.importance = Importance::Normal;
            chunk.consolidated = false;
            ChunkPoint {
                chunk,
                vector: embedded.vector,
            }
        })
        .collect();

    let chunk_count = points.len();
    if let Err(err) = ctx.services.upsert(points).await {
        let _ = machine.abort();
        return Err(err);
    }

    debug!(relative_path = %ctx.relative_path, chunk_count, "chunks persisted");

    machine
        .persist()
        .map(|m| (m, chunk_count))
        .map_err(|(_, guard)| map_guard_error("persist", &guard))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::Internal(format!("invalid ingest pipeline transition during {event}: {guard:?}"))
}
