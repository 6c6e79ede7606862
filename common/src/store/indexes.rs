use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::store::db::SurrealDbClient;

const INDEX_POLL_INTERVAL: Duration = Duration::from_millis(50);
const FTS_ANALYZER_NAME: &str = "atlas_fts_analyzer";
const HNSW_INDEX_NAME: &str = "idx_chunk_embedding_hnsw";
const FTS_INDEX_NAME: &str = "idx_chunk_original_text_fts";

/// Builds (or rebuilds, on a dimension change) the HNSW index over `chunk_embedding` and
/// the BM25 full-text index over `chunk.original_text`. Idempotent: safe to call on every
/// startup, the way `ensure_runtime_indexes` is called once the embedding provider's
/// dimension is known.
pub async fn ensure_runtime_indexes(db: &SurrealDbClient, dimension: usize) -> Result<(), AppError> {
    ensure_inner(db, dimension)
        .await
        .map_err(|err| AppError::Internal(err.to_string()))
}

async fn ensure_inner(db: &SurrealDbClient, dimension: usize) -> Result<()> {
    create_fts_analyzer(db).await?;

    if !index_exists(db, "chunk", FTS_INDEX_NAME).await? {
        let definition = format!(
            "DEFINE INDEX IF NOT EXISTS {FTS_INDEX_NAME} ON TABLE chunk FIELDS original_text \
             SEARCH ANALYZER {FTS_ANALYZER_NAME} BM25 CONCURRENTLY;"
        );
        create_index_with_polling(db, definition, FTS_INDEX_NAME, "chunk").await?;
    }

    match existing_hnsw_dimension(db).await? {
        None => {
            let definition = hnsw_definition("IF NOT EXISTS", dimension);
            create_index_with_polling(db, definition, HNSW_INDEX_NAME, "chunk_embedding").await?;
        }
        Some(existing) if existing == dimension => {}
        Some(existing) => {
            warn!(existing, target = dimension, "overwriting HNSW index for new embedding dimension");
            let definition = hnsw_definition("OVERWRITE", dimension);
            create_index_with_polling(db, definition, HNSW_INDEX_NAME, "chunk_embedding").await?;
        }
    }

    Ok(())
}

fn hnsw_definition(clause: &str, dimension: usize) -> String {
    format!(
        "DEFINE INDEX {clause} {HNSW_INDEX_NAME} ON TABLE chunk_embedding \
         FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE TYPE F32 EFC 100 M 8;"
    )
}

async fn create_fts_analyzer(db: &SurrealDbClient) -> Result<()> {
    let snowball = format!(
        "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME} TOKENIZERS class FILTERS lowercase, ascii, snowball(english);"
    );

    if let Ok(res) = db.client.query(snowball).await {
        if res.check().is_ok() {
            return Ok(());
        }
    }

    let fallback = format!(
        "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME} TOKENIZERS class FILTERS lowercase, ascii;"
    );
    db.client
        .query(fallback)
        .await
        .context("creating fallback FTS analyzer")?
        .check()
        .context("fallback FTS analyzer definition failed")?;

    Ok(())
}

async fn create_index_with_polling(
    db: &SurrealDbClient,
    definition: String,
    index_name: &str,
    table: &str,
) -> Result<()> {
    let mut attempts = 0;
    const MAX_ATTEMPTS: usize = 3;
    loop {
        attempts += 1;
        let res = db
            .client
            .query(definition.clone())
            .await
            .with_context(|| format!("creating index {index_name} on {table}"))?;
        match res.check() {
            Ok(_) => break,
            Err(err) => {
                let conflict = err.to_string().contains("read or write conflict");
                if conflict && attempts < MAX_ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                return Err(err).with_context(|| format!("index definition failed for {index_name}"));
            }
        }
    }

    poll_index_build_status(db, index_name, table).await
}

async fn poll_index_build_status(db: &SurrealDbClient, index_name: &str, table: &str) -> Result<()> {
    loop {
        tokio::time::sleep(INDEX_POLL_INTERVAL).await;

        let info_query = format!("INFO FOR INDEX {index_name} ON TABLE {table};");
        let mut info_res = db
            .client
            .query(info_query)
            .await
            .with_context(|| format!("checking index status for {index_name}"))?;
        let info: Option<Value> = info_res.take(0).context("deserializing INFO FOR INDEX")?;

        let Some(info) = info else {
            debug!(index = index_name, "index info missing, assuming ready");
            break;
        };

        let building = info.get("building");
        let status = building
            .and_then(|b| b.get("status"))
            .and_then(Value::as_str)
            .unwrap_or("ready")
            .to_string();

        if status.eq_ignore_ascii_case("ready") || status.eq_ignore_ascii_case("error") {
            break;
        }
    }
    Ok(())
}

async fn existing_hnsw_dimension(db: &SurrealDbClient) -> Result<Option<usize>> {
    let Some(indexes) = table_index_definitions(db, "chunk_embedding").await? else {
        return Ok(None);
    };
    let Some(definition) = indexes
        .get(HNSW_INDEX_NAME)
        .and_then(|d| d.get("Strand"))
        .and_then(Value::as_str)
    else {
        return Ok(None);
    };
    Ok(extract_dimension(definition))
}

fn extract_dimension(definition: &str) -> Option<usize> {
    definition
        .split("DIMENSION")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|token| token.trim_end_matches(';').parse::<usize>().ok())
}

async fn table_index_definitions(db: &SurrealDbClient, table: &str) -> Result<Option<Map<String, Value>>> {
    let info_query = format!("INFO FOR TABLE {table};");
    let mut response = db
        .client
        .query(info_query)
        .await
        .with_context(|| format!("fetching table info for {table}"))?;
    let info: surrealdb::Value = response.take(0).context("taking table info")?;
    let info_json: Value = serde_json::to_value(info).context("serializing table info")?;
    Ok(info_json
        .get("Object")
        .and_then(|o| o.get("indexes"))
        .and_then(|i| i.get("Object"))
        .and_then(Value::as_object)
        .cloned())
}

async fn index_exists(db: &SurrealDbClient, table: &str, index_name: &str) -> Result<bool> {
    let Some(indexes) = table_index_definitions(db, table).await? else {
        return Ok(false);
    };
    Ok(indexes.contains_key(index_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_dimension_parses_value() {
        let definition = "DEFINE INDEX idx_chunk_embedding_hnsw ON TABLE chunk_embedding FIELDS embedding HNSW DIMENSION 384 DIST COSINE TYPE F32 EFC 100 M 8;";
        assert_eq!(extract_dimension(definition), Some(384));
    }

    #[tokio::test]
    async fn ensure_runtime_indexes_is_idempotent() {
        let db = SurrealDbClient::memory("idx_ns", "idx_db").await.expect("memory db");
        ensure_runtime_indexes(&db, 8).await.expect("first ensure");
        ensure_runtime_indexes(&db, 8).await.expect("second ensure");
    }

    #[tokio::test]
    async fn ensure_runtime_indexes_overwrites_on_dimension_change() {
        let db = SurrealDbClient::memory("idx_ns2", "idx_db2").await.expect("memory db");
        ensure_runtime_indexes(&db, 8).await.expect("first ensure");
        ensure_runtime_indexes(&db, 16).await.expect("dimension change");
        let dim = existing_hnsw_dimension(&db).await.expect("read dimension");
        assert_eq!(dim, Some(16));
    }
}
