use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use surrealdb::RecordId;

use crate::backends::{with_timeout, DEFAULT_NETWORK_TIMEOUT};
use crate::chunk::Chunk;
use crate::error::AppError;
use crate::store::db::SurrealDbClient;
use crate::store::filter::{Filter, FilterClause};
use crate::store::indexes::ensure_runtime_indexes;
use crate::store::{ChunkPoint, ChunkStore, CollectionInfo, StoredObject};
use crate::stored_object;

stored_object!(ChunkEmbedding, "chunk_embedding", {
    chunk_id: RecordId,
    embedding: Vec<f32>,
});

impl ChunkEmbedding {
    fn new(chunk_id: &str, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            chunk_id: RecordId::from_table_key("chunk", chunk_id),
            embedding,
        }
    }
}

/// Reference `ChunkStore` implementation backed by SurrealDB, grounded in the same
/// two-table (entity + embedding) layout, transactional dual write, KNN/BM25 query
/// idioms the storage layer uses elsewhere in this crate.
pub struct SurrealChunkStore {
    db: SurrealDbClient,
    /// Dimension the HNSW index was created with; `0` means `create_collection` hasn't
    /// run yet, in which case `upsert` skips the dimension check.
    dimension: AtomicUsize,
    timeout: Duration,
}

impl SurrealChunkStore {
    pub fn new(db: SurrealDbClient) -> Self {
        Self {
            db,
            dimension: AtomicUsize::new(0),
            timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }

    /// Overrides the per-call deadline, normally sourced from `AppConfig::network_timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn db(&self) -> &SurrealDbClient {
        &self.db
    }
}

/// Compiles a `Filter` into a SurrealQL `WHERE` fragment plus its bound parameters.
/// Values are always bound, never interpolated, so filter values can never be used for
/// SurrealQL injection; only our own fixed field names are spliced into the clause text.
fn compile_filter(filter: &Filter, param_offset: &mut usize, binds: &mut Vec<(String, surrealdb::sql::Value)>) -> String {
    let mut parts = Vec::new();

    for clause in &filter.must {
        parts.push(compile_clause(clause, param_offset, binds));
    }
    for clause in &filter.must_not {
        parts.push(format!("NOT ({})", compile_clause(clause, param_offset, binds)));
    }
    if !filter.should.is_empty() {
        let should_parts: Vec<String> = filter
            .should
            .iter()
            .map(|c| compile_clause(c, param_offset, binds))
            .collect();
        parts.push(format!("({})", should_parts.join(" OR ")));
    }

    if parts.is_empty() {
        "true".to_string()
    } else {
        parts.join(" AND ")
    }
}

fn compile_clause(
    clause: &FilterClause,
    param_offset: &mut usize,
    binds: &mut Vec<(String, surrealdb::sql::Value)>,
) -> String {
    let mut next_param = |value: serde_json::Value| -> String {
        let name = format!("fp{param_offset}");
        *param_offset += 1;
        let sql_value: surrealdb::sql::Value = surrealdb::sql::json(&value.to_string())
            .unwrap_or(surrealdb::sql::Value::Null);
        binds.push((name.clone(), sql_value));
        format!("${name}")
    };

    match clause {
        FilterClause::Match { key, value } => {
            let param = next_param(value.clone());
            format!("{key} = {param}")
        }
        FilterClause::MatchAny { key, values } => {
            let param = next_param(serde_json::Value::Array(values.clone()));
            format!("{key} CONTAINSANY {param}")
        }
        FilterClause::Range { key, gte, lte } => {
            let mut bounds = Vec::new();
            if let Some(gte) = gte {
                let param = next_param(gte.clone());
                bounds.push(format!("{key} >= {param}"));
            }
            if let Some(lte) = lte {
                let param = next_param(lte.clone());
                bounds.push(format!("{key} <= {param}"));
            }
            if bounds.is_empty() {
                "true".to_string()
            } else {
                bounds.join(" AND ")
            }
        }
        FilterClause::IsNull { key } => format!("{key} = NULL"),
        FilterClause::IsNotNull { key } => format!("{key} != NULL"),
    }
}

#[async_trait]
impl ChunkStore for SurrealChunkStore {
    async fn create_collection(&self, dimension: usize) -> Result<(), AppError> {
        ensure_runtime_indexes(&self.db, dimension).await?;
        self.dimension.store(dimension, Ordering::Relaxed);
        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool, AppError> {
        let mut res = self
            .db
            .client
            .query("INFO FOR TABLE chunk;")
            .await
            .map_err(AppError::Database)?;
        let info: Option<surrealdb::Value> = res.take(0).map_err(AppError::Database)?;
        Ok(info.is_some())
    }

    async fn delete_collection(&self) -> Result<(), AppError> {
        self.db
            .client
            .query("DELETE chunk; DELETE chunk_embedding; REMOVE INDEX IF EXISTS idx_chunk_embedding_hnsw ON TABLE chunk_embedding;")
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
        Ok(())
    }

    async fn get_collection_info(&self) -> Result<CollectionInfo, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            count: u64,
        }
        let mut res = self
            .db
            .client
            .query("SELECT count() AS count FROM chunk GROUP ALL;")
            .await
            .map_err(AppError::Database)?;
        let rows: Vec<CountRow> = res.take(0).map_err(AppError::Database)?;
        let point_count = rows.first().map_or(0, |r| r.count) as usize;

        Ok(CollectionInfo {
            name: "chunk".to_string(),
            dimension: self.dimension.load(Ordering::Relaxed),
            point_count,
            hnsw_enabled: true,
        })
    }

    async fn set_hnsw_enabled(&self, enabled: bool) -> Result<(), AppError> {
        if enabled {
            return Ok(());
        }
        self.db
            .client
            .query("REMOVE INDEX IF EXISTS idx_chunk_embedding_hnsw ON TABLE chunk_embedding;")
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
        Ok(())
    }

    async fn upsert(&self, points: Vec<ChunkPoint>) -> Result<(), AppError> {
        let expected_dimension = self.dimension.load(Ordering::Relaxed);
        for ChunkPoint { chunk, vector } in points {
            if expected_dimension != 0 && vector.len() != expected_dimension {
                return Err(AppError::Validation(format!(
                    "vector for chunk {} has dimension {}, expected {expected_dimension}",
                    chunk.id,
                    vector.len()
                )));
            }
            let chunk_id = chunk.id.clone();
            let embedding = ChunkEmbedding::new(&chunk_id, vector);

            let query = self
                .db
                .client
                .query("BEGIN TRANSACTION;")
                .query("UPSERT type::thing('chunk', $chunk_id) CONTENT $chunk;")
                .query(
                    "UPSERT type::thing('chunk_embedding', $chunk_id) SET \
                     chunk_id = type::thing('chunk', $chunk_id), embedding = $embedding, \
                     created_at = IF created_at != NONE THEN created_at ELSE time::now() END, \
                     updated_at = time::now();",
                )
                .query("COMMIT TRANSACTION;")
                .bind(("chunk_id", chunk_id))
                .bind(("chunk", chunk))
                .bind(("embedding", embedding.embedding));
            let response = with_timeout(self.timeout, async { query.await.map_err(AppError::Database) }).await?;
            response.check().map_err(AppError::Database)?;
        }
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> Result<Option<Chunk>, AppError> {
        with_timeout(self.timeout, async {
            self.db.client.select(("chunk", id)).await.map_err(AppError::Database)
        })
        .await
    }

    async fn delete(&self, ids: &[String]) -> Result<(), AppError> {
        for id in ids {
            let query = self
                .db
                .client
                .query("DELETE type::thing('chunk', $id); DELETE type::thing('chunk_embedding', $id);")
                .bind(("id", id.clone()));
            let response = with_timeout(self.timeout, async { query.await.map_err(AppError::Database) }).await?;
            response.check().map_err(AppError::Database)?;
        }
        Ok(())
    }

    async fn set_payload(&self, id: &str, patch: serde_json::Value) -> Result<(), AppError> {
        let query = self
            .db
            .client
            .query("UPDATE type::thing('chunk', $id) MERGE $patch;")
            .bind(("id", id.to_string()))
            .bind(("patch", patch));
        let response = with_timeout(self.timeout, async { query.await.map_err(AppError::Database) }).await?;
        response.check().map_err(AppError::Database)?;
        Ok(())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<(Chunk, f32)>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            chunk_id: Chunk,
            score: f32,
        }

        let mut offset = 0usize;
        let mut binds = Vec::new();
        let where_clause = compile_filter(filter, &mut offset, &mut binds);

        let sql = format!(
            "SELECT chunk_id, vector::similarity::cosine(embedding, $embedding) AS score \
             FROM chunk_embedding \
             WHERE embedding <|{limit},100|> $embedding \
               AND chunk_id IN (SELECT VALUE id FROM chunk WHERE {where_clause}) \
             ORDER BY score DESC \
             LIMIT {limit} \
             FETCH chunk_id;"
        );

        let mut query = self.db.client.query(sql).bind(("embedding", vector));
        for (name, value) in binds {
            query = query.bind((name, value));
        }

        let mut response =
            with_timeout(self.timeout, async { query.await.map_err(AppError::Database) }).await?;
        let rows: Vec<Row> = response.take(0).unwrap_or_default();
        Ok(rows.into_iter().map(|r| (r.chunk_id, r.score)).collect())
    }

    async fn full_text_search(
        &self,
        query_text: &str,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<(Chunk, f32)>, AppError> {
        let mut offset = 0usize;
        let mut binds = Vec::new();
        let where_clause = compile_filter(filter, &mut offset, &mut binds);

        let sql = format!(
            "SELECT *, IF search::score(0) != NONE THEN search::score(0) ELSE 0 END AS fts_score \
             FROM chunk \
             WHERE original_text @0@ $terms AND ({where_clause}) \
             ORDER BY fts_score DESC \
             LIMIT {limit};"
        );

        let mut q = self.db.client.query(sql).bind(("terms", query_text.to_string()));
        for (name, value) in binds {
            q = q.bind((name, value));
        }

        let mut response = with_timeout(self.timeout, async { q.await.map_err(AppError::Database) }).await?;
        response = response.check().map_err(AppError::Database)?;

        #[derive(Deserialize)]
        struct Row {
            #[serde(flatten)]
            chunk: Chunk,
            fts_score: f32,
        }
        let rows: Vec<Row> = response.take(0).map_err(AppError::Database)?;
        Ok(rows.into_iter().map(|r| (r.chunk, r.fts_score)).collect())
    }

    async fn scroll(&self, filter: &Filter, limit: usize) -> Result<Vec<Chunk>, AppError> {
        let mut offset = 0usize;
        let mut binds = Vec::new();
        let where_clause = compile_filter(filter, &mut offset, &mut binds);

        let sql = format!(
            "SELECT * FROM chunk WHERE {where_clause} ORDER BY created_at DESC LIMIT {limit};"
        );
        let mut q = self.db.client.query(sql);
        for (name, value) in binds {
            q = q.bind((name, value));
        }
        let mut response = with_timeout(self.timeout, async { q.await.map_err(AppError::Database) }).await?;
        response.take(0).map_err(AppError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    async fn test_store() -> SurrealChunkStore {
        let db = SurrealDbClient::memory("chunk_store_test", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("memory db");
        SurrealChunkStore::new(db)
    }

    #[tokio::test]
    async fn create_collection_is_idempotent() {
        let store = test_store().await;
        store.create_collection(8).await.expect("first");
        store.create_collection(8).await.expect("second");
    }
}
