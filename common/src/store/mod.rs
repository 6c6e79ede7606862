pub mod db;
pub mod filter;
pub mod indexes;
pub mod surreal;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::error::AppError;
use filter::Filter;

pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    fn table_name() -> &'static str;
    fn get_id(&self) -> &str;
}

/// Generates an entity struct carrying `id`/`created_at`/`updated_at` plus the given
/// fields, with flexible id deserialization (plain string or a SurrealDB `Thing`) and
/// SurrealDB `Datetime` (de)serialization for the timestamps.
#[macro_export]
macro_rules! stored_object {
    ($name:ident, $table:expr, {$($(#[$attr:meta])* $field:ident: $ty:ty),* $(,)?}) => {
        struct FlexibleIdVisitor;

        impl<'de> serde::de::Visitor<'de> for FlexibleIdVisitor {
            type Value = String;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string or a Thing")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(value.to_string())
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(value)
            }

            fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let thing = surrealdb::sql::Thing::deserialize(serde::de::value::MapAccessDeserializer::new(map))?;
                Ok(thing.id.to_raw())
            }
        }

        pub fn deserialize_flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            deserializer.deserialize_any(FlexibleIdVisitor)
        }

        fn serialize_datetime<S>(date: &chrono::DateTime<chrono::Utc>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            use serde::Serialize;
            Into::<surrealdb::sql::Datetime>::into(*date).serialize(serializer)
        }

        fn deserialize_datetime<'de, D>(deserializer: D) -> Result<chrono::DateTime<chrono::Utc>, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            use serde::Deserialize;
            let dt = surrealdb::sql::Datetime::deserialize(deserializer)?;
            Ok(chrono::DateTime::<chrono::Utc>::from(dt))
        }

        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
        pub struct $name {
            #[serde(deserialize_with = "deserialize_flexible_id")]
            pub id: String,
            #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
            pub created_at: chrono::DateTime<chrono::Utc>,
            #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
            pub updated_at: chrono::DateTime<chrono::Utc>,
            $( $(#[$attr])* pub $field: $ty),*
        }

        impl $crate::store::StoredObject for $name {
            fn table_name() -> &'static str {
                $table
            }

            fn get_id(&self) -> &str {
                &self.id
            }
        }
    };
}

/// Capability interface over a vector-searchable, filterable collection of chunks.
/// The SurrealDB-backed `surreal::SurrealChunkStore` is the one reference implementation;
/// a production deployment could swap in a remote vector-database client behind the same
/// trait without touching the ingest/search pipelines.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn create_collection(&self, dimension: usize) -> Result<(), AppError>;
    async fn collection_exists(&self) -> Result<bool, AppError>;
    async fn delete_collection(&self) -> Result<(), AppError>;
    async fn get_collection_info(&self) -> Result<CollectionInfo, AppError>;
    async fn set_hnsw_enabled(&self, enabled: bool) -> Result<(), AppError>;

    async fn upsert(&self, points: Vec<ChunkPoint>) -> Result<(), AppError>;
    async fn retrieve(&self, id: &str) -> Result<Option<Chunk>, AppError>;
    async fn delete(&self, ids: &[String]) -> Result<(), AppError>;
    async fn set_payload(&self, id: &str, patch: serde_json::Value) -> Result<(), AppError>;

    async fn search(
        &self,
        vector: Vec<f32>,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<(Chunk, f32)>, AppError>;

    async fn full_text_search(
        &self,
        query: &str,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<(Chunk, f32)>, AppError>;

    async fn scroll(&self, filter: &Filter, limit: usize) -> Result<Vec<Chunk>, AppError>;
}

/// A chunk payload plus the dense vector that is stored alongside it in the
/// `chunk_embedding` side table.
#[derive(Debug, Clone)]
pub struct ChunkPoint {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub point_count: usize,
    pub hnsw_enabled: bool,
}
