use std::ops::Deref;

use surrealdb::engine::any::{connect, Any};
use surrealdb::{Error, Surreal};

/// Thin wrapper around a `Surreal<Any>` connection, scoped to one namespace/database.
#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    pub async fn new(address: &str, namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect(address).await?;
        db.use_ns(namespace).use_db(database).await?;
        Ok(Self { client: db })
    }

    /// In-memory connection, used by tests and the demo CLI wiring.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;
        db.use_ns(namespace).use_db(database).await?;
        Ok(Self { client: db })
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
