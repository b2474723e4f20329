//! Storage layer for kgrag
//!
//! Provides the embedded SurrealDB graph + vector store with schema
//! management and the repository query surface.

pub mod error;
pub mod repository;
pub mod schema;

pub use error::{DbError, Result};
pub use repository::Repository;

use std::path::Path;
use surrealdb::engine::local::{Db, Mem};
use surrealdb::Surreal;

/// Database connection type
pub type DbConnection = Surreal<Db>;

/// Initialize database with RocksDB (persistent)
#[cfg(feature = "rocksdb")]
pub async fn init_persistent(path: impl AsRef<Path>) -> Result<DbConnection> {
    let db = Surreal::new::<surrealdb::engine::local::RocksDb>(path.as_ref()).await?;
    setup_database(&db).await?;
    Ok(db)
}

/// Initialize database in-memory (for testing)
pub async fn init_memory() -> Result<DbConnection> {
    let db = Surreal::new::<Mem>(()).await?;
    setup_database(&db).await?;
    Ok(db)
}

/// Setup database namespace, database, and schema
async fn setup_database(db: &DbConnection) -> Result<()> {
    db.use_ns("kgrag").use_db("graph").await?;
    schema::initialize_schema(db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_memory() {
        let db = init_memory().await.expect("Failed to init memory db");
        // Just verify it connects
        let _: Vec<serde_json::Value> = db.select("entity").await.unwrap();
    }
}
