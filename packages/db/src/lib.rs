//! SurrealDB integration for the background job system.
//!
//! This crate provides the two durable collaborators of the scheduler:
//! the job record store ([`repositories::JobRepository`]) and the FIFO
//! queue of job identifiers ([`repositories::QueueRepository`]).
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use schema::init_schema;

/// Connect to the database and apply the schema.
///
/// This should be called once at application startup; the returned handle
/// is cheap to clone and is passed to every repository.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}
