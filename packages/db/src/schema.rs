//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes. Safe to call on
/// every startup.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    // Job record store
    db.query(JOB_SCHEMA).await?.check()?;

    // Durable queue
    db.query(QUEUE_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
///
/// Schemaless so that arbitrary JSON in `args` and `result` is stored
/// verbatim; the lifecycle fields are still typed.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE FIELD IF NOT EXISTS name ON job TYPE string;
DEFINE FIELD IF NOT EXISTS module ON job TYPE string;
DEFINE FIELD IF NOT EXISTS state ON job TYPE string
    ASSERT $value IN ["queued", "pending", "completed", "failed"];
DEFINE FIELD IF NOT EXISTS message ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS duration_ms ON job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE string;
DEFINE FIELD IF NOT EXISTS updated_at ON job TYPE string;

DEFINE INDEX IF NOT EXISTS job_state ON job FIELDS state;
DEFINE INDEX IF NOT EXISTS job_name ON job FIELDS name;
"#;

/// Durable queue schema: one row per queued job id, ordered by position.
const QUEUE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS queue_entry SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS job_id ON queue_entry TYPE string;
DEFINE FIELD IF NOT EXISTS position ON queue_entry TYPE string;

DEFINE INDEX IF NOT EXISTS queue_entry_position ON queue_entry FIELDS position UNIQUE;
DEFINE INDEX IF NOT EXISTS queue_entry_job ON queue_entry FIELDS job_id;
"#;
