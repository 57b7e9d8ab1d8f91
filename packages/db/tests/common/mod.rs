use job_db::{Database, DbConfig, DbError};

/// Every test gets its own in-memory datastore.
pub async fn setup_db() -> Result<Database, DbError> {
    job_db::init(&DbConfig::memory()).await
}
