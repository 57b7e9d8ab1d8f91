//! Server configuration from environment variables.

use std::time::Duration;

use job_actors::SchedulerConfig;
use job_db::DbConfig;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Log level used when neither `RUST_LOG` nor `LOG_LEVEL` is set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

/// Everything the server binary needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db: DbConfig,
    pub scheduler: SchedulerConfig,
    /// Enqueue the demo job on startup.
    pub demo: bool,
}

impl ServerConfig {
    /// Read the configuration from the process environment.
    ///
    /// - `JOBS_DB_ENDPOINT` (default `mem://`)
    /// - `JOBS_NAMESPACE`, `JOBS_DATABASE`
    /// - `JOBS_TICK_MS` (default 1000)
    /// - `JOBS_WORKERS` (default: hardware threads minus one)
    /// - `JOBS_DEMO` (`1` or `true` to enqueue a demo job)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut db = DbConfig::default();
        if let Some(endpoint) = lookup("JOBS_DB_ENDPOINT") {
            db = db.with_endpoint(endpoint);
        }
        if let Some(namespace) = lookup("JOBS_NAMESPACE") {
            db = db.with_namespace(namespace);
        }
        if let Some(database) = lookup("JOBS_DATABASE") {
            db = db.with_database(database);
        }

        let mut scheduler = SchedulerConfig::default();
        if let Some(value) = lookup("JOBS_TICK_MS") {
            let millis = parse_positive("JOBS_TICK_MS", value)?;
            scheduler = scheduler.with_tick_interval(Duration::from_millis(millis));
        }
        if let Some(value) = lookup("JOBS_WORKERS") {
            scheduler = scheduler.with_workers(parse_positive("JOBS_WORKERS", value)? as usize);
        }

        let demo = lookup("JOBS_DEMO")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            db,
            scheduler,
            demo,
        })
    }
}

/// Build the log filter from `RUST_LOG`, then `LOG_LEVEL`, then `info`.
///
/// Blank or unparsable values fall through to the next source.
pub fn log_filter(lookup: impl Fn(&str) -> Option<String>) -> EnvFilter {
    ["RUST_LOG", "LOG_LEVEL"]
        .into_iter()
        .filter_map(&lookup)
        .filter(|directives| !directives.trim().is_empty())
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

fn parse_positive(name: &'static str, value: String) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidNumber { name, value }),
    }
}
