//! Demo job bodies registered by the server.

use std::time::Duration;

use job_actors::JobRegistry;
use job_core::JobDefinition;
use serde_json::{Value, json};

pub const BUSY_BOX: JobDefinition = JobDefinition::new("BusyBox", module_path!());
pub const ECHO: JobDefinition = JobDefinition::new("echo", module_path!());
pub const SLEEP: JobDefinition = JobDefinition::new("sleep", module_path!());
pub const FAIL: JobDefinition = JobDefinition::new("fail", module_path!());

const BUSY_BOX_STEP: Duration = Duration::from_secs(10);

/// Create the registry with the demo bodies.
pub fn registry() -> JobRegistry {
    let mut registry = JobRegistry::new();

    // Demo: three long naps
    registry.register_fn(BUSY_BOX, |_args, ctx| async move {
        for _ in 0..3 {
            tracing::info!("BusyBox on {}...", ctx.worker_id);
            tokio::time::sleep(BUSY_BOX_STEP).await;
        }
        Ok(Value::Null)
    });

    // Demo: Echo handler
    registry.register_fn(ECHO, |args, ctx| async move {
        tracing::info!("Echo job on {}: {:?}", ctx.worker_id, args);
        Ok(Value::Array(args))
    });

    // Demo: Sleep handler, first argument in seconds
    registry.register_fn(SLEEP, |args, _ctx| async move {
        let seconds = args.first().and_then(Value::as_u64).unwrap_or(5);
        tracing::info!("Sleeping for {} seconds", seconds);
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        Ok(json!({ "slept": seconds }))
    });

    // Demo: Failing handler
    registry.register_fn(FAIL, |args, _ctx| async move {
        let reason = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or("Intentional failure")
            .to_string();
        Err::<Value, _>(anyhow::anyhow!(reason))
    });

    registry
}
