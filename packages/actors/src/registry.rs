//! Job body trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use job_core::{JobContext, JobDefinition};
use serde_json::Value;

/// Future type for async job bodies.
pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// Trait for job bodies.
///
/// Implement this trait to define what a named job does. Bodies receive
/// owned positional arguments and return an owned result, so nothing is
/// shared with the dispatcher.
pub trait JobBody: Send + Sync + 'static {
    /// The definition this body is registered under.
    fn definition(&self) -> JobDefinition;

    /// Run the job and return its result.
    fn run(&self, args: Vec<Value>, context: JobContext) -> JobFuture;
}

/// Registry mapping job names to their bodies.
///
/// Built once at startup and shared read-only by every execution unit.
#[derive(Default, Clone)]
pub struct JobRegistry {
    bodies: HashMap<String, Arc<dyn JobBody>>,
}

impl JobRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            bodies: HashMap::new(),
        }
    }

    /// Register a body under its definition's name.
    pub fn register<B: JobBody>(&mut self, body: B) -> &mut Self {
        let definition = body.definition();
        if self
            .bodies
            .insert(definition.name.to_string(), Arc::new(body))
            .is_some()
        {
            tracing::warn!("Replacing job body registered as {}", definition.name);
        }
        self
    }

    /// Register an async closure as the body of `definition`.
    pub fn register_fn<F, Fut>(&mut self, definition: JobDefinition, body: F) -> &mut Self
    where
        F: Fn(Vec<Value>, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(FnJob::new(definition, move |args, context| {
            let future: JobFuture = Box::pin(body(args, context));
            future
        }))
    }

    /// Get the body registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn JobBody>> {
        self.bodies.get(name).cloned()
    }

    /// Check if a body is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.bodies.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bodies.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

/// A closure-based job body.
pub struct FnJob<F>
where
    F: Fn(Vec<Value>, JobContext) -> JobFuture + Send + Sync + 'static,
{
    definition: JobDefinition,
    body: F,
}

impl<F> FnJob<F>
where
    F: Fn(Vec<Value>, JobContext) -> JobFuture + Send + Sync + 'static,
{
    /// Create a new closure-based body.
    pub fn new(definition: JobDefinition, body: F) -> Self {
        Self { definition, body }
    }
}

impl<F> JobBody for FnJob<F>
where
    F: Fn(Vec<Value>, JobContext) -> JobFuture + Send + Sync + 'static,
{
    fn definition(&self) -> JobDefinition {
        self.definition
    }

    fn run(&self, args: Vec<Value>, context: JobContext) -> JobFuture {
        (self.body)(args, context)
    }
}
