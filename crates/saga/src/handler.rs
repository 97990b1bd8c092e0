//! Named step handler registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;
use uuid::Uuid;

/// Context handed to a step or compensation handler.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// The saga this call belongs to.
    pub saga_id: Uuid,

    /// The step being executed or compensated.
    pub step_id: Uuid,

    /// The step's name.
    pub step_name: String,

    /// The step's parameters from the definition.
    pub params: serde_json::Value,

    /// A snapshot of the saga-level shared context.
    pub saga_context: HashMap<String, serde_json::Value>,
}

type HandlerFn = dyn Fn(StepContext) -> BoxFuture<'static, bool> + Send + Sync;

/// Registry mapping handler names to callables.
///
/// Actions and compensations are both registered here; a saga step refers
/// to them by name. Handlers return `true` for success — failures are
/// expected outcomes, not panics or errors.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<HandlerFn>>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under a name, replacing any existing one.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        let wrapped: Arc<HandlerFn> = Arc::new(move |ctx| Box::pin(handler(ctx)));
        self.handlers
            .write()
            .unwrap()
            .insert(name.into(), wrapped);
    }

    /// Looks up a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<HandlerFn>> {
        self.handlers.read().unwrap().get(name).cloned()
    }

    /// Returns true if a handler is registered under the name.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().unwrap().contains_key(name)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().unwrap().len()
    }

    /// Returns true if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().unwrap().is_empty()
    }
}
