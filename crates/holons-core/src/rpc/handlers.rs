//! Inbound method handlers.
//!
//! A handler maps request params to a result or an [`RpcError`]. Any async
//! closure `Fn(Value) -> impl Future<Output = Result<Value, RpcError>>`
//! is a handler. Lookup is an exact match on the full method name.

use super::protocol::RpcError;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

/// Trait for answering one inbound method.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handle a call and return its result.
    async fn call(&self, params: Value) -> Result<Value, RpcError>;
}

#[async_trait::async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    async fn call(&self, params: Value) -> Result<Value, RpcError> {
        (self)(params).await
    }
}

/// Shared, thread-safe method table.
///
/// Cloning shares the table, so handlers registered through any clone are
/// visible to every session that uses it.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn Handler>>>>,
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("methods", &self.methods())
            .finish()
    }
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the closure handling `method`.
    pub fn register<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        self.register_handler(method, Arc::new(handler));
    }

    /// Install or replace a shared handler object for `method`.
    pub fn register_handler(&self, method: impl Into<String>, handler: Arc<dyn Handler>) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.insert(method.into(), handler);
    }

    /// Remove the handler for `method`, returning whether one existed.
    pub fn unregister(&self, method: &str) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.remove(method).is_some()
    }

    /// Find the handler for `method`.
    pub fn get(&self, method: &str) -> Option<Arc<dyn Handler>> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.get(method).cloned()
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut methods: Vec<String> = handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Run the handler for `method`, or fail with `method not found`.
    pub async fn dispatch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match self.get(method) {
            Some(handler) => handler.call(params).await,
            None => Err(RpcError::method_not_found(method)),
        }
    }
}
