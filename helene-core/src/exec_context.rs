//! Async execution context (§4.11): carries `{executionId, node context}`
//! into handler code via a task-local, so user method bodies can read it
//! without an explicit parameter.

use std::sync::Arc;

use serde_json::Value;

tokio::task_local! {
    static EXECUTION_CONTEXT: ExecutionContext;
}

/// Per-call execution context, entered for the duration of a single
/// method-handler invocation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub node_id: String,
    pub node_context: Arc<Value>,
}

impl ExecutionContext {
    pub fn new(node_id: impl Into<String>, node_context: Arc<Value>) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            node_context,
        }
    }

    /// Run `fut` with `self` installed as the ambient execution context.
    pub async fn scope<F, T>(self, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        EXECUTION_CONTEXT.scope(self, fut).await
    }

    /// Read the ambient execution context. Panics if called outside of a
    /// handler invocation — by construction every handler body runs inside
    /// `ExecutionContext::scope`, so this should never fire in practice.
    pub fn current() -> Self {
        EXECUTION_CONTEXT.with(|ctx| ctx.clone())
    }

    /// Read the ambient execution context, returning `None` instead of
    /// panicking outside of a handler invocation (e.g. in unit tests that
    /// call handler logic directly).
    pub fn try_current() -> Option<Self> {
        EXECUTION_CONTEXT.try_with(|ctx| ctx.clone()).ok()
    }
}
