//! Method Registry (§4.5): name → handler with per-method protection,
//! middleware chain, result cache and parameter schema.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use helene_core::error::{ErrorCode, HeleneError};
use helene_core::exec_context::ExecutionContext;
use helene_core::wire::ExtValue;
use helene_cache::TtlCache;

use crate::node::ClientNode;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `Arc<dyn Fn(ClientNode, ExtValue) -> BoxFuture<Result<ExtValue, HeleneError>> + Send + Sync>`
/// per §4.5's implementation note, generalizing the event-bus's handler
/// storage pattern from `TypeId` keys to method-name-string keys.
pub type Handler =
    Arc<dyn Fn(Arc<ClientNode>, ExtValue) -> BoxFuture<'static, Result<ExtValue, HeleneError>> + Send + Sync>;

/// A single middleware step: receives and returns params, or fails the
/// call with `INTERNAL_ERROR` (§4.5 step 5).
pub type Middleware = Arc<dyn Fn(ExtValue) -> BoxFuture<'static, Result<ExtValue, HeleneError>> + Send + Sync>;

/// Validate-and-coerce predicate for inbound params (§4.5 step 3). Failure
/// maps to `INVALID_PARAMS`.
pub type Schema = Arc<dyn Fn(&ExtValue) -> Result<ExtValue, String> + Send + Sync>;

/// Registration-time options for a method (§3 `Method`).
#[derive(Default, Clone)]
pub struct MethodOptions {
    pub protected: bool,
    pub middleware: Vec<Middleware>,
    pub schema: Option<Schema>,
    /// `Some(max_age)` enables the bounded result cache keyed by the
    /// canonical-encoded, post-schema params (§4.5 step 4).
    pub cache_max_age: Option<Duration>,
}

impl MethodOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn with_middleware(mut self, mw: Middleware) -> Self {
        self.middleware.push(mw);
        self
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn cached(mut self, max_age: Duration) -> Self {
        self.cache_max_age = Some(max_age);
        self
    }
}

struct Method {
    handler: Handler,
    options: MethodOptions,
    cache: Option<TtlCache<String, ExtValue>>,
}

/// `DashMap<String, Method>` for concurrent read / serialised-per-key write
/// (§4.5 implementation note).
pub struct MethodRegistry {
    methods: DashMap<String, Method>,
    cache_capacity: usize,
}

impl MethodRegistry {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            methods: DashMap::new(),
            cache_capacity,
        }
    }

    pub fn register(&self, name: impl Into<String>, handler: Handler, options: MethodOptions) {
        let cache = options
            .cache_max_age
            .map(|max_age| TtlCache::bounded(max_age, self.cache_capacity));
        self.methods.insert(
            name.into(),
            Method {
                handler,
                options,
                cache,
            },
        );
    }

    pub fn unregister(&self, name: &str) {
        self.methods.remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// All registered method names (§4.10 `list`).
    pub fn names(&self) -> Vec<String> {
        self.methods.iter().map(|e| e.key().clone()).collect()
    }

    /// Run the 8-step call pipeline of §4.5 for a resolved method name.
    pub async fn call(
        &self,
        node: Arc<ClientNode>,
        method_name: &str,
        params: ExtValue,
    ) -> Result<ExtValue, HeleneError> {
        // Step 1: resolve.
        let Some(entry) = self.methods.get(method_name) else {
            return Err(HeleneError::MethodNotFound(method_name.to_string()));
        };

        // Step 2: protected gate.
        if entry.options.protected && !node.is_authenticated().await {
            return Err(HeleneError::MethodForbidden("Method Forbidden".to_string()));
        }

        // Step 3: schema validate + coerce.
        let coerced = if let Some(schema) = &entry.options.schema {
            schema(&params).map_err(HeleneError::InvalidParams)?
        } else {
            params
        };

        // Step 4: cache lookup.
        let cache_key = if entry.cache.is_some() {
            Some(coerced.encode_canonical())
        } else {
            None
        };
        if let (Some(cache), Some(key)) = (&entry.cache, &cache_key) {
            if let Some(hit) = cache.get(key) {
                return Ok(hit);
            }
        }

        // Step 5: middleware left-to-right.
        let mut transformed = coerced;
        for mw in &entry.options.middleware {
            transformed = mw(transformed)
                .await
                .map_err(|e| HeleneError::Internal(e.message()))?;
        }

        // Step 6: invoke inside the async execution context.
        let handler = entry.handler.clone();
        let cache = entry.cache.clone();
        let cache_key = cache_key.clone();
        // Drop the DashMap read guard before awaiting the handler so a
        // concurrent `unregister`/`register` on another key never blocks on us.
        drop(entry);

        let node_id = node.id.clone();
        let node_context = Arc::new(serde_json::to_value(&node.context().await).unwrap_or_default());
        let exec_ctx = ExecutionContext::new(node_id, node_context);

        let started = std::time::Instant::now();
        let result = exec_ctx
            .scope(handler(node.clone(), transformed.clone()))
            .await;
        let elapsed = started.elapsed();

        // Step 7: METHOD_EXECUTION observation.
        let result_log = match &result {
            Ok(value) => value.encode_canonical(),
            Err(err) => err.message(),
        };
        tracing::info!(
            method = method_name,
            node_id = %node.id,
            elapsed_ms = elapsed.as_millis() as u64,
            ok = result.is_ok(),
            params = %transformed.encode_canonical(),
            result = %result_log,
            observation = "METHOD_EXECUTION",
        );

        if let (Ok(value), Some(cache), Some(key)) = (&result, cache, cache_key) {
            cache.insert(key, value.clone());
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TransportKind;

    fn sum_handler() -> Handler {
        Arc::new(|_node, params| {
            Box::pin(async move {
                let sum: f64 = match &params {
                    ExtValue::Array(items) => items.iter().filter_map(ExtValue::as_f64).sum(),
                    _ => 0.0,
                };
                Ok(ExtValue::Number(sum))
            })
        })
    }

    #[tokio::test]
    async fn sum_rpc_scenario() {
        let registry = MethodRegistry::new(1_000);
        registry.register("sum", sum_handler(), MethodOptions::new());

        let (node, _rx) = ClientNode::new(TransportKind::Socket, None, None);
        let params = ExtValue::Array(vec![ExtValue::Number(7.0), ExtValue::Number(7.0), ExtValue::Number(7.0)]);
        let result = registry.call(node, "sum", params).await.unwrap();
        assert_eq!(result.as_f64(), Some(21.0));
    }

    #[tokio::test]
    async fn unknown_method_not_found() {
        let registry = MethodRegistry::new(1_000);
        let (node, _rx) = ClientNode::new(TransportKind::Socket, None, None);
        let err = registry.call(node, "missing", ExtValue::Null).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MethodNotFound);
    }

    #[tokio::test]
    async fn protected_method_forbidden_until_authenticated() {
        let registry = MethodRegistry::new(1_000);
        registry.register(
            "p",
            Arc::new(|_node, _params| Box::pin(async { Ok(ExtValue::Bool(true)) })),
            MethodOptions::new().protected(),
        );

        let (node, _rx) = ClientNode::new(TransportKind::Socket, None, None);
        let err = registry.call(node.clone(), "p", ExtValue::Null).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MethodForbidden);

        node.authenticate(ExtValue::Object(vec![(
            "user".into(),
            ExtValue::Object(vec![("_id".into(), ExtValue::String("u1".into()))]),
        )]))
        .await;
        let ok = registry.call(node, "p", ExtValue::Null).await.unwrap();
        assert_eq!(ok, ExtValue::Bool(true));
    }

    #[tokio::test]
    async fn cache_hit_scenario() {
        use std::sync::atomic::{AtomicI64, Ordering};
        let x = Arc::new(AtomicI64::new(0));

        let registry = MethodRegistry::new(1_000);
        let x_clone = x.clone();
        registry.register(
            "cached",
            Arc::new(move |_node, _params| {
                let x = x_clone.clone();
                Box::pin(async move { Ok(ExtValue::Number(x.load(Ordering::SeqCst) as f64)) })
            }),
            MethodOptions::new().cached(Duration::from_secs(60)),
        );

        let (node, _rx) = ClientNode::new(TransportKind::Socket, None, None);

        let first = registry.call(node.clone(), "cached", ExtValue::Null).await.unwrap();
        assert_eq!(first.as_f64(), Some(0.0));

        x.store(9000, Ordering::SeqCst);

        let second = registry.call(node.clone(), "cached", ExtValue::Null).await.unwrap();
        assert_eq!(second.as_f64(), Some(0.0), "same params must hit the cached value");

        let test_params = ExtValue::Object(vec![("test".into(), ExtValue::Bool(true))]);
        let third = registry.call(node.clone(), "cached", test_params.clone()).await.unwrap();
        assert_eq!(third.as_f64(), Some(9000.0), "different params bypass the cache");

        let fourth = registry.call(node, "cached", test_params).await.unwrap();
        assert_eq!(fourth.as_f64(), Some(9000.0), "now cached under the new params");
    }

    #[tokio::test]
    async fn invalid_params_from_schema_failure() {
        let registry = MethodRegistry::new(1_000);
        registry.register(
            "strict",
            Arc::new(|_node, params| Box::pin(async move { Ok(params) })),
            MethodOptions::new().with_schema(Arc::new(|v| {
                if v.as_f64().is_some() {
                    Ok(v.clone())
                } else {
                    Err("expected a number".to_string())
                }
            })),
        );

        let (node, _rx) = ClientNode::new(TransportKind::Socket, None, None);
        let err = registry
            .call(node, "strict", ExtValue::String("nope".into()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParams);
    }
}
