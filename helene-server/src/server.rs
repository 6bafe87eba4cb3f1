//! The `Server` singleton (§3, §4): owns every registry, the optional
//! cluster bus, and the accept-connections gate. Built via [`ServerBuilder`],
//! a conventional runtime fluent builder rather than a type-state one —
//! SPEC_FULL.md §9 settles this Open Question in favour of matching the
//! host framework's `AppBuilder`, which is also a plain runtime builder.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use helene_core::config::ServerConfig;
use helene_core::wire::ExtValue;
use helene_ratelimit::RateLimiter;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthFn, AuthHooks, ChannelAuthzFn, LoginFn};
use crate::builtins::register_builtins;
use crate::bus::{BusFrame, ClusterBus, EmissionDedupe, NullBus};
use crate::events::{EventOptions, EventRegistry};
use crate::heartbeat::HeartbeatEngine;
use crate::methods::{Handler, MethodOptions, MethodRegistry};
use crate::node::ClientNode;

/// Minimum dedupe window for cluster-relayed emissions (§4.8: "≥30 s").
const EMISSION_DEDUPE_TTL: Duration = Duration::from_secs(30);

/// Per-process singleton (§3 `Server`). Cheap to clone — every field that
/// needs sharing is already behind an `Arc`/`DashMap`; `Server` itself is
/// handed around as `Arc<Server>`.
pub struct Server {
    pub methods: Arc<MethodRegistry>,
    pub events: Arc<EventRegistry>,
    pub clients: Arc<DashMap<String, Arc<ClientNode>>>,
    auth: AuthHooks,
    bus: Arc<dyn ClusterBus>,
    /// (channel, event) pairs for which a bus-ingress drain task has already
    /// been spawned, so the second node to subscribe to the same pair
    /// doesn't open a redundant `bus.subscribe` connection (§4.8).
    bus_subscriptions: DashSet<(String, String)>,
    dedupe: EmissionDedupe,
    /// Shared with the HTTP-layer middleware in `router::build` so a node's
    /// handshake/POST traffic and its inbound socket frames draw from the
    /// same per-remote-address window (§4.12).
    pub rate_limiter: RateLimiter<IpAddr>,
    accept_connections: AtomicBool,
    pub config: ServerConfig,
}

impl Server {
    /// Gate consulted by the transport layer before accepting a new
    /// connection (§3 `acceptConnections`); flipped off during graceful
    /// shutdown so in-flight nodes drain without new ones arriving.
    pub fn accepting_connections(&self) -> bool {
        self.accept_connections.load(Ordering::Relaxed)
    }

    pub fn set_accepting_connections(&self, accepting: bool) {
        self.accept_connections.store(accepting, Ordering::Relaxed);
    }

    pub fn auth_fn(&self) -> Option<&AuthFn> {
        self.auth.auth_fn.as_ref()
    }

    /// Register a freshly constructed node and run the ambient `authFn`
    /// against its handshake token, if configured (§4.7).
    pub async fn register_node(&self, node: Arc<ClientNode>, bearer_token: Option<String>) {
        if let Some(auth_fn) = &self.auth.auth_fn {
            if let Some(context) = auth_fn(bearer_token).await {
                node.authenticate(context).await;
            }
        }
        self.clients.insert(node.id.clone(), node);
    }

    /// Tear down a node's server-side bookkeeping (§4.3 `close`): removes
    /// it from every channel subscriber set and the node registry.
    pub async fn unregister_node(&self, node: &ClientNode, reason: &str) {
        node.close(reason).await;
        self.events.remove_node(node);
        self.clients.remove(&node.id);
    }

    /// `emit(event, params, channel)` (§4.6) composed with cluster fan-out:
    /// delivers locally, and if the event is `clusterWide`, publishes to the
    /// bus under a fresh emission id so other nodes in the cluster relay it
    /// back in without re-publishing (dedupe on ingress, see [`Self::on_bus_frame`]).
    pub async fn emit(&self, event: &str, params: Option<ExtValue>, channel: Option<&str>) {
        self.events.deliver_local(&self.clients, event, params.clone(), channel);

        if self.events.is_cluster_wide(event) {
            let frame = BusFrame {
                channel: channel.unwrap_or(helene_core::payload::NO_CHANNEL).to_string(),
                event: event.to_string(),
                params,
                emission_id: crate::bus::new_emission_id(),
            };
            self.dedupe.admit(&frame.emission_id);
            self.bus.publish(frame).await;
        }
    }

    /// Handle one inbound bus frame (§4.8 "bus ingress"): drop it if its
    /// emission id has already been seen locally, otherwise deliver it
    /// without re-publishing.
    pub fn on_bus_frame(&self, frame: BusFrame) {
        if !self.dedupe.admit(&frame.emission_id) {
            return;
        }
        self.events
            .deliver_local(&self.clients, &frame.event, frame.params, Some(&frame.channel));
    }

    /// Lazily open the cluster-bus ingress for a `(channel, event)` pair the
    /// first time a local node is admitted to a `clusterWide` subscription
    /// against it (§4.8 MUST, §4.6 "bus ingress"): spawns a task draining
    /// `bus.subscribe` into [`Self::on_bus_frame`]. Idempotent — later
    /// subscribers to the same pair reuse the already-spawned drain.
    pub fn ensure_bus_ingress(self: &Arc<Self>, channel: &str, event: &str) {
        let key = (channel.to_string(), event.to_string());
        if !self.bus_subscriptions.insert(key.clone()) {
            return;
        }

        let mut rx = self.bus.subscribe(key.0, key.1);
        let server = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                server.on_bus_frame(frame);
            }
        });
    }

    /// Spawn the heartbeat/idleness background task (§4.9). Returns the
    /// `CancellationToken` the caller should cancel at shutdown.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> CancellationToken {
        let shutdown = CancellationToken::new();
        let engine = HeartbeatEngine::new(
            Duration::from_millis(self.config.heartbeat_interval_ms),
            self.config.termination_factor,
        );
        let nodes = self.clients.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { engine.run(nodes, token).await });
        shutdown
    }
}

/// Runtime fluent builder for [`Server`] (§9 Open Question: runtime builder
/// over type-state, matching the host framework's `AppBuilder`).
pub struct ServerBuilder {
    config: ServerConfig,
    auth_fn: Option<AuthFn>,
    login_fn: Option<LoginFn>,
    channel_authz: Option<ChannelAuthzFn>,
    bus: Option<Arc<dyn ClusterBus>>,
    pending_methods: Vec<(String, Handler, MethodOptions)>,
    pending_events: Vec<(String, EventOptions)>,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            auth_fn: None,
            login_fn: None,
            channel_authz: None,
            bus: None,
            pending_methods: Vec::new(),
            pending_events: Vec::new(),
        }
    }

    pub fn auth_fn(mut self, f: AuthFn) -> Self {
        self.auth_fn = Some(f);
        self
    }

    pub fn login_fn(mut self, f: LoginFn) -> Self {
        self.login_fn = Some(f);
        self
    }

    pub fn channel_authz(mut self, f: ChannelAuthzFn) -> Self {
        self.channel_authz = Some(f);
        self
    }

    pub fn bus(mut self, bus: Arc<dyn ClusterBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn method(mut self, name: impl Into<String>, handler: Handler, options: MethodOptions) -> Self {
        self.pending_methods.push((name.into(), handler, options));
        self
    }

    pub fn event(mut self, name: impl Into<String>, options: EventOptions) -> Self {
        self.pending_events.push((name.into(), options));
        self
    }

    pub fn build(self) -> Arc<Server> {
        let methods = Arc::new(MethodRegistry::new(self.config.method_cache_capacity));
        let events = Arc::new(EventRegistry::new());

        for (name, options) in self.pending_events {
            events.add_event(name, options);
        }
        for (name, handler, options) in self.pending_methods {
            methods.register(name, handler, options);
        }

        let auth = AuthHooks {
            auth_fn: self.auth_fn,
            login_fn: self.login_fn,
            channel_authz: self.channel_authz.clone(),
        };

        // `register_builtins` wires the "subscribe" handler, which needs to
        // reach back into `Server` once a clusterWide event is admitted —
        // but `Server` doesn't exist yet. A `Weak` handle filled in right
        // after construction breaks that ordering without a reference cycle.
        let server_handle: Arc<OnceLock<Weak<Server>>> = Arc::new(OnceLock::new());
        register_builtins(
            &methods,
            events.clone(),
            self.channel_authz,
            auth.clone(),
            server_handle.clone(),
        );

        let rate_limiter = RateLimiter::<IpAddr>::new(
            self.config.rate_limit_max as u64,
            Duration::from_millis(self.config.rate_limit_window_ms),
        );

        let server = Arc::new(Server {
            methods,
            events,
            clients: Arc::new(DashMap::new()),
            auth,
            bus: self.bus.unwrap_or_else(|| Arc::new(NullBus)),
            bus_subscriptions: DashSet::new(),
            dedupe: EmissionDedupe::new(EMISSION_DEDUPE_TTL),
            rate_limiter,
            accept_connections: AtomicBool::new(true),
            config: self.config,
        });
        let _ = server_handle.set(Arc::downgrade(&server));
        server
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Egress, TransportKind};
    use helene_core::payload::Payload;

    #[tokio::test]
    async fn emit_delivers_to_local_subscribers() {
        let server = ServerBuilder::new(ServerConfig::default())
            .event("tick", EventOptions::new())
            .build();

        let (node, mut rx) = ClientNode::new(TransportKind::Socket, None, None);
        server.register_node(node.clone(), None).await;
        server
            .events
            .subscribe(node.clone(), &["tick".to_string()], helene_core::payload::NO_CHANNEL, None)
            .await;

        server.emit("tick", Some(ExtValue::Bool(true)), None).await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unregister_node_clears_subscriptions() {
        let server = ServerBuilder::new(ServerConfig::default())
            .event("tick", EventOptions::new())
            .build();

        let (node, _rx) = ClientNode::new(TransportKind::Socket, None, None);
        server.register_node(node.clone(), None).await;
        server
            .events
            .subscribe(node.clone(), &["tick".to_string()], helene_core::payload::NO_CHANNEL, None)
            .await;

        server.unregister_node(&node, "test").await;
        assert!(!server.clients.contains_key(&node.id));
        assert!(node.subscriptions.is_empty());
    }

    #[tokio::test]
    async fn builtins_are_registered() {
        let server = ServerBuilder::new(ServerConfig::default()).build();
        assert!(server.methods.contains("login"));
        assert!(server.methods.contains("logout"));
        assert!(server.methods.contains("subscribe"));
        assert!(server.methods.contains("list"));
    }

    /// A bus shared by every server built against it, backed by a broadcast
    /// channel: `publish` fans out to every subscriber the way a real Redis
    /// channel would, and each `subscribe` call spawns its own forwarding
    /// task the way [`helene_bus_redis::RedisBus`] opens one pub/sub
    /// connection per (channel, event) pair.
    #[derive(Clone)]
    struct SharedBus {
        tx: tokio::sync::broadcast::Sender<BusFrame>,
    }

    impl SharedBus {
        fn new() -> Arc<Self> {
            let (tx, _rx) = tokio::sync::broadcast::channel(16);
            Arc::new(Self { tx })
        }
    }

    impl ClusterBus for SharedBus {
        fn publish(&self, frame: BusFrame) -> crate::bus::BoxFuture<'_, ()> {
            let _ = self.tx.send(frame);
            Box::pin(async {})
        }

        fn subscribe(&self, _channel: String, _event: String) -> tokio::sync::mpsc::Receiver<BusFrame> {
            let mut broadcast_rx = self.tx.subscribe();
            let (tx, rx) = tokio::sync::mpsc::channel(16);
            tokio::spawn(async move {
                while let Ok(frame) = broadcast_rx.recv().await {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            });
            rx
        }
    }

    #[tokio::test]
    async fn bus_ingress_is_wired_on_first_cluster_wide_subscription() {
        let bus = SharedBus::new();

        let publisher = ServerBuilder::new(ServerConfig::default())
            .event("news", EventOptions::new().cluster_wide())
            .bus(bus.clone())
            .build();
        let subscriber = ServerBuilder::new(ServerConfig::default())
            .event("news", EventOptions::new().cluster_wide())
            .bus(bus)
            .build();

        let (node, mut node_rx) = ClientNode::new(TransportKind::Socket, None, None);
        subscriber.register_node(node.clone(), None).await;
        let params = ExtValue::Object(vec![(
            "events".into(),
            ExtValue::Array(vec![ExtValue::String("news".into())]),
        )]);
        subscriber.methods.call(node, "subscribe", params).await.unwrap();

        // Give the ingress task spawned by the subscribe call above a chance
        // to attach its broadcast receiver before the publisher sends.
        tokio::task::yield_now().await;

        publisher.emit("news", Some(ExtValue::Bool(true)), None).await;

        let frame = tokio::time::timeout(Duration::from_secs(1), node_rx.recv())
            .await
            .expect("event delivered through the real bus-ingress wiring, not a direct on_bus_frame call")
            .unwrap();
        assert!(matches!(frame, Egress::Frame(Payload::Event { .. })));
    }
}
