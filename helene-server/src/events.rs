//! Event Registry & Channels (§4.6): name → event descriptor, channels
//! partitioning the subscription set, lazy channel creation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use helene_core::error::HeleneError;
use helene_core::payload::{Payload, NO_CHANNEL};
use helene_core::wire::ExtValue;

use crate::node::ClientNode;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `(node, event, channel) → boolean` custom subscription predicate (§3 `Event.shouldSubscribe`).
pub type ShouldSubscribe =
    Arc<dyn Fn(Arc<ClientNode>, String, String) -> BoxFuture<'static, bool> + Send + Sync>;

/// Registration-time descriptor for an event (§3 `Event`).
#[derive(Clone)]
pub struct EventOptions {
    pub protected: bool,
    pub user_scoped: bool,
    pub cluster_wide: bool,
    pub should_subscribe: Option<ShouldSubscribe>,
}

impl Default for EventOptions {
    fn default() -> Self {
        Self {
            protected: false,
            user_scoped: false,
            cluster_wide: false,
            should_subscribe: None,
        }
    }
}

impl EventOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn user_scoped(mut self) -> Self {
        self.user_scoped = true;
        self
    }

    pub fn cluster_wide(mut self) -> Self {
        self.cluster_wide = true;
        self
    }

    pub fn with_should_subscribe(mut self, predicate: ShouldSubscribe) -> Self {
        self.should_subscribe = Some(predicate);
        self
    }
}

/// A channel's subscriber matrix: event name → set of live node ids (§3 `Channel`).
/// Materialised lazily on first reference; stale ids left behind by an
/// ungraceful drop resolve to a no-op delivery rather than a panic, since
/// delivery always re-consults the node registry.
#[derive(Default)]
struct Channel {
    subscribers: DashMap<String, DashSet<String>>,
}

impl Channel {
    fn insert_subscriber(&self, event: &str, node_id: String) {
        self.subscribers
            .entry(event.to_string())
            .or_insert_with(DashSet::new)
            .insert(node_id);
    }
}

/// `addEvent`/`subscribe`/`unsubscribe`/`emit` (§4.6).
pub struct EventRegistry {
    events: DashMap<String, EventOptions>,
    channels: DashMap<String, Channel>,
    /// Node registry is consulted at delivery time to resolve ids to live
    /// senders; it is owned by `Server` and handed in per call rather than
    /// duplicated here.
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// `addEvent(name, options)`. New events are automatically visible to
    /// all channels (there is nothing channel-local to configure).
    pub fn add_event(&self, name: impl Into<String>, options: EventOptions) {
        self.events.insert(name.into(), options);
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events.iter().map(|e| e.key().clone()).collect()
    }

    fn channel(&self, name: &str) -> dashmap::mapref::one::RefMut<'_, String, Channel> {
        self.channels.entry(name.to_string()).or_default()
    }

    /// `subscribe(node, events, channel)` (§4.6): returns an admission map,
    /// partial admission is legal.
    pub async fn subscribe(
        &self,
        node: Arc<ClientNode>,
        events: &[String],
        channel: &str,
        channel_authz: Option<&(dyn Fn(Arc<ClientNode>, String) -> BoxFuture<'static, bool> + Send + Sync)>,
    ) -> HashMap<String, bool> {
        if let Some(authz) = channel_authz {
            if !authz(node.clone(), channel.to_string()).await {
                return events.iter().map(|e| (e.clone(), false)).collect();
            }
        }

        let mut admission = HashMap::new();
        for event_name in events {
            let admitted = self.try_admit(&node, event_name, channel).await;
            if admitted {
                self.channel(channel).insert_subscriber(event_name, node.id.clone());
                node.subscriptions.insert((channel.to_string(), event_name.clone()));
            }
            admission.insert(event_name.clone(), admitted);
        }
        admission
    }

    async fn try_admit(&self, node: &Arc<ClientNode>, event_name: &str, channel: &str) -> bool {
        let Some(event) = self.events.get(event_name) else {
            return false;
        };

        if event.protected && !node.is_authenticated().await {
            return false;
        }

        if event.user_scoped {
            match node.user_id().await {
                Some(user_id) if user_id == channel => {}
                _ => return false,
            }
        }

        if let Some(predicate) = &event.should_subscribe {
            if !predicate(node.clone(), event_name.to_string(), channel.to_string()).await {
                return false;
            }
        }

        true
    }

    /// `unsubscribe(node, events, channel)`: idempotent, always reports `true`.
    pub fn unsubscribe(&self, node: &Arc<ClientNode>, events: &[String], channel: &str) -> HashMap<String, bool> {
        if let Some(chan) = self.channels.get(channel) {
            for event_name in events {
                if let Some(set) = chan.subscribers.get(event_name) {
                    set.remove(&node.id);
                }
                node.subscriptions.remove(&(channel.to_string(), event_name.clone()));
            }
        }
        events.iter().map(|e| (e.clone(), true)).collect()
    }

    /// Remove a node from every channel it is known to have subscribed to
    /// (§4.3 `close`).
    pub fn remove_node(&self, node: &ClientNode) {
        for entry in node.subscriptions.iter() {
            let (channel, event) = (*entry).clone();
            if let Some(chan) = self.channels.get(&channel) {
                if let Some(set) = chan.subscribers.get(&event) {
                    set.remove(&node.id);
                }
            }
        }
        node.subscriptions.clear();
    }

    /// `emit(event, params, channel)` (§4.6): local delivery only. Cluster
    /// fan-out is the caller's responsibility (`Server::emit` composes this
    /// with the bus adapter) since this registry has no bus handle.
    pub fn deliver_local(
        &self,
        nodes: &DashMap<String, Arc<ClientNode>>,
        event: &str,
        params: Option<ExtValue>,
        channel: Option<&str>,
    ) {
        let channel = channel.unwrap_or(NO_CHANNEL);
        let Some(chan) = self.channels.get(channel) else {
            return;
        };
        let Some(subscribers) = chan.subscribers.get(event) else {
            return;
        };

        let frame_id = uuid::Uuid::new_v4().to_string();
        for node_id in subscribers.iter() {
            if let Some(node) = nodes.get(&*node_id) {
                node.send(Payload::Event {
                    id: frame_id.clone(),
                    event: event.to_string(),
                    channel: channel.to_string(),
                    params: params.clone(),
                });
            }
        }
    }

    pub fn is_cluster_wide(&self, event: &str) -> bool {
        self.events.get(event).map(|e| e.cluster_wide).unwrap_or(false)
    }

    pub fn event_exists(&self, event: &str) -> bool {
        self.events.contains_key(event)
    }
}

pub fn params_required(params: Option<ExtValue>) -> Result<ExtValue, HeleneError> {
    params.ok_or(HeleneError::ParamsNotFound)
}
