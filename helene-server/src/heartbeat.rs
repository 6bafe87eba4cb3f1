//! Heartbeat / idleness engine (§4.9): one `tokio::time::interval` task per
//! server, not a timer per node. Pings every live node and reaps whichever
//! ones have gone silent past `termination_factor * interval`.
//!
//! A `CancellationToken`-driven loop, spawned directly by `Server` as a
//! plain background task rather than through a DI container (§4.9
//! implementation note; see DESIGN.md for the dropped `ServiceComponent`
//! abstraction).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use helene_core::payload::{Payload, NO_CHANNEL};
use tokio_util::sync::CancellationToken;

use crate::node::{ClientNode, NodeState};

/// Event name used for the server's outbound ping (§4.9). Clients treat it
/// like any other EVENT; there is no dedicated wire frame type for it.
pub const KEEP_ALIVE_EVENT: &str = "KEEP_ALIVE";

pub struct HeartbeatEngine {
    interval: Duration,
    /// Reap threshold: a node whose last inbound frame is older than
    /// `interval * termination_factor` is considered dead.
    termination_factor: u32,
}

impl HeartbeatEngine {
    pub fn new(interval: Duration, termination_factor: u32) -> Self {
        Self {
            interval,
            termination_factor,
        }
    }

    /// Run until `shutdown` is cancelled. `nodes` is the server's live node
    /// registry, shared by reference so reaping here and registration in
    /// the transport layer stay consistent.
    pub async fn run(self, nodes: Arc<DashMap<String, Arc<ClientNode>>>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        let reap_after_ms = self.interval.as_millis() as i64 * self.termination_factor as i64;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    self.tick(&nodes, reap_after_ms).await;
                }
            }
        }
    }

    async fn tick(&self, nodes: &DashMap<String, Arc<ClientNode>>, reap_after_ms: i64) {
        let now = now_ms();
        let mut dead = Vec::new();

        for entry in nodes.iter() {
            let node = entry.value().clone();
            if node.state().await == NodeState::Closed {
                dead.push(node.id.clone());
                continue;
            }
            if now - node.last_inbound_at_ms() >= reap_after_ms {
                dead.push(node.id.clone());
                continue;
            }
            node.send(Payload::Event {
                id: uuid::Uuid::new_v4().to_string(),
                event: KEEP_ALIVE_EVENT.to_string(),
                channel: NO_CHANNEL.to_string(),
                params: None,
            });
        }

        for node_id in dead {
            if let Some((_, node)) = nodes.remove(&node_id) {
                node.close("heartbeat timeout").await;
                tracing::info!(node_id = %node_id, observation = "HEARTBEAT_TIMEOUT");
            }
        }
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
