//! Client-Node (§3, §4.3): the per-connection entity that owns
//! authentication context, subscription set, transport handle and the
//! FIFO egress queue a single writer task drains in order.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use helene_core::payload::Payload;
use helene_core::wire::ExtValue;
use tokio::sync::{mpsc, RwLock};

/// Bound of the per-node egress queue. A slow or stalled peer backs up here
/// before frames are dropped — per §4.8/§4.3, buffered sends are not a
/// durability guarantee, so a full queue degrades to a dropped frame plus a
/// logged warning rather than blocking the sender.
const EGRESS_CAPACITY: usize = 256;

/// `CONNECTING → READY` on SETUP flushed. `READY ↔ AUTHENTICATED` via
/// login/logout. Any state `→ CLOSING` on close signal `→ CLOSED` after
/// cleanup. `READY` is terminal for unauthenticated access to protected
/// resources (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Connecting,
    Ready,
    Authenticated,
    Closing,
    Closed,
}

/// Which transport a node is bound to (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Socket,
    HttpSse,
}

/// A live outbound frame, handed to whichever writer task owns the
/// transport sink for this node.
pub enum Egress {
    Frame(Payload),
    Close,
}

/// Per-connection entity (§3 `ClientNode`). Cheap to clone — wraps an
/// `Arc` internally via `Arc<Node>` at the call sites that hold it, never
/// `Clone`d by value itself.
pub struct ClientNode {
    pub id: String,
    state: RwLock<NodeState>,
    context: RwLock<ExtValue>,
    /// (channel, event) pairs this node is currently subscribed to, kept
    /// here so `close()` can unwind channel subscriber sets without a full
    /// registry scan.
    pub subscriptions: DashSet<(String, String)>,
    pub transport_kind: TransportKind,
    /// Guarded by a `std::sync::RwLock` (not tokio's) since [`Self::send`]
    /// is synchronous and called from non-async contexts like the
    /// heartbeat tick. Swapped out by [`Self::reattach_egress`] on SSE
    /// reconnect (§4.4, §5 "SSE reconnect grace").
    egress_tx: std::sync::RwLock<mpsc::Sender<Egress>>,
    /// Bumped on every [`Self::reattach_egress`]; lets a pending grace-window
    /// reaper tell a stale disconnect apart from a since-superseded one.
    generation: AtomicU64,
    last_inbound_at_ms: AtomicI64,
    pub remote_address: Option<String>,
    pub user_agent: Option<String>,
    /// Consecutive inbound frames rejected by the rate limiter (§4.4, §4.12);
    /// reset on the next frame that is admitted.
    rate_limit_violations: AtomicU64,
}

impl ClientNode {
    /// Construct a node with a fresh 128-bit random id (§3) and the egress
    /// receiver half the owning transport's writer task should drain.
    pub fn new(
        transport_kind: TransportKind,
        remote_address: Option<String>,
        user_agent: Option<String>,
    ) -> (Arc<Self>, mpsc::Receiver<Egress>) {
        let (egress_tx, egress_rx) = mpsc::channel(EGRESS_CAPACITY);
        let node = Arc::new(Self {
            id: new_node_id(),
            state: RwLock::new(NodeState::Connecting),
            context: RwLock::new(ExtValue::Object(Vec::new())),
            subscriptions: DashSet::new(),
            transport_kind,
            egress_tx: std::sync::RwLock::new(egress_tx),
            generation: AtomicU64::new(0),
            last_inbound_at_ms: AtomicI64::new(now_ms()),
            remote_address,
            user_agent,
            rate_limit_violations: AtomicU64::new(0),
        });
        (node, egress_rx)
    }

    /// Replace the egress channel with a fresh one, for SSE reconnect-with-
    /// same-id (§4.4): a dropped outbound sink does not retire the node
    /// immediately, so a client that reopens `GET /__h/sse` with the same
    /// `x-client-id` within the grace window resumes delivery rather than
    /// getting a brand new node. Returns the new receiver and the
    /// generation the caller should compare against before declaring the
    /// node dead once the grace window elapses.
    pub fn reattach_egress(&self) -> (mpsc::Receiver<Egress>, u64) {
        let (tx, rx) = mpsc::channel(EGRESS_CAPACITY);
        *self.egress_tx.write().unwrap() = tx;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        (rx, generation)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> NodeState {
        *self.state.read().await
    }

    pub async fn is_authenticated(&self) -> bool {
        matches!(*self.state.read().await, NodeState::Authenticated)
    }

    /// `CONNECTING → READY`, called once SETUP has been handed to the
    /// egress queue.
    pub async fn mark_ready(&self) {
        let mut state = self.state.write().await;
        if *state == NodeState::Connecting {
            *state = NodeState::Ready;
        }
    }

    /// Encode and enqueue a payload for delivery; per-node FIFO ordering is
    /// guaranteed for frames that are successfully enqueued (§4.3). A full
    /// or closed queue drops the frame rather than blocking the caller —
    /// callers fanning an EVENT out to many nodes must not stall on one
    /// slow peer.
    pub fn send(&self, payload: Payload) {
        let tx = self.egress_tx.read().unwrap().clone();
        match tx.try_send(Egress::Frame(payload)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(node_id = %self.id, "egress queue full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(node_id = %self.id, "egress queue closed, dropping frame");
            }
        }
    }

    /// Convenience for `EVENT` (§4.3 `sendEvent`).
    pub fn send_event(&self, event: &str, params: Option<ExtValue>, channel: &str) {
        self.send(Payload::Event {
            id: uuid::Uuid::new_v4().to_string(),
            event: event.to_string(),
            channel: channel.to_string(),
            params,
        });
    }

    /// Install a new context, merging `user` in directly; authenticated
    /// iff the merged context carries a `user` field (§4.3, §4.7).
    pub async fn authenticate(&self, new_context: ExtValue) {
        *self.context.write().await = new_context;
        let authenticated = self.context.read().await.get("user").is_some();
        let mut state = self.state.write().await;
        *state = if authenticated {
            NodeState::Authenticated
        } else {
            NodeState::Ready
        };
    }

    /// Clear context, mark unauthenticated (§4.3 `logout`). Emits a
    /// `LOGOUT` observation — a structured `tracing` event, not a wire
    /// frame, matching the other internal observation events of §2a.
    pub async fn logout(&self) {
        *self.context.write().await = ExtValue::Object(Vec::new());
        *self.state.write().await = NodeState::Ready;
        tracing::info!(node_id = %self.id, observation = "LOGOUT");
    }

    pub async fn context(&self) -> ExtValue {
        self.context.read().await.clone()
    }

    /// The authenticated user's stable scalar id, if any (§3 `context.user._id`).
    pub async fn user_id(&self) -> Option<String> {
        let ctx = self.context.read().await;
        let user = ctx.get("user")?;
        user.get("_id")
            .or_else(|| user.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Reset the termination timer (§4.9): called on every inbound frame.
    pub fn touch(&self) {
        self.last_inbound_at_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_inbound_at_ms(&self) -> i64 {
        self.last_inbound_at_ms.load(Ordering::Relaxed)
    }

    /// Record one rate-limited inbound frame, returning the new consecutive
    /// count. The caller force-closes the node once this crosses its
    /// configured threshold (§4.4).
    pub fn record_rate_limit_violation(&self) -> u64 {
        self.rate_limit_violations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Clear the consecutive-violation count; called on every admitted frame.
    pub fn reset_rate_limit_violations(&self) {
        self.rate_limit_violations.store(0, Ordering::Relaxed);
    }

    /// `close(reason)` (§4.3): fires a `DISCONNECTION` observation; callers
    /// are responsible for removing the node from the channel/event
    /// registries and the node registry (the node itself does not know
    /// which channels it is subscribed to beyond its own bookkeeping set).
    pub async fn close(&self, reason: &str) {
        let mut state = self.state.write().await;
        if *state == NodeState::Closed {
            return;
        }
        *state = NodeState::Closing;
        drop(state);

        let _ = self.egress_tx.read().unwrap().try_send(Egress::Close);
        tracing::info!(node_id = %self.id, reason, observation = "DISCONNECTION");

        *self.state.write().await = NodeState::Closed;
    }
}

fn new_node_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
