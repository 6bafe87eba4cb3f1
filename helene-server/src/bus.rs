//! Cluster Bus Adapter (§4.8): publish/subscribe bridge to an external
//! message bus, namespaced per (channel, event), with emission-id dedupe.
//!
//! The real backend (`RedisBus`, built on the `redis` crate's async
//! multiplexed pub/sub) lives in the sibling `helene-bus-redis` crate so
//! that `helene-server` does not have to depend on `redis` directly — only
//! on this trait.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use helene_core::wire::ExtValue;
use tokio_util::sync::CancellationToken;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An inbound frame received from the bus, destined for local delivery.
#[derive(Debug, Clone)]
pub struct BusFrame {
    pub channel: String,
    pub event: String,
    pub params: Option<ExtValue>,
    pub emission_id: String,
}

/// Publish/subscribe bridge to an external message bus (§4.8). One real
/// backend exists (`RedisBus` in `helene-bus-redis`); this trait is the
/// seam that keeps `Server` from depending on it directly.
pub trait ClusterBus: Send + Sync + 'static {
    /// Publish one emission. Namespacing (`helene:<channel>:<event>` per
    /// §4.8) is the backend's concern.
    fn publish(&self, frame: BusFrame) -> BoxFuture<'_, ()>;

    /// Subscribe to a (channel, event) pair lazily, on first local
    /// subscription to a `clusterWide` event. Returns a receiver fed by a
    /// background task; dropping the receiver does not unsubscribe other
    /// listeners of the same pair.
    fn subscribe(&self, channel: String, event: String) -> tokio::sync::mpsc::Receiver<BusFrame>;
}

/// No-op bus used when no `bus.url` is configured — `clusterWide` events
/// are then local-only, matching §4.8's "optional cluster adapter".
pub struct NullBus;

impl ClusterBus for NullBus {
    fn publish(&self, _frame: BusFrame) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn subscribe(&self, _channel: String, _event: String) -> tokio::sync::mpsc::Receiver<BusFrame> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        rx
    }
}

/// Time-indexed LRU of recently-seen emission ids (§3 invariant: "Cluster
/// fan-out never re-emits an event locally more than once per logical
/// emission"). Entries older than `ttl` are swept lazily on insert.
pub struct EmissionDedupe {
    seen: DashMap<String, Instant>,
    ttl: Duration,
}

impl EmissionDedupe {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    /// Returns `true` if this is the first time `emission_id` has been
    /// seen within the TTL window (the caller should deliver it); `false`
    /// if it is a dupe (the caller should drop it).
    pub fn admit(&self, emission_id: &str) -> bool {
        self.sweep();
        if self.seen.contains_key(emission_id) {
            return false;
        }
        self.seen.insert(emission_id.to_string(), Instant::now());
        true
    }

    fn sweep(&self) {
        let ttl = self.ttl;
        self.seen.retain(|_, inserted| inserted.elapsed() < ttl);
    }
}

/// Generate a random 128-bit emission id (§4.6).
pub fn new_emission_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Exponential-backoff reconnect loop, shared shape for any `ClusterBus`
/// backend's connection-maintenance task. `connect` is retried with
/// doubling backoff capped at `max_backoff`, cancellable via `shutdown`.
pub async fn reconnect_with_backoff<F, Fut, E>(
    shutdown: &CancellationToken,
    max_backoff: Duration,
    mut connect: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let mut backoff = Duration::from_millis(100);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            result = connect() => {
                match result {
                    Ok(()) => {
                        backoff = Duration::from_millis(100);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, backoff_ms = backoff.as_millis() as u64, observation = "SOCKET_ERROR");
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(max_backoff);
                    }
                }
            }
        }
    }
}

/// Shared handle type used by `Server` to hold whichever bus backend is
/// configured (`NullBus` or `RedisBus`).
pub type SharedBus = Arc<dyn ClusterBus>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_admits_once() {
        let dedupe = EmissionDedupe::new(Duration::from_secs(30));
        assert!(dedupe.admit("abc"));
        assert!(!dedupe.admit("abc"));
    }

    #[test]
    fn dedupe_expires_after_ttl() {
        let dedupe = EmissionDedupe::new(Duration::from_millis(10));
        assert!(dedupe.admit("abc"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(dedupe.admit("abc"));
    }

    #[tokio::test]
    async fn null_bus_publish_is_noop() {
        let bus = NullBus;
        bus.publish(BusFrame {
            channel: "c".into(),
            event: "e".into(),
            params: None,
            emission_id: new_emission_id(),
        })
        .await;
    }
}
