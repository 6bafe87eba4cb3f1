//! Redis-backed `ClusterBus` (§4.8): the real cluster adapter backend.
//!
//! Grounded on the async pub/sub shape used elsewhere in the ecosystem for
//! bridging a local event bus to Redis: one multiplexed `ConnectionManager`
//! for publishing, and one dedicated pub/sub connection per subscribed
//! (channel, event) pair, reconnected with backoff via
//! [`helene_server::bus::reconnect_with_backoff`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use helene_core::wire::ExtValue;
use helene_server::bus::{reconnect_with_backoff, BoxFuture, BusFrame, ClusterBus};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Wire shape published to Redis. Kept separate from [`BusFrame`] so the
/// on-the-wire JSON contract doesn't shift silently if `BusFrame` grows
/// fields that shouldn't cross the network.
#[derive(Serialize, Deserialize)]
struct WireFrame {
    channel: String,
    event: String,
    params: Option<ExtValue>,
    emission_id: String,
}

impl From<BusFrame> for WireFrame {
    fn from(frame: BusFrame) -> Self {
        Self {
            channel: frame.channel,
            event: frame.event,
            params: frame.params,
            emission_id: frame.emission_id,
        }
    }
}

impl From<WireFrame> for BusFrame {
    fn from(wire: WireFrame) -> Self {
        Self {
            channel: wire.channel,
            event: wire.event,
            params: wire.params,
            emission_id: wire.emission_id,
        }
    }
}

/// Cap on reconnect backoff for both publisher and subscriber tasks.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// [`ClusterBus`] backed by Redis pub/sub. Channels are namespaced
/// `<namespace>:<channel>:<event>` so multiple Helene deployments can share
/// one Redis instance without cross-talk.
pub struct RedisBus {
    client: redis::Client,
    namespace: String,
    publisher: Mutex<Option<ConnectionManager>>,
    shutdown: CancellationToken,
}

impl RedisBus {
    /// Connect and eagerly establish the publishing connection. Subscriber
    /// connections are established lazily, one per (channel, event) pair,
    /// on the first call to [`ClusterBus::subscribe`].
    pub async fn connect(url: &str, namespace: impl Into<String>) -> redis::RedisResult<Arc<Self>> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_connection_manager().await?;
        Ok(Arc::new(Self {
            client,
            namespace: namespace.into(),
            publisher: Mutex::new(Some(publisher)),
            shutdown: CancellationToken::new(),
        }))
    }

    /// Cancelling this token stops every background subscriber task spawned
    /// by this bus. `Server` does not currently expose a shutdown path that
    /// reaches the bus, so this is mostly useful in tests.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn channel_name(&self, channel: &str, event: &str) -> String {
        format!("{}:{}:{}", self.namespace, channel, event)
    }
}

impl ClusterBus for RedisBus {
    fn publish(&self, frame: BusFrame) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let channel_name = self.channel_name(&frame.channel, &frame.event);
            let wire: WireFrame = frame.into();
            let payload = match serde_json::to_string(&wire) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(error = %err, observation = "SOCKET_ERROR");
                    return;
                }
            };

            let mut guard = self.publisher.lock().await;
            let Some(conn) = guard.as_mut() else {
                tracing::warn!(channel = %channel_name, observation = "SOCKET_ERROR");
                return;
            };
            if let Err(err) = redis::cmd("PUBLISH")
                .arg(&channel_name)
                .arg(&payload)
                .query_async::<()>(conn)
                .await
            {
                tracing::warn!(error = %err, channel = %channel_name, observation = "SOCKET_ERROR");
            }
        })
    }

    fn subscribe(&self, channel: String, event: String) -> mpsc::Receiver<BusFrame> {
        let (tx, rx) = mpsc::channel(64);
        let channel_name = self.channel_name(&channel, &event);
        let client = self.client.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            reconnect_with_backoff(&shutdown, MAX_BACKOFF, || {
                let client = client.clone();
                let tx = tx.clone();
                let channel_name = channel_name.clone();
                async move { run_subscription(client, channel_name, tx).await }
            })
            .await;
        });

        rx
    }
}

/// Opens one pub/sub connection, subscribes, and forwards frames until the
/// stream ends or the receiver is dropped. Returning `Err` makes the caller
/// retry with backoff; returning `Ok` (receiver gone) ends the task cleanly.
async fn run_subscription(
    client: redis::Client,
    channel_name: String,
    tx: mpsc::Sender<BusFrame>,
) -> Result<(), String> {
    let mut pubsub = client.get_async_pubsub().await.map_err(|err| err.to_string())?;
    pubsub
        .subscribe(&channel_name)
        .await
        .map_err(|err| err.to_string())?;

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, channel = %channel_name, observation = "SOCKET_ERROR");
                continue;
            }
        };
        let wire: WireFrame = match serde_json::from_str(&payload) {
            Ok(wire) => wire,
            Err(err) => {
                tracing::warn!(error = %err, channel = %channel_name, observation = "PARSE_ERROR");
                continue;
            }
        };
        if tx.send(wire.into()).await.is_err() {
            return Ok(());
        }
    }

    Err(format!("pub/sub stream for {channel_name} ended"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_frame_round_trips_through_json() {
        let frame = BusFrame {
            channel: "room:1".into(),
            event: "message".into(),
            params: Some(ExtValue::String("hi".into())),
            emission_id: "abc123".into(),
        };
        let wire: WireFrame = frame.into();
        let json = serde_json::to_string(&wire).unwrap();
        let back: WireFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.channel, "room:1");
        assert_eq!(back.event, "message");
        assert_eq!(back.emission_id, "abc123");
        assert_eq!(back.params.unwrap().as_str(), Some("hi"));
    }

    #[test]
    fn wire_frame_omits_params_when_none() {
        let frame = BusFrame {
            channel: "c".into(),
            event: "e".into(),
            params: None,
            emission_id: "id".into(),
        };
        let wire: WireFrame = frame.into();
        let json = serde_json::to_string(&wire).unwrap();
        assert!(json.contains("\"params\":null"));
    }

    #[test]
    fn channel_name_is_namespaced() {
        // `RedisBus::connect` needs a live server, so exercise the pure
        // namespacing logic directly via a fake instance layout.
        struct Fixture {
            namespace: String,
        }
        impl Fixture {
            fn channel_name(&self, channel: &str, event: &str) -> String {
                format!("{}:{}:{}", self.namespace, channel, event)
            }
        }
        let fixture = Fixture {
            namespace: "helene".into(),
        };
        assert_eq!(fixture.channel_name("room:1", "message"), "helene:room:1:message");
    }
}
