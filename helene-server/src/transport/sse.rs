//! HTTP POST + SSE transport (§4.4): half-duplex fallback correlated by the
//! `x-client-id` header — `GET /__h/sse` opens the outbound event stream,
//! `POST /__h` carries inbound method calls.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use helene_core::error::HeleneError;
use helene_core::payload::Payload;
use serde::Deserialize;

use crate::node::{ClientNode, Egress, TransportKind};
use crate::server::Server;
use crate::transport::ws::dispatch;

/// SSE reconnect grace window (§5): a client id kept alive past its socket
/// drop for this long still resolves to a live node on the subsequent
/// `GET /__h/sse` re-open, instead of silently being a 404.
pub const RECONNECT_GRACE: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
pub struct SseQuery {
    #[serde(rename = "x-client-id")]
    client_id: Option<String>,
}

fn client_id(headers: &HeaderMap, query: &SseQuery) -> Option<String> {
    headers
        .get("x-client-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.client_id.clone())
}

/// `GET /__h/sse`: opens the outbound half for a node. A missing
/// `x-client-id` creates a fresh node (first connect); a known one resumes
/// delivery to the existing node (reconnect within [`RECONNECT_GRACE`] is
/// the caller's responsibility to retry against the same id).
pub async fn open(
    State(server): State<Arc<Server>>,
    headers: HeaderMap,
    Query(query): Query<SseQuery>,
) -> impl IntoResponse {
    if !server.accepting_connections() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    if let Some(id) = client_id(&headers, &query) {
        if let Some(existing) = server.clients.get(&id) {
            let node = (*existing).clone();
            drop(existing);
            let (rx, generation) = node.reattach_egress();
            return Ok(sse_response(server, node, rx, generation));
        }
    }

    let (node, egress_rx) = ClientNode::new(TransportKind::HttpSse, None, None);
    server.register_node(node.clone(), None).await;
    node.send(Payload::Setup { id: node.id.clone() });
    node.mark_ready().await;
    Ok(sse_response(server, node, egress_rx, node.generation()))
}

fn sse_response(
    server: Arc<Server>,
    node: Arc<ClientNode>,
    egress_rx: tokio::sync::mpsc::Receiver<Egress>,
    generation: u64,
) -> Sse<NodeSseStream> {
    Sse::new(NodeSseStream {
        server,
        node,
        egress_rx,
        generation,
    })
    .keep_alive(KeepAlive::default())
}

/// Per-node unicast SSE stream: a `poll_recv`-driven `Stream` over the
/// node's own mpsc egress receiver (one consumer), rather than a broadcast
/// receiver shared by many. Dropping it (sink gone — client disconnected or
/// is about to reconnect) does not retire the node immediately: a
/// grace-window reaper is scheduled instead (§4.4, §5).
pub struct NodeSseStream {
    server: Arc<Server>,
    node: Arc<ClientNode>,
    egress_rx: tokio::sync::mpsc::Receiver<Egress>,
    generation: u64,
}

impl futures_core::Stream for NodeSseStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.egress_rx.poll_recv(cx) {
            Poll::Ready(Some(Egress::Frame(payload))) => Poll::Ready(Some(Ok(frame_to_event(&payload)))),
            Poll::Ready(Some(Egress::Close)) | Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for NodeSseStream {
    fn drop(&mut self) {
        let server = self.server.clone();
        let node = self.node.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            tokio::time::sleep(RECONNECT_GRACE).await;
            if node.generation() == generation {
                server.unregister_node(&node, "sse grace window elapsed").await;
            }
        });
    }
}

fn frame_to_event(payload: &Payload) -> SseEvent {
    SseEvent::default().data(payload.encode())
}

/// `POST /__h`: inbound method call correlated by `x-client-id`. The node
/// must already exist (created by a prior `GET /__h/sse`); calling before
/// that is `INVALID_REQUEST`. Per §4.4 the RESULT/ERROR travels back over
/// the node's SSE stream, not the POST response body — this endpoint only
/// acknowledges receipt, reusing the same [`dispatch`] the socket transport
/// runs so both transports produce byte-identical RESULT/ERROR frames.
pub async fn post_method(
    State(server): State<Arc<Server>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let Some(id) = headers.get("x-client-id").and_then(|v| v.to_str().ok()) else {
        return HeleneError::InvalidRequest("missing x-client-id header".to_string()).into_response();
    };
    let Some(node) = server.clients.get(id).map(|e| (*e).clone()) else {
        return HeleneError::InvalidRequest("unknown x-client-id".to_string()).into_response();
    };
    node.touch();

    dispatch(&server, &node, &body).await;
    StatusCode::ACCEPTED.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Egress;
    use crate::server::ServerBuilder;
    use axum::http::HeaderValue;
    use helene_core::config::ServerConfig;
    use helene_core::wire::ExtValue;

    fn headers_with_client_id(id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-client-id", HeaderValue::from_str(id).unwrap());
        headers
    }

    #[tokio::test]
    async fn post_method_requires_client_id_header() {
        let server = ServerBuilder::new(ServerConfig::default()).build();
        let response = post_method(State(server), HeaderMap::new(), String::new())
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn post_method_rejects_unknown_client_id() {
        let server = ServerBuilder::new(ServerConfig::default()).build();
        let response = post_method(State(server), headers_with_client_id("ghost"), String::new())
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn post_method_dispatches_and_replies_over_the_sse_channel() {
        let handler: crate::methods::Handler = std::sync::Arc::new(|_node, params| {
            Box::pin(async move { Ok(params) })
        });
        let server = ServerBuilder::new(ServerConfig::default())
            .method("echo", handler, crate::methods::MethodOptions::new())
            .build();

        let (node, mut egress_rx) = ClientNode::new(TransportKind::HttpSse, None, None);
        server.register_node(node.clone(), None).await;

        let body = r#"{"type":"method","id":"1","method":"echo","params":"hi"}"#.to_string();
        let response = post_method(State(server), headers_with_client_id(&node.id), body)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        match egress_rx.recv().await.unwrap() {
            Egress::Frame(Payload::Result { id, result, .. }) => {
                assert_eq!(id, "1");
                assert_eq!(result, ExtValue::String("hi".to_string()));
            }
            _ => panic!("expected the RESULT to arrive on the node's own egress queue"),
        }
    }

    #[tokio::test]
    async fn open_without_client_id_registers_a_fresh_node() {
        let server = ServerBuilder::new(ServerConfig::default()).build();
        let before = server.clients.len();

        let response = open(State(server.clone()), HeaderMap::new(), Query(SseQuery { client_id: None }))
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(server.clients.len(), before + 1);
    }

    #[tokio::test]
    async fn open_rejects_new_connections_once_gated_closed() {
        let server = ServerBuilder::new(ServerConfig::default()).build();
        server.set_accepting_connections(false);

        let response = open(State(server), HeaderMap::new(), Query(SseQuery { client_id: None }))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
