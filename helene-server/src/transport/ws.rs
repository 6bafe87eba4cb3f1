//! Full-duplex socket transport (§4.4): one axum `WebSocket` per node, split
//! into a read half driving dispatch and a write half owned exclusively by
//! a single writer task draining the node's FIFO egress queue.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use helene_core::error::{ErrorCode, HeleneError};
use helene_core::payload::Payload;
use helene_core::wire::ExtValue;

use crate::node::{ClientNode, Egress, TransportKind};
use crate::server::Server;

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string))
}

pub async fn upgrade(
    State(server): State<Arc<Server>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = bearer_token(&headers);
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    ws.on_upgrade(move |socket| handle_socket(server, socket, addr, token, user_agent))
}

async fn handle_socket(
    server: Arc<Server>,
    socket: WebSocket,
    addr: SocketAddr,
    token: Option<String>,
    user_agent: Option<String>,
) {
    if !server.accepting_connections() {
        return;
    }

    let (node, egress_rx) = ClientNode::new(TransportKind::Socket, Some(addr.to_string()), user_agent);
    server.register_node(node.clone(), token).await;

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(drain_egress(sink, egress_rx));

    node.send(Payload::Setup { id: node.id.clone() });
    node.mark_ready().await;

    while let Some(frame) = stream.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(node_id = %node.id, error = %err, observation = "SOCKET_ERROR");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                node.touch();

                if !check_rate_limit(&server, &node, addr.ip()) {
                    break;
                }

                dispatch(&server, &node, &text).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    server.unregister_node(&node, "socket closed").await;
    writer.abort();
}

async fn drain_egress(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut egress_rx: tokio::sync::mpsc::Receiver<Egress>,
) {
    while let Some(item) = egress_rx.recv().await {
        let outgoing = match item {
            Egress::Frame(payload) => Message::Text(payload.encode().into()),
            Egress::Close => Message::Close(None),
        };
        let is_close = matches!(outgoing, Message::Close(_));
        if sink.send(outgoing).await.is_err() {
            break;
        }
        if is_close {
            break;
        }
    }
}

/// Consult the per-remote-address window once per inbound METHOD frame
/// (§4.12 — the HTTP-layer middleware in `router::build` only ever sees the
/// handshake, not subsequent frames on an already-upgraded socket). Sends a
/// socket-level `INTERNAL_ERROR "Too Many Requests"` frame on overflow and
/// reports whether the caller should keep reading (`false` once the node has
/// racked up `rate_limit_max_violations` in a row, per §4.4).
fn check_rate_limit(server: &Arc<Server>, node: &Arc<ClientNode>, remote: std::net::IpAddr) -> bool {
    if server.rate_limiter.try_acquire(&remote) {
        node.reset_rate_limit_violations();
        return true;
    }

    tracing::warn!(node_id = %node.id, remote = %remote, observation = "RATE_LIMIT_EXCEEDED");
    node.send(Payload::error(
        HeleneError::TooManyRequests.message(),
        HeleneError::TooManyRequests.code(),
    ));
    node.record_rate_limit_violation() < server.config.rate_limit_max_violations as u64
}

/// Decode one inbound frame and dispatch it through the method registry,
/// shared between the socket and HTTP POST transports.
pub async fn dispatch(server: &Arc<Server>, node: &Arc<ClientNode>, text: &str) {
    let payload = match Payload::decode(text) {
        Ok(p) => p,
        Err(err) => {
            node.send(Payload::error(err.message(), ErrorCode::ParseError));
            return;
        }
    };

    match payload {
        Payload::Method { id, method, params, void } => {
            let result = server
                .methods
                .call(node.clone(), &method, params.unwrap_or(ExtValue::Null))
                .await;
            match result {
                Ok(value) if !void => {
                    node.send(Payload::Result {
                        id,
                        method,
                        result: value,
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    let mut error_payload = Payload::error_for(&id, &err, false);
                    if let Payload::Error { method: m, .. } = &mut error_payload {
                        *m = Some(method);
                    }
                    node.send(error_payload);
                }
            }
        }
        _ => {
            node.send(Payload::error(
                "only method frames may be sent by a peer",
                ErrorCode::InvalidRequest,
            ));
        }
    }
}
