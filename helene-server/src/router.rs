//! Axum `Router` assembly (§6): mounts the socket and HTTP+SSE transports,
//! an unauthenticated health endpoint, CORS, and the per-remote-address rate
//! limiter at the transport edge (§4.12).

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use helene_core::error::HeleneError;
use helene_core::health::{HealthBuilder, HealthIndicator, HealthStatus};
use helene_ratelimit::RateLimiter;
use tower_http::cors::CorsLayer;

use crate::server::Server;
use crate::transport::{sse, ws};

/// Reports the live node count as a liveness-only indicator (§2b: the
/// health endpoint carries an uptime/node-count summary). Never fails —
/// there is no unhealthy node count, only an informative one.
struct NodeCount(Arc<Server>);

impl HealthIndicator for NodeCount {
    fn name(&self) -> &str {
        "nodes"
    }

    async fn check(&self) -> HealthStatus {
        HealthStatus::Up
    }

    fn affects_readiness(&self) -> bool {
        false
    }
}

/// Build the router, mounting `/helene-ws` (socket), `GET /__h/sse`,
/// `POST /__h`, and the unauthenticated `GET /healthz*` family (§2b).
pub fn build(server: Arc<Server>) -> Router {
    let cors = cors_layer(&server.config.origins);
    // Shared with the per-frame check in the socket transport (§4.12) so a
    // node's handshake and its subsequent inbound frames draw from the same
    // window rather than two independently-refilling buckets.
    let rate_limiter = server.rate_limiter.clone();
    let health = HealthBuilder::new().check(NodeCount(server.clone())).build();

    Router::new()
        .route("/helene-ws", get(ws::upgrade))
        .route("/__h/sse", get(sse::open))
        .route("/__h", post(sse::post_method))
        .merge(helene_core::health::health_routes::<Arc<Server>>(health))
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(cors)
        .with_state(server)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new();
    }
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}

async fn rate_limit_middleware(
    State(limiter): State<RateLimiter<IpAddr>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if !limiter.try_acquire(&addr.ip()) {
        tracing::warn!(remote = %addr.ip(), observation = "RATE_LIMIT_EXCEEDED");
        return HeleneError::TooManyRequests.into_response();
    }
    next.run(request).await
}
