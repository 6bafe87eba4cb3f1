//! Process glue: config → cluster bus → `Server` → router → listener, with
//! graceful shutdown on Ctrl-C/SIGTERM.
//!
//! Grounded on the host framework's `AppBuilder::serve` — a listener bound
//! to the configured address, `axum::serve` with a graceful-shutdown future
//! that waits on Ctrl-C (and SIGTERM on Unix), draining in-flight nodes
//! before exit.

use std::sync::Arc;

use helene_core::config::ServerConfig;
use helene_core::HeleneError;
use helene_server::bus::ClusterBus;
use helene_server::server::{Server, ServerBuilder};

/// Construct the cluster bus configured by `config.bus_url`: a `RedisBus`
/// when set and the `redis-bus` feature is enabled, otherwise the in-process
/// `NullBus` (clustering degrades to local-only delivery, per §4.8).
#[cfg(feature = "redis-bus")]
pub async fn build_bus(config: &ServerConfig) -> Result<Arc<dyn ClusterBus>, HeleneError> {
    match &config.bus_url {
        Some(url) => {
            let bus = helene_bus_redis::RedisBus::connect(url, config.bus_namespace.clone())
                .await
                .map_err(|err| HeleneError::Internal(format!("redis bus connect failed: {err}")))?;
            Ok(bus as Arc<dyn ClusterBus>)
        }
        None => Ok(Arc::new(helene_server::bus::NullBus)),
    }
}

#[cfg(not(feature = "redis-bus"))]
pub async fn build_bus(config: &ServerConfig) -> Result<Arc<dyn ClusterBus>, HeleneError> {
    if config.bus_url.is_some() {
        tracing::warn!("helene.bus.url is set but the \"redis-bus\" feature is disabled; falling back to local-only delivery");
    }
    Ok(Arc::new(helene_server::bus::NullBus))
}

/// Build a [`Server`] from `config` with the cluster bus already wired in.
/// Callers that need to register methods/events or auth hooks should build
/// their own `ServerBuilder` instead and call [`serve`] directly.
pub async fn build_server(config: ServerConfig) -> Result<Arc<Server>, HeleneError> {
    let bus = build_bus(&config).await?;
    Ok(ServerBuilder::new(config).bus(bus).build())
}

/// Serve `server` until a shutdown signal arrives, then drain gracefully.
///
/// Spawns the heartbeat engine, binds `config.host:config.port`, and runs
/// `axum::serve` with a graceful-shutdown future. On shutdown, stops
/// accepting new connections first so in-flight requests can finish before
/// the listener is dropped.
pub async fn serve(server: Arc<Server>) -> Result<(), HeleneError> {
    let addr = format!("{}:{}", server.config.host, server.config.port);
    let heartbeat_shutdown = server.spawn_heartbeat();
    let router = helene_server::router::build(server.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, observation = "SERVER_LISTENING");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    server.set_accepting_connections(false);
    heartbeat_shutdown.cancel();
    tracing::info!(observation = "SERVER_STOPPED");
    Ok(())
}

/// Load `ServerConfig` for `profile`, build a `Server`, and serve it. The
/// entry point used by the `helene-server` binary; library consumers who
/// need custom methods/events/auth should call [`build_server`]/[`serve`]
/// directly instead.
pub async fn run(profile: &str) -> Result<(), HeleneError> {
    helene_core::init_tracing();

    let config = helene_core::config::HeleneConfig::load(profile)
        .map_err(|err| HeleneError::Internal(err.to_string()))?
        .with_typed::<ServerConfig>()
        .map_err(|err| HeleneError::Internal(err.to_string()))?;
    let server = build_server(config.typed().clone()).await?;
    serve(server).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl-C");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_server_defaults_to_null_bus_without_url() {
        let server = build_server(ServerConfig::default()).await.unwrap();
        assert!(server.accepting_connections());
    }
}
