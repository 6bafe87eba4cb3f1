//! A minimal multi-room chat server built on Helene: `sendMessage` saves a
//! message and emits it to `message` subscribers on the room's channel,
//! `getHistory`/`listRooms` serve the in-memory backlog.

mod methods;
mod models;
mod services;

use helene::bootstrap;
use helene_core::config::ServerConfig;
use helene_server::{EventOptions, ServerBuilder};
use services::ChatService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    helene_core::init_tracing();

    let config = ServerConfig::default();
    let bus = bootstrap::build_bus(&config).await?;

    let server = ServerBuilder::new(config)
        .bus(bus)
        .event("message", EventOptions::new().cluster_wide())
        .build();

    methods::register_methods(&server, ChatService::new());

    bootstrap::serve(server).await?;
    Ok(())
}
