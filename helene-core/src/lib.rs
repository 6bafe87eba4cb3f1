//! Ambient stack shared by every Helene crate: the extended-JSON wire
//! codec, the payload schema, the error taxonomy, configuration, and
//! health checks.

pub mod config;
pub mod error;
pub mod exec_context;
pub mod health;
pub mod payload;
pub mod wire;

pub use config::{ConfigError, HeleneConfig, ServerConfig};
pub use error::{ErrorCode, HeleneError};
pub use exec_context::ExecutionContext;
pub use payload::{Payload, NO_CHANNEL};
pub use wire::ExtValue;

/// Initialise `tracing` with an env-filter subscriber. Call once at process
/// startup before anything else logs.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
