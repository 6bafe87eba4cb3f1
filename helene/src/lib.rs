//! Helene — a real-time RPC-plus-pub/sub server.
//!
//! This facade crate re-exports the engine (`helene-server`) and its ambient
//! stack (`helene-core`, `helene-cache`, `helene-ratelimit`, and optionally
//! `helene-auth`/`helene-bus-redis`) behind a single dependency, and provides
//! [`bootstrap::run`] — the glue that turns a loaded `ServerConfig` into a
//! listening process. Import everything with:
//!
//! ```ignore
//! use helene::prelude::*;
//! ```

pub use helene_cache;
pub use helene_core;
pub use helene_ratelimit;
pub use helene_server;

#[cfg(feature = "auth")]
pub use helene_auth;

#[cfg(feature = "redis-bus")]
pub use helene_bus_redis;

#[cfg(feature = "auth")]
pub mod auth;
pub mod bootstrap;

/// Unified prelude — import everything with `use helene::prelude::*`.
pub mod prelude {
    pub use helene_core::config::ServerConfig;
    pub use helene_core::{ErrorCode, ExtValue, HeleneError, Payload, NO_CHANNEL};
    pub use helene_server::prelude::*;

    #[cfg(feature = "auth")]
    pub use crate::auth::jwt_auth_fn;
}
