//! The Helene real-time RPC-plus-pub/sub server engine (§3, §4 of the
//! design): client nodes, the method and event registries, the cluster bus
//! seam, the heartbeat engine, built-in methods, and the dual-transport
//! router that wires them to `axum`.

pub mod auth;
pub mod builtins;
pub mod bus;
pub mod events;
pub mod heartbeat;
pub mod methods;
pub mod node;
pub mod router;
pub mod server;
pub mod transport;

pub use auth::{AuthFn, AuthHooks, ChannelAuthzFn, LoginFn};
pub use bus::{BusFrame, ClusterBus, NullBus};
pub use events::{EventOptions, EventRegistry};
pub use heartbeat::HeartbeatEngine;
pub use methods::{Handler, MethodOptions, MethodRegistry};
pub use node::{ClientNode, NodeState, TransportKind};
pub use server::{Server, ServerBuilder};

pub mod prelude {
    //! Re-exports of the most commonly used server types.
    pub use crate::{
        AuthFn, ChannelAuthzFn, EventOptions, Handler, LoginFn, MethodOptions, Server, ServerBuilder,
    };
    pub use helene_core::error::HeleneError;
    pub use helene_core::wire::ExtValue;
}
