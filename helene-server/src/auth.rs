//! Authentication hooks (§4.7): `authFn`/`loginFn`/`channelAuthz` are boxed
//! `dyn Fn` trait objects stored on `Server`, not a generic type parameter —
//! SPEC_FULL.md §9 settles this Open Question in favour of the simpler
//! runtime-composable shape, matching how `helene-auth`'s token validators
//! are meant to be plugged in by a caller rather than baked into the type.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use helene_core::error::HeleneError;
use helene_core::wire::ExtValue;

use crate::node::ClientNode;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Validates a bearer credential extracted from the transport handshake
/// (`?token=` query param or `Authorization` header) and returns the
/// context to install on the node if valid. Runs once per connection,
/// before SETUP, when present (§4.7 "ambient" authentication).
pub type AuthFn = Arc<dyn Fn(Option<String>) -> BoxFuture<'static, Option<ExtValue>> + Send + Sync>;

/// Backs the built-in `login` method (§4.10): takes the caller-supplied
/// params and returns the context to install, or an error to report back
/// as a wire `ERROR`.
pub type LoginFn =
    Arc<dyn Fn(Arc<ClientNode>, ExtValue) -> BoxFuture<'static, Result<ExtValue, HeleneError>> + Send + Sync>;

/// Gates `subscribe`/`unsubscribe` against a channel name (§4.6).
pub type ChannelAuthzFn =
    Arc<dyn Fn(Arc<ClientNode>, String) -> BoxFuture<'static, bool> + Send + Sync>;

/// The optional authentication surface installed on a `Server` (§4.7).
/// Absent fields fall back to permissive defaults: no ambient auth, no
/// channel gating, and a `login` method that always fails closed until a
/// `loginFn` is supplied.
#[derive(Clone, Default)]
pub struct AuthHooks {
    pub auth_fn: Option<AuthFn>,
    pub login_fn: Option<LoginFn>,
    pub channel_authz: Option<ChannelAuthzFn>,
}
