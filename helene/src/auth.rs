//! Bridges `helene-auth`'s JWT/OIDC validators to the `AuthFn`/`LoginFn`
//! trait-object seam `helene-server` expects (§4.7). Lives in the facade,
//! not in `helene-auth` itself, since it needs both crates and `helene-auth`
//! must not depend on `helene-server` (the dependency would run backwards —
//! `helene-server` never depends on a concrete auth backend).

use std::sync::Arc;

use helene_auth::identity::IdentityBuilder;
use helene_auth::{AuthenticatedUser, JwtValidator};
use helene_core::wire::ExtValue;
use helene_server::auth::AuthFn;

/// Wraps `validator` as an [`AuthFn`]: a bearer token that fails validation
/// simply yields `None` (no ambient auth installed, per §4.7's non-fatal
/// failure semantics) rather than an error.
pub fn jwt_auth_fn<B>(validator: Arc<JwtValidator<B>>) -> AuthFn
where
    B: IdentityBuilder<Identity = AuthenticatedUser> + Send + Sync + 'static,
{
    Arc::new(move |token: Option<String>| {
        let validator = validator.clone();
        Box::pin(async move {
            let token = token?;
            let user = validator.validate(&token).await.ok()?;
            Some(user_to_context(&user))
        })
    })
}

/// `{"user": {"_id": sub, "email": ..., "roles": [...]}}` — the shape
/// `ClientNode::user_id`/`is_authenticated` expect (§4.7, mirrored from the
/// `authFn`/`login` test fixtures in `helene-server`).
pub fn user_to_context(user: &AuthenticatedUser) -> ExtValue {
    ExtValue::Object(vec![(
        "user".into(),
        ExtValue::Object(vec![
            ("_id".into(), ExtValue::String(user.sub.clone())),
            (
                "email".into(),
                user.email.clone().map(ExtValue::String).unwrap_or(ExtValue::Null),
            ),
            (
                "roles".into(),
                ExtValue::Array(user.roles.iter().cloned().map(ExtValue::String).collect()),
            ),
        ]),
    )])
}
