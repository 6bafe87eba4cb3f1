//! Built-in RPC methods (§4.10): `login`, `logout`, `subscribe`,
//! `unsubscribe`, `list`, `keepAlive`, `eventProbe` registered as ordinary
//! `MethodRegistry` entries rather than special-cased dispatch. `setup` is
//! internal bootstrap and has no registry entry — it is emitted directly by
//! the transport layer once a node is constructed.

use std::sync::{Arc, OnceLock, Weak};

use helene_core::error::HeleneError;
use helene_core::payload::NO_CHANNEL;
use helene_core::wire::ExtValue;

use crate::auth::{AuthHooks, ChannelAuthzFn};
use crate::events::EventRegistry;
use crate::methods::{MethodOptions, MethodRegistry};
use crate::server::Server;

fn params_array(params: &ExtValue, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(ExtValue::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn params_channel(params: &ExtValue) -> String {
    params
        .get("channel")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| NO_CHANNEL.to_string())
}

fn admission_to_ext(admission: std::collections::HashMap<String, bool>) -> ExtValue {
    ExtValue::Object(admission.into_iter().map(|(k, v)| (k, ExtValue::Bool(v))).collect())
}

/// Register every built-in method named in §4.10 against `methods`.
/// `events`/`channel_authz` back `subscribe`/`unsubscribe`; `auth` backs
/// `login`/`logout`; `methods` itself is cloned into `list`'s closure so it
/// can answer after further methods are registered by the caller.
/// `server_handle` is filled in by [`crate::server::ServerBuilder::build`]
/// once `Server` exists, so `subscribe` can trigger bus ingress (§4.8) on an
/// admitted `clusterWide` subscription without `Server` existing yet at
/// registration time.
pub fn register_builtins(
    methods: &Arc<MethodRegistry>,
    events: Arc<EventRegistry>,
    channel_authz: Option<ChannelAuthzFn>,
    auth: AuthHooks,
    server_handle: Arc<OnceLock<Weak<Server>>>,
) {
    {
        let events = events.clone();
        let channel_authz = channel_authz.clone();
        let server_handle = server_handle.clone();
        methods.register(
            "subscribe",
            Arc::new(move |node, params| {
                let events = events.clone();
                let channel_authz = channel_authz.clone();
                let server_handle = server_handle.clone();
                Box::pin(async move {
                    let names = params_array(&params, "events");
                    let channel = params_channel(&params);
                    let admission = events.subscribe(node, &names, &channel, channel_authz.as_deref()).await;

                    if let Some(server) = server_handle.get().and_then(Weak::upgrade) {
                        for (name, admitted) in &admission {
                            if *admitted && events.is_cluster_wide(name) {
                                server.ensure_bus_ingress(&channel, name);
                            }
                        }
                    }

                    Ok(admission_to_ext(admission))
                })
            }),
            MethodOptions::new(),
        );
    }

    {
        let events = events.clone();
        methods.register(
            "unsubscribe",
            Arc::new(move |node, params| {
                let events = events.clone();
                Box::pin(async move {
                    let names = params_array(&params, "events");
                    let channel = params_channel(&params);
                    let admission = events.unsubscribe(&node, &names, &channel);
                    Ok(admission_to_ext(admission))
                })
            }),
            MethodOptions::new(),
        );
    }

    {
        let methods_ref = methods.clone();
        methods.register(
            "list",
            Arc::new(move |_node, _params| {
                let methods_ref = methods_ref.clone();
                Box::pin(async move {
                    let names = methods_ref.names().into_iter().map(ExtValue::String).collect();
                    Ok(ExtValue::Array(names))
                })
            }),
            MethodOptions::new(),
        );
    }

    methods.register(
        "keepAlive",
        Arc::new(move |node, _params| {
            Box::pin(async move {
                node.touch();
                tracing::info!(node_id = %node.id, observation = "KEEP_ALIVE");
                Ok(ExtValue::Bool(true))
            })
        }),
        MethodOptions::new(),
    );

    methods.register(
        "eventProbe",
        Arc::new(move |node, _params| {
            Box::pin(async move {
                node.send_event("eventProbe", Some(ExtValue::Bool(true)), NO_CHANNEL);
                Ok(ExtValue::Bool(true))
            })
        }),
        MethodOptions::new(),
    );

    if let Some(login_fn) = auth.login_fn.clone() {
        let auth_fn = auth.auth_fn.clone();
        methods.register(
            "login",
            Arc::new(move |node, params| {
                let login_fn = login_fn.clone();
                let auth_fn = auth_fn.clone();
                Box::pin(async move {
                    let context = login_fn(node.clone(), params).await?;
                    node.authenticate(context).await;
                    if let Some(auth_fn) = auth_fn {
                        let token = node.user_id().await;
                        if let Some(refined) = auth_fn(token).await {
                            node.authenticate(refined).await;
                        }
                    }
                    Ok(ExtValue::Bool(node.is_authenticated().await))
                })
            }),
            MethodOptions::new(),
        );
    } else {
        methods.register(
            "login",
            Arc::new(|_node, _params| {
                Box::pin(async { Err(HeleneError::AuthenticationFailed("no loginFn configured".to_string())) })
            }),
            MethodOptions::new(),
        );
    }

    methods.register(
        "logout",
        Arc::new(|node, _params| {
            Box::pin(async move {
                node.logout().await;
                Ok(ExtValue::Bool(true))
            })
        }),
        MethodOptions::new().protected(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ClientNode, TransportKind};
    use std::time::Duration;

    fn test_auth() -> AuthHooks {
        AuthHooks {
            auth_fn: None,
            login_fn: Some(Arc::new(|_node, params| {
                Box::pin(async move {
                    let name = params.get("username").and_then(|v| v.as_str()).unwrap_or("anon").to_string();
                    Ok(ExtValue::Object(vec![(
                        "user".into(),
                        ExtValue::Object(vec![("_id".into(), ExtValue::String(name))]),
                    )]))
                })
            })),
            channel_authz: None,
        }
    }

    #[tokio::test]
    async fn login_then_logout_flow() {
        let methods = Arc::new(MethodRegistry::new(100));
        let events = Arc::new(EventRegistry::new());
        register_builtins(&methods, events, None, test_auth(), Arc::new(OnceLock::new()));

        let (node, _rx) = ClientNode::new(TransportKind::Socket, None, None);
        let params = ExtValue::Object(vec![("username".into(), ExtValue::String("alice".into()))]);
        let ok = methods.call(node.clone(), "login", params).await.unwrap();
        assert_eq!(ok, ExtValue::Bool(true));
        assert!(node.is_authenticated().await);

        let result = methods.call(node.clone(), "logout", ExtValue::Null).await.unwrap();
        assert_eq!(result, ExtValue::Bool(true));
        assert!(!node.is_authenticated().await);
    }

    #[tokio::test]
    async fn logout_requires_authentication_first() {
        let methods = Arc::new(MethodRegistry::new(100));
        let events = Arc::new(EventRegistry::new());
        register_builtins(&methods, events, None, test_auth(), Arc::new(OnceLock::new()));

        let (node, _rx) = ClientNode::new(TransportKind::Socket, None, None);
        let err = methods.call(node, "logout", ExtValue::Null).await.unwrap_err();
        assert_eq!(err.code(), helene_core::error::ErrorCode::MethodForbidden);
    }

    #[tokio::test]
    async fn subscribe_and_list_builtins() {
        let methods = Arc::new(MethodRegistry::new(100));
        let events = Arc::new(EventRegistry::new());
        events.add_event("tick", crate::events::EventOptions::new());
        register_builtins(&methods, events, None, test_auth(), Arc::new(OnceLock::new()));

        let (node, _rx) = ClientNode::new(TransportKind::Socket, None, None);
        let params = ExtValue::Object(vec![(
            "events".into(),
            ExtValue::Array(vec![ExtValue::String("tick".into())]),
        )]);
        let result = methods.call(node, "subscribe", params).await.unwrap();
        assert_eq!(result.get("tick"), Some(ExtValue::Bool(true)).as_ref());

        let (node2, _rx2) = ClientNode::new(TransportKind::Socket, None, None);
        let names = methods.call(node2, "list", ExtValue::Null).await.unwrap();
        let ExtValue::Array(names) = names else { panic!("expected array") };
        assert!(names.contains(&ExtValue::String("subscribe".into())));
        assert!(names.contains(&ExtValue::String("keepAlive".into())));
    }

    #[tokio::test]
    async fn keep_alive_touches_and_returns_true() {
        let methods = Arc::new(MethodRegistry::new(100));
        let events = Arc::new(EventRegistry::new());
        register_builtins(&methods, events, None, test_auth(), Arc::new(OnceLock::new()));

        let (node, _rx) = ClientNode::new(TransportKind::Socket, None, None);
        let before = node.last_inbound_at_ms();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = methods.call(node.clone(), "keepAlive", ExtValue::Null).await.unwrap();
        assert_eq!(result, ExtValue::Bool(true));
        assert!(node.last_inbound_at_ms() >= before);
    }
}
