use std::sync::Arc;

use helene_core::error::HeleneError;
use helene_core::wire::ExtValue;
use helene_server::{ClientNode, Handler, MethodOptions, Server};

use crate::models::StoredMessage;
use crate::services::ChatService;

/// Registers `sendMessage`/`getHistory`/`listRooms` on an already-built
/// server. Done here rather than via `ServerBuilder::method` because
/// `sendMessage` needs to call back into the server to emit — and the
/// server doesn't exist yet at `ServerBuilder` time.
pub fn register_methods(server: &Arc<Server>, chat: ChatService) {
    server.methods.register("sendMessage", send_message(server, chat.clone()), MethodOptions::new());
    server.methods.register("getHistory", get_history(chat.clone()), MethodOptions::new());
    server.methods.register("listRooms", list_rooms(chat), MethodOptions::new());
}

fn required_str<'a>(params: &'a ExtValue, field: &str, method: &str) -> Result<&'a str, HeleneError> {
    params
        .get(field)
        .and_then(ExtValue::as_str)
        .ok_or_else(|| HeleneError::InvalidParams(format!("{method} requires \"{field}\"")))
}

/// Holds a `Weak<Server>`, not `Arc<Server>` — this handler is itself stored
/// inside `server.methods`, so a strong reference back would leak the server.
fn send_message(server: &Arc<Server>, chat: ChatService) -> Handler {
    let server = Arc::downgrade(server);
    Arc::new(move |_node: Arc<ClientNode>, params: ExtValue| {
        let server = server.clone();
        let chat = chat.clone();
        Box::pin(async move {
            let room = required_str(&params, "room", "sendMessage")?.to_string();
            let username = required_str(&params, "username", "sendMessage")?.to_string();
            let text = required_str(&params, "text", "sendMessage")?.to_string();

            let message = chat.save_message(&room, &username, &text);
            if let Some(server) = server.upgrade() {
                server.emit("message", Some(message.to_ext_value()), Some(&room)).await;
            }
            Ok(ExtValue::Bool(true))
        })
    })
}

fn get_history(chat: ChatService) -> Handler {
    Arc::new(move |_node, params| {
        let chat = chat.clone();
        Box::pin(async move {
            let room = required_str(&params, "room", "getHistory")?.to_string();
            let limit = params
                .get("limit")
                .and_then(ExtValue::as_f64)
                .map(|n| n as usize)
                .unwrap_or(50);

            let history = chat.get_history(&room, limit);
            Ok(ExtValue::Array(history.iter().map(StoredMessage::to_ext_value).collect()))
        })
    })
}

fn list_rooms(chat: ChatService) -> Handler {
    Arc::new(move |_node, _params| {
        let chat = chat.clone();
        Box::pin(async move { Ok(ExtValue::Array(chat.list_rooms().into_iter().map(ExtValue::String).collect())) })
    })
}
