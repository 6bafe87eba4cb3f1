use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::models::StoredMessage;

/// In-memory room history, keyed by room name. Stands in for the teacher's
/// `sqlx`-backed store — this demo has no durable persistence.
#[derive(Clone, Default)]
pub struct ChatService {
    rooms: Arc<DashMap<String, Vec<StoredMessage>>>,
    next_id: Arc<AtomicU64>,
}

impl ChatService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_message(&self, room: &str, username: &str, text: &str) -> StoredMessage {
        let message = StoredMessage {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            room: room.to_string(),
            username: username.to_string(),
            text: text.to_string(),
        };
        self.rooms.entry(room.to_string()).or_default().push(message.clone());
        message
    }

    pub fn get_history(&self, room: &str, limit: usize) -> Vec<StoredMessage> {
        self.rooms
            .get(room)
            .map(|messages| {
                let start = messages.len().saturating_sub(limit);
                messages[start..].to_vec()
            })
            .unwrap_or_default()
    }

    pub fn list_rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.rooms.iter().map(|entry| entry.key().clone()).collect();
        rooms.sort();
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_respects_limit_and_order() {
        let chat = ChatService::new();
        chat.save_message("general", "a", "hi");
        chat.save_message("general", "b", "hey");
        chat.save_message("general", "a", "how's it going");

        let history = chat.get_history("general", 2);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "hey");
        assert_eq!(history[1].text, "how's it going");
    }

    #[test]
    fn list_rooms_is_sorted_and_deduped() {
        let chat = ChatService::new();
        chat.save_message("b-room", "a", "hi");
        chat.save_message("a-room", "a", "hi");
        chat.save_message("b-room", "a", "hi again");

        assert_eq!(chat.list_rooms(), vec!["a-room".to_string(), "b-room".to_string()]);
    }
}
