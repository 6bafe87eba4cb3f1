use helene_core::wire::ExtValue;

/// One chat message, kept in memory for the lifetime of the room (durable
/// persistence is out of scope — there is no database behind this demo).
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: u64,
    pub room: String,
    pub username: String,
    pub text: String,
}

impl StoredMessage {
    pub fn to_ext_value(&self) -> ExtValue {
        ExtValue::Object(vec![
            ("id".into(), ExtValue::Number(self.id as f64)),
            ("room".into(), ExtValue::String(self.room.clone())),
            ("username".into(), ExtValue::String(self.username.clone())),
            ("text".into(), ExtValue::String(self.text.clone())),
        ])
    }
}
