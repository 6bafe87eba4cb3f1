//! Payload schema (§4.2): the five frame shapes exchanged on every
//! transport, each optionally carrying a correlation id.

use serde::{Deserialize, Serialize};

use crate::wire::ExtValue;

/// Sentinel channel name for the default/global channel (§3, §4.6).
pub const NO_CHANNEL: &str = "__no_channel__";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Payload {
    #[serde(rename = "setup")]
    Setup { id: String },

    #[serde(rename = "method")]
    Method {
        id: String,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<ExtValue>,
        #[serde(default, skip_serializing_if = "is_false")]
        void: bool,
    },

    #[serde(rename = "result")]
    Result {
        id: String,
        method: String,
        result: ExtValue,
    },

    #[serde(rename = "event")]
    Event {
        id: String,
        event: String,
        #[serde(default = "default_channel")]
        channel: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<ExtValue>,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        errors: Option<ExtValue>,
    },
}

fn default_channel() -> String {
    NO_CHANNEL.to_string()
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Payload {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("Payload always serialises")
    }

    pub fn decode(input: &str) -> Result<Self, crate::error::HeleneError> {
        serde_json::from_str(input).map_err(|e| crate::error::HeleneError::Parse(e.to_string()))
    }

    pub fn error(message: impl Into<String>, code: crate::error::ErrorCode) -> Self {
        Payload::Error {
            id: None,
            code: Some(code.as_str().to_string()),
            message: message.into(),
            stack: None,
            method: None,
            errors: None,
        }
    }

    pub fn error_for(id: &str, err: &crate::error::HeleneError, include_stack: bool) -> Self {
        Payload::Error {
            id: Some(id.to_string()),
            code: Some(err.code().as_str().to_string()),
            message: err.message(),
            stack: if include_stack { Some(format!("{err:?}")) } else { None },
            method: None,
            errors: None,
        }
    }
}
