//! Wire format of the live chat socket. Server events are tagged by `type`; chat broadcasts are
//! sent untagged as a bare [`ChatMessage`].

use serde::{Deserialize, Serialize};

use crate::models::ChatMessage;

/// Client -> server chat submission. Both fields are optional here so a missing `content`
/// is reported as a validation error rather than a parse error.
#[derive(Debug, Deserialize)]
pub struct ChatSubmit {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
}

/// Only the `type` of an inbound frame, used to pick out keepalive pings.
#[derive(Deserialize)]
pub struct InboundKind {
    #[serde(rename = "type")]
    pub type_: Option<String>,
}

pub const PONG_JSON: &str = r#"{"type":"pong"}"#;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent<'a> {
    UserJoined {
        username: &'a str,
        users: &'a [String],
    },
    UserLeft {
        username: &'a str,
        users: &'a [String],
    },
    OnlineUsers {
        users: &'a [String],
        #[serde(rename = "newUser", skip_serializing_if = "Option::is_none")]
        new_user: Option<&'a str>,
    },
    RecentMessages {
        messages: &'a [ChatMessage],
    },
    Error {
        message: &'a str,
    },
}

impl ServerEvent<'_> {
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self)
            .map_err(|e| tracing::error!("encode server event: {:?}", e))
            .ok()
    }
}

pub fn chat_json(message: &ChatMessage) -> Option<String> {
    serde_json::to_string(message)
        .map_err(|e| tracing::error!("encode chat message: {:?}", e))
        .ok()
}
