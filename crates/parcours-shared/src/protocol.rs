use serde::{Deserialize, Serialize};

use crate::constants::{EVENT_NEW_MESSAGE, EVENT_TYPING, EVENT_USER_TYPING};
use crate::error::SharedError;
use crate::models::{Message, TypingSignal};
use crate::types::UserId;

/// Envelope of every live channel frame: `{"event": <name>, "data": <payload>}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Events pushed by the server over the live channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// A message was created in one of the user's conversations
    NewMessage(Message),

    /// A counterpart started or stopped typing
    UserTyping(TypingSignal),

    /// An event name this client does not know about
    Unknown(String),
}

/// Events emitted by the client over the live channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Typing indicator for the conversation with `receiver_id`
    Typing { receiver_id: UserId, is_typing: bool },
}

impl LiveEvent {
    pub fn name(&self) -> &str {
        match self {
            LiveEvent::NewMessage(_) => EVENT_NEW_MESSAGE,
            LiveEvent::UserTyping(_) => EVENT_USER_TYPING,
            LiveEvent::Unknown(name) => name,
        }
    }

    /// Decode one JSON frame.
    pub fn from_frame(text: &str) -> Result<Self, SharedError> {
        let frame: Frame = serde_json::from_str(text)?;
        match frame.event.as_str() {
            EVENT_NEW_MESSAGE => Ok(LiveEvent::NewMessage(serde_json::from_value(frame.data)?)),
            EVENT_USER_TYPING => Ok(LiveEvent::UserTyping(serde_json::from_value(frame.data)?)),
            "" => Err(SharedError::Protocol("frame without event name".into())),
            _ => Ok(LiveEvent::Unknown(frame.event)),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload<'a> {
    receiver_id: &'a UserId,
    is_typing: bool,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Typing { .. } => EVENT_TYPING,
        }
    }

    pub fn to_frame(&self) -> Result<String, SharedError> {
        let data = match self {
            ClientEvent::Typing {
                receiver_id,
                is_typing,
            } => serde_json::to_value(TypingPayload {
                receiver_id,
                is_typing: *is_typing,
            })?,
        };
        Ok(serde_json::to_string(&Frame {
            event: self.name().to_string(),
            data,
        })?)
    }
}
