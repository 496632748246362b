//! Records exchanged with the backend.
//!
//! Field names follow the backend's JSON (camelCase). Every record derives
//! `Serialize` and `Deserialize` so it can be cached locally or handed to a
//! UI layer unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MESSAGE_TYPE_TEXT;
use crate::error::SharedError;
use crate::types::{MessageId, ProofId, Role, UserId};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Summary of the thread between the current user and one counterpart.
///
/// A conversation has no id of its own: it is identified by the
/// counterpart's [`UserId`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// The other participant.
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    /// CEFR level (A1..C2) when the counterpart is a candidate.
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_from_me: bool,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A message as stored by the server. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    #[serde(rename = "type", default = "default_message_type")]
    pub message_type: String,
    pub created_at: DateTime<Utc>,
    /// Direction relative to the user who fetched the record.
    #[serde(default)]
    pub is_from_me: bool,
    #[serde(default)]
    pub is_read: bool,
}

fn default_message_type() -> String {
    MESSAGE_TYPE_TEXT.to_string()
}

impl Message {
    /// The participant of this message that is not `me`.
    pub fn counterpart(&self, me: &UserId) -> &UserId {
        if &self.sender_id == me {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    /// Whether the message belongs to the conversation between `me` and `other`.
    pub fn involves(&self, me: &UserId, other: &UserId) -> bool {
        (&self.sender_id == me && &self.receiver_id == other)
            || (&self.sender_id == other && &self.receiver_id == me)
    }
}

/// Ephemeral "is typing" indicator. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    /// Who is typing.
    pub user_id: UserId,
    pub is_typing: bool,
}

// ---------------------------------------------------------------------------
// Proof
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofStatus {
    /// Accepted by the server, awaiting human validation.
    Pending,
    Validated,
    Rejected,
    /// Recorded locally only; the server has not acknowledged it.
    Offline,
}

impl ProofStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofStatus::Pending => "PENDING",
            ProofStatus::Validated => "VALIDATED",
            ProofStatus::Rejected => "REJECTED",
            ProofStatus::Offline => "OFFLINE",
        }
    }
}

/// A proof of learning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    pub id: ProofId,
    pub title: String,
    /// Skill tag, e.g. `ORAL`, `ECRIT`, `GRAMMAIRE`.
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub status: ProofStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachment_url: Option<String>,
}

impl Proof {
    pub fn is_offline(&self) -> bool {
        self.status == ProofStatus::Offline
    }

    /// The fields needed to replay this proof against the server.
    pub fn to_draft(&self) -> ProofDraft {
        ProofDraft {
            title: self.title.clone(),
            category: self.category.clone(),
            description: self.description.clone(),
            attachment_url: self.attachment_url.clone(),
        }
    }
}

/// What the user fills in before submitting a proof.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProofDraft {
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attachment_url: Option<String>,
}

impl ProofDraft {
    pub fn new(title: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            category: category.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Only the title is mandatory.
    pub fn validate(&self) -> Result<(), SharedError> {
        if self.title.trim().is_empty() {
            return Err(SharedError::validation("title", "a title is required"));
        }
        Ok(())
    }

    /// Turn the draft into a locally held proof with a provisional id and
    /// status [`ProofStatus::Offline`].
    pub fn into_offline_proof(self) -> Proof {
        Proof {
            id: ProofId::provisional(),
            title: self.title,
            category: self.category,
            description: self.description,
            status: ProofStatus::Offline,
            created_at: Utc::now(),
            attachment_url: self.attachment_url,
        }
    }
}
