use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::PROVISIONAL_PROOF_PREFIX;

// Server-side user identifier (opaque string, e.g. a cuid)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a proof of learning.
///
/// Either the id assigned by the server, or a provisional id generated
/// locally while the proof only exists in the pending store. Provisional ids
/// carry the [`PROVISIONAL_PROOF_PREFIX`] prefix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ProofId(pub String);

impl ProofId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh provisional id (`offline-<uuid>`).
    pub fn provisional() -> Self {
        Self(format!("{PROVISIONAL_PROOF_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PROOF_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProofId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Client-side id of an outbound message that the server has not confirmed yet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LocalMessageId(pub Uuid);

impl LocalMessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalMessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LocalMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Organization administrator.
    Admin,
    Coach,
    /// Candidate preparing TEF or TCF.
    Student,
}
