//! Row types persisted in the local database.

use serde::{Deserialize, Serialize};

use parcours_shared::Proof;

// ---------------------------------------------------------------------------
// PendingProof
// ---------------------------------------------------------------------------

/// A proof recorded locally and not yet acknowledged by the server.
///
/// The embedded [`Proof`] always has a provisional id and status `OFFLINE`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingProof {
    pub proof: Proof,
    /// Number of replays that failed so far.
    pub attempts: u32,
    /// Error text of the most recent failed replay.
    pub last_error: Option<String>,
}
