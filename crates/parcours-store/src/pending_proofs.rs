//! CRUD operations for [`PendingProof`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parcours_shared::{Proof, ProofId, ProofStatus, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::PendingProof;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Append a proof to the user's pending list.
    pub fn insert_pending_proof(&self, user_id: &UserId, proof: &Proof) -> Result<()> {
        self.conn().execute(
            "INSERT INTO pending_proofs
                (id, user_id, title, category, description, attachment_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                proof.id.as_str(),
                user_id.as_str(),
                proof.title,
                proof.category,
                proof.description,
                proof.attachment_url,
                proof.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// List the user's pending proofs in insertion order.
    pub fn list_pending_proofs(&self, user_id: &UserId) -> Result<Vec<PendingProof>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, title, category, description, attachment_url, created_at,
                    attempts, last_error
             FROM pending_proofs
             WHERE user_id = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![user_id.as_str()], row_to_pending_proof)?;

        let mut proofs = Vec::new();
        for row in rows {
            proofs.push(row?);
        }
        Ok(proofs)
    }

    /// Fetch one pending proof.
    pub fn get_pending_proof(&self, user_id: &UserId, id: &ProofId) -> Result<PendingProof> {
        self.conn()
            .query_row(
                "SELECT id, title, category, description, attachment_url, created_at,
                        attempts, last_error
                 FROM pending_proofs
                 WHERE user_id = ?1 AND id = ?2",
                params![user_id.as_str(), id.as_str()],
                row_to_pending_proof,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn count_pending_proofs(&self, user_id: &UserId) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM pending_proofs WHERE user_id = ?1",
            params![user_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Record a failed replay: bump the attempt counter and keep the error.
    /// Returns `false` if the entry does not exist.
    pub fn record_pending_failure(
        &self,
        user_id: &UserId,
        id: &ProofId,
        error: &str,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE pending_proofs
             SET attempts = attempts + 1, last_error = ?3
             WHERE user_id = ?1 AND id = ?2",
            params![user_id.as_str(), id.as_str(), error],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Remove one entry once the server has confirmed it.  Returns `true`
    /// if a row was deleted.
    pub fn remove_pending_proof(&self, user_id: &UserId, id: &ProofId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM pending_proofs WHERE user_id = ?1 AND id = ?2",
            params![user_id.as_str(), id.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Drop every pending entry of the user.  Returns the number removed.
    pub fn clear_pending_proofs(&self, user_id: &UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM pending_proofs WHERE user_id = ?1",
            params![user_id.as_str()],
        )?;
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`PendingProof`].
fn row_to_pending_proof(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingProof> {
    let id: String = row.get(0)?;
    let title: String = row.get(1)?;
    let category: String = row.get(2)?;
    let description: String = row.get(3)?;
    let attachment_url: Option<String> = row.get(4)?;
    let created_str: String = row.get(5)?;
    let attempts: u32 = row.get(6)?;
    let last_error: Option<String> = row.get(7)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(PendingProof {
        proof: Proof {
            id: ProofId(id),
            title,
            category,
            description,
            status: ProofStatus::Offline,
            created_at,
            attachment_url,
        },
        attempts,
        last_error,
    })
}
