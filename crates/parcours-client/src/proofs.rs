//! Offline proof queue.
//!
//! Proofs submitted while offline (or whose write fails) are kept in the
//! local store under a provisional id and shown ahead of the confirmed list.
//! When connectivity returns, [`ProofQueue::reconcile`] replays them one by
//! one, in submission order, removing each entry as soon as the server has
//! accepted it.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use parcours_shared::{Proof, ProofDraft, ProofId, UserId};
use parcours_store::{Database, PendingProof};

use crate::api::ProofApi;
use crate::error::ClientError;

/// Result of [`ProofQueue::submit_proof`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted by the server.
    Submitted(Proof),
    /// Stored locally, to be replayed by [`ProofQueue::reconcile`].
    Queued(Proof),
}

impl SubmitOutcome {
    pub fn proof(&self) -> &Proof {
        match self {
            SubmitOutcome::Submitted(p) | SubmitOutcome::Queued(p) => p,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedProof {
    pub provisional_id: ProofId,
    pub proof: Proof,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub confirmed: Vec<ConfirmedProof>,
    /// Entries left in the queue after a failed replay.
    pub failed: Vec<ProofId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.failed.is_empty()
    }
}

pub struct ProofQueue<A> {
    api: A,
    db: Arc<Mutex<Database>>,
    user_id: UserId,
    organization_id: String,
    online: bool,
    pending: Vec<PendingProof>,
    confirmed: Vec<Proof>,
    merged: Vec<Proof>,
}

impl<A> ProofQueue<A>
where
    A: ProofApi,
{
    /// Build the queue and load the user's pending entries from the store.
    pub fn new(
        api: A,
        db: Arc<Mutex<Database>>,
        user_id: UserId,
        organization_id: impl Into<String>,
        online: bool,
    ) -> Result<Self, ClientError> {
        let mut queue = Self {
            api,
            db,
            user_id,
            organization_id: organization_id.into(),
            online,
            pending: Vec::new(),
            confirmed: Vec::new(),
            merged: Vec::new(),
        };
        queue.reload_pending()?;
        info!(pending = queue.pending.len(), "proof queue loaded");
        Ok(queue)
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn pending(&self) -> &[PendingProof] {
        &self.pending
    }

    pub fn confirmed(&self) -> &[Proof] {
        &self.confirmed
    }

    /// Pending entries first, in submission order, then the confirmed list.
    pub fn merged(&self) -> &[Proof] {
        &self.merged
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Submit a proof, queueing it locally when offline or when the write
    /// fails.
    pub async fn submit_proof(&mut self, draft: ProofDraft) -> Result<SubmitOutcome, ClientError> {
        draft.validate()?;

        if self.online {
            match self.api.create_proof(&self.organization_id, &draft).await {
                Ok(proof) => {
                    info!(id = %proof.id, "proof submitted");
                    self.accept_confirmed(proof.clone());
                    self.refresh_confirmed().await?;
                    return Ok(SubmitOutcome::Submitted(proof));
                }
                Err(e) => {
                    warn!(error = %e, transient = e.is_transient(), "proof write failed, queueing it");
                }
            }
        }

        let proof = draft.into_offline_proof();
        self.with_db(|db, user| db.insert_pending_proof(user, &proof))?;
        info!(id = %proof.id, "proof queued offline");

        self.reload_pending()?;
        Ok(SubmitOutcome::Queued(proof))
    }

    /// Replay every pending entry against the server, oldest first.
    ///
    /// Each accepted entry leaves the store immediately, so an interruption
    /// never replays an already confirmed proof. Failed entries stay queued
    /// with their attempt count bumped. Does nothing while offline.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport, ClientError> {
        let mut report = ReconcileReport::default();
        if !self.online {
            debug!("offline, reconciliation skipped");
            return Ok(report);
        }

        let entries = self.with_db(|db, user| db.list_pending_proofs(user))?;
        if entries.is_empty() {
            return Ok(report);
        }
        info!(count = entries.len(), "reconciling offline proofs");

        for entry in entries {
            let provisional_id = entry.proof.id.clone();
            match self
                .api
                .create_proof(&self.organization_id, &entry.proof.to_draft())
                .await
            {
                Ok(proof) => {
                    self.with_db(|db, user| db.remove_pending_proof(user, &provisional_id))?;
                    debug!(provisional = %provisional_id, id = %proof.id, "offline proof confirmed");
                    self.pending.retain(|p| p.proof.id != provisional_id);
                    self.accept_confirmed(proof.clone());
                    report.confirmed.push(ConfirmedProof {
                        provisional_id,
                        proof,
                    });
                }
                Err(e) => {
                    warn!(provisional = %provisional_id, error = %e, "offline proof replay failed");
                    let message = e.to_string();
                    self.with_db(|db, user| db.record_pending_failure(user, &provisional_id, &message))?;
                    report.failed.push(provisional_id);
                }
            }
        }

        info!(
            confirmed = report.confirmed.len(),
            failed = report.failed.len(),
            "reconciliation finished"
        );
        self.refresh_confirmed().await?;
        Ok(report)
    }

    /// Reload the confirmed list from the server and the pending list from
    /// the store. A failed fetch keeps the previous confirmed list; store
    /// errors are returned.
    pub async fn refresh_confirmed(&mut self) -> Result<(), ClientError> {
        match self.api.list_proofs().await {
            Ok(proofs) => self.confirmed = proofs,
            Err(e) => warn!(error = %e, "failed to fetch proofs, keeping the cached list"),
        }
        self.reload_pending()
    }

    /// Record the current connectivity. Going from offline to online
    /// triggers a reconciliation, whose report is returned.
    pub async fn set_online(&mut self, online: bool) -> Result<Option<ReconcileReport>, ClientError> {
        let was_online = std::mem::replace(&mut self.online, online);
        if online && !was_online {
            return self.reconcile().await.map(Some);
        }
        Ok(None)
    }

    /// Apply connectivity changes until the sender goes away.
    pub async fn follow_connectivity(
        &mut self,
        mut rx: watch::Receiver<bool>,
    ) -> Result<(), ClientError> {
        let online = *rx.borrow_and_update();
        self.set_online(online).await?;

        while rx.changed().await.is_ok() {
            let online = *rx.borrow_and_update();
            self.set_online(online).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn with_db<T>(
        &self,
        f: impl FnOnce(&Database, &UserId) -> parcours_store::Result<T>,
    ) -> Result<T, ClientError> {
        let db = self
            .db
            .lock()
            .map_err(|e| ClientError::LockPoisoned(e.to_string()))?;
        Ok(f(&*db, &self.user_id)?)
    }

    fn reload_pending(&mut self) -> Result<(), ClientError> {
        self.pending = self.with_db(|db, user| db.list_pending_proofs(user))?;
        self.rebuild_merged();
        Ok(())
    }

    /// Show a server-accepted proof right away, before the next listing.
    fn accept_confirmed(&mut self, proof: Proof) {
        if !self.confirmed.iter().any(|p| p.id == proof.id) {
            self.confirmed.insert(0, proof);
        }
        self.rebuild_merged();
    }

    fn rebuild_merged(&mut self) {
        self.merged = self
            .pending
            .iter()
            .map(|p| p.proof.clone())
            .chain(self.confirmed.iter().cloned())
            .collect();
    }
}
