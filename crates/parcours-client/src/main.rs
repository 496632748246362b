//! # parcours
//!
//! Headless client session: keeps the conversation list in sync over the
//! live channel and replays offline proofs whenever the backend becomes
//! reachable again. Runs until interrupted.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{info, warn};

use parcours_client::{
    ClientConfig, Connectivity, ConversationSync, HttpApi, LiveChannel, ProofApi, ProofQueue,
};
use parcours_shared::constants::APP_NAME;
use parcours_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing and configuration
    // -----------------------------------------------------------------------
    parcours_client::init_tracing();
    info!("Starting {} client v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let user_id = config
        .user_id
        .clone()
        .context("PARCOURS_USER_ID must be set")?;
    let organization_id = config
        .organization_id
        .clone()
        .context("PARCOURS_ORGANIZATION_ID must be set")?;

    // -----------------------------------------------------------------------
    // 2. Local store and backend
    // -----------------------------------------------------------------------
    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::open_default()?,
    };
    let api = HttpApi::new(&config)?;

    let connectivity = Connectivity::new(api.health().await.is_ok());
    let _health_check = connectivity.spawn_health_check(api.clone(), config.health_check_interval);
    info!(online = connectivity.is_online(), "initial connectivity");

    // -----------------------------------------------------------------------
    // 3. Services
    // -----------------------------------------------------------------------
    let mut proofs = ProofQueue::new(
        api.clone(),
        Arc::new(Mutex::new(db)),
        user_id.clone(),
        organization_id,
        connectivity.is_online(),
    )?;
    proofs.refresh_confirmed().await?;
    // Entries left over from a previous session.
    let report = proofs.reconcile().await?;
    if !report.is_empty() {
        info!(confirmed = report.confirmed.len(), failed = report.failed.len(), "startup reconciliation");
    }

    let mut chat = ConversationSync::new(api, user_id);
    chat.list_conversations().await;
    chat.attach_live(LiveChannel::connect(&config)?);
    info!(
        conversations = chat.conversations().len(),
        unread = chat.total_unread(),
        pending_proofs = proofs.pending().len(),
        "session ready"
    );

    // -----------------------------------------------------------------------
    // 4. Event loop
    // -----------------------------------------------------------------------
    let mut online_rx = connectivity.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            // Only the receive races the other arms; the event is applied
            // to completion in the arm body.
            event = chat.next_live_event(), if chat.is_live() => match event {
                Some(event) => chat.handle_event(event).await,
                None => warn!("live channel gone, continuing without live updates"),
            },
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *online_rx.borrow_and_update();
                if let Some(report) = proofs.set_online(online).await? {
                    info!(
                        confirmed = report.confirmed.len(),
                        failed = report.failed.len(),
                        "offline proofs reconciled"
                    );
                }
            }
        }
    }

    if let Some(live) = chat.detach_live() {
        live.close();
    }
    Ok(())
}
