//! Client side of the Parcours coaching platform: conversation sync over a
//! live channel and an offline queue for proofs of learning.

pub mod api;
pub mod config;
pub mod connectivity;
pub mod conversations;
pub mod error;
pub mod live;
pub mod proofs;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ConversationApi, HttpApi, ProofApi};
pub use config::ClientConfig;
pub use connectivity::{Connectivity, HealthCheckHandle};
pub use conversations::{ConversationSync, DeliveryState, OutboundMessage, TimelineEntry};
pub use error::ClientError;
pub use live::{LiveChannel, LiveRemote};
pub use proofs::{ConfirmedProof, ProofQueue, ReconcileReport, SubmitOutcome};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parcours_client=debug,parcours_store=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
