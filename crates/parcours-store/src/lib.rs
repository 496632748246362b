//! # parcours-store
//!
//! Local persistent storage for the Parcours client, backed by SQLite.
//!
//! The store holds what must survive a restart while the backend is
//! unreachable: proofs of learning recorded offline and not yet
//! acknowledged by the server. Entries live in an indexed table keyed by
//! their provisional id and scoped per user, so a replay can remove each
//! confirmed entry on its own.

pub mod database;
pub mod migrations;
pub mod models;
pub mod pending_proofs;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
