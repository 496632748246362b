//! # parcours-shared
//!
//! Types shared by the Parcours client crates: identifiers, the records
//! exchanged with the backend (conversations, messages, proofs), and the
//! live-channel event protocol.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::SharedError;
pub use models::*;
pub use protocol::{ClientEvent, LiveEvent};
pub use types::*;
