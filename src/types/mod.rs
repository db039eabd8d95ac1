//! Core domain types for the relay pipeline.

mod ids;
mod message;

pub use ids::Ticket;
pub use message::{MessageKind, PrepareError, PreparedMessage, RelayMessage};
