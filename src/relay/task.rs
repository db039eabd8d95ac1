//! Per-message delivery bookkeeping.

use crate::types::{PreparedMessage, Ticket};

/// Where a message is in its delivery lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Waiting for a send attempt.
    Ready,
    /// A send attempt is in flight.
    Sending,
    /// The broker acknowledged the message; safe to remove from disk.
    Delivered,
    /// The last attempt was rejected; goes back to Ready for another broker.
    Failed,
}

/// One message owned by the publisher's working set.
///
/// A task lives in exactly one collection at a time: the working set, then
/// the delivered batch handed to the remover.
#[derive(Debug)]
pub struct DeliveryTask {
    pub ticket: Ticket,
    pub message: PreparedMessage,
    pub state: DeliveryState,
}

impl DeliveryTask {
    pub fn new(ticket: Ticket, message: PreparedMessage) -> Self {
        DeliveryTask {
            ticket,
            message,
            state: DeliveryState::Ready,
        }
    }
}
