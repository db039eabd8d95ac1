//! Commit stage: deletes delivered messages from the disk queue.
//!
//! Batches arrive over an unbounded queue so the publisher never blocks on
//! disk I/O. The loop exits once the publisher drops its sender and every
//! queued batch has been processed, which is what makes a graceful shutdown
//! lose no delivered tickets.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::dirq::DirQueue;
use crate::types::Ticket;

pub struct Remover {
    queue: Arc<DirQueue>,
    rx: mpsc::UnboundedReceiver<Vec<Ticket>>,
}

impl Remover {
    pub fn new(queue: Arc<DirQueue>, rx: mpsc::UnboundedReceiver<Vec<Ticket>>) -> Self {
        Remover { queue, rx }
    }

    pub async fn run(mut self) {
        while let Some(batch) = self.rx.recv().await {
            debug!(count = batch.len(), "removing delivered messages");
            for ticket in batch {
                self.remove_one(&ticket);
            }
        }
        debug!("message remover exited");
    }

    fn remove_one(&self, ticket: &Ticket) {
        match self.queue.lock(ticket) {
            Ok(true) => {
                if let Err(error) = self.queue.remove(ticket) {
                    // Not retried: the entry will be delivered again and a
                    // later removal gets another chance.
                    error!(ticket = %ticket, %error, "failed to remove delivered message");
                }
            }
            Ok(false) => {
                // Locked by someone else, or already gone.
                debug!(ticket = %ticket, "skipping removal, entry is owned elsewhere");
            }
            Err(error) => {
                warn!(ticket = %ticket, %error, "could not lock delivered message");
            }
        }
    }
}
