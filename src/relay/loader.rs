//! Disk-to-memory stage: scans the monitoring queue and batches new entries
//! into the bounded channel.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::channel::BoundedChannel;
use crate::dirq::DirQueue;
use crate::types::{RelayMessage, Ticket};

/// Pause between queue scans.
const SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// Queued batches above which the loader waits for the publisher to catch up
/// before pushing more.
const DRAIN_THRESHOLD: usize = 10;

pub struct Loader {
    queue: Arc<DirQueue>,
    channel: Arc<BoundedChannel<Vec<RelayMessage>>>,
    batch_size: usize,
    /// Highest ticket visited so far. In-memory only: a restart rescans the
    /// queue from the start, which at-least-once delivery tolerates.
    checkpoint: Ticket,
    stop: CancellationToken,
}

impl Loader {
    pub fn new(
        queue: Arc<DirQueue>,
        channel: Arc<BoundedChannel<Vec<RelayMessage>>>,
        batch_size: usize,
        stop: CancellationToken,
    ) -> Self {
        Loader {
            queue,
            channel,
            batch_size,
            checkpoint: Ticket::lowest(),
            stop,
        }
    }

    pub async fn run(mut self) {
        loop {
            if let Err(error) = self.scan().await {
                error!(%error, "monitoring queue scan failed");
            }

            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(SCAN_INTERVAL) => {}
            }

            match self.queue.purge() {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "purged empty queue shards"),
                Err(error) => warn!(%error, "queue purge failed"),
            }
        }
        debug!("message loader exited");
    }

    /// One pass over the queue, loading everything past the checkpoint.
    async fn scan(&mut self) -> crate::dirq::Result<()> {
        let mut batch: Vec<RelayMessage> = Vec::new();

        for ticket in self.queue.entries()? {
            if self.stop.is_cancelled() {
                return Ok(());
            }
            if ticket <= self.checkpoint {
                continue;
            }

            if batch.len() >= self.batch_size {
                if self.channel.len() > DRAIN_THRESHOLD {
                    self.channel.drain().await;
                }
                self.channel.push(std::mem::take(&mut batch));
            }

            // A lock left behind by a dead process is stolen once; if the
            // entry cannot be locked even then, another consumer owns the
            // queue and the scan stops here.
            if !self.queue.lock(&ticket).unwrap_or(false) {
                let stolen = self.queue.unlock(&ticket).unwrap_or(false)
                    && self.queue.lock(&ticket).unwrap_or(false);
                if !stolen {
                    break;
                }
            }

            match self.queue.read(&ticket) {
                Ok(payload) => {
                    batch.push(RelayMessage::new(
                        ticket.clone(),
                        String::from_utf8_lossy(&payload).into_owned(),
                    ));
                }
                Err(error) => {
                    error!(ticket = %ticket, %error, "could not load message");
                }
            }

            // The checkpoint advances even when the payload could not be
            // read; this process never revisits the entry.
            self.checkpoint = ticket.clone();

            if !self.queue.unlock(&ticket).unwrap_or(false) {
                break;
            }
        }

        if !batch.is_empty() {
            self.channel.push(batch);
        }
        Ok(())
    }
}
