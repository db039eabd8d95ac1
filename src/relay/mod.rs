//! The relay pipeline: loader, publisher and remover wired together.
//!
//! Three supervised tasks share one cancellation token. Shutdown joins the
//! loader and publisher first; the publisher dropping its sender is what
//! lets the remover drain its queue and exit, so the remover is joined last
//! and every delivered ticket still gets removed from disk.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::broker::{AliasResolver, BrokerConnector, DestinationSet};
use crate::channel::BoundedChannel;
use crate::config::PipelineSettings;
use crate::dirq::DirQueue;

mod loader;
mod publisher;
mod remover;
mod task;

#[cfg(test)]
mod tests;

pub use loader::Loader;
pub use publisher::{Publisher, PublisherSettings};
pub use remover::Remover;
pub use task::{DeliveryState, DeliveryTask};

/// Handle to the three running pipeline tasks.
pub struct Relay {
    stop: CancellationToken,
    loader: JoinHandle<()>,
    publisher: JoinHandle<()>,
    remover: JoinHandle<()>,
}

impl Relay {
    /// Spawns the pipeline over `queue`.
    pub fn start(
        queue: Arc<DirQueue>,
        connector: Box<dyn BrokerConnector>,
        resolver: Box<dyn AliasResolver>,
        destinations: DestinationSet,
        settings: PublisherSettings,
        pipeline: &PipelineSettings,
        stop: CancellationToken,
    ) -> Relay {
        let channel = Arc::new(BoundedChannel::new(pipeline.channel_capacity, stop.clone()));
        let (remover_tx, remover_rx) = mpsc::unbounded_channel();

        let loader = Loader::new(
            Arc::clone(&queue),
            Arc::clone(&channel),
            pipeline.batch_size,
            stop.clone(),
        );
        let publisher = Publisher::new(
            channel,
            connector,
            resolver,
            destinations,
            settings,
            remover_tx,
            stop.clone(),
        );
        let remover = Remover::new(queue, remover_rx);

        Relay {
            stop,
            loader: tokio::spawn(loader.run()),
            publisher: tokio::spawn(publisher.run()),
            remover: tokio::spawn(remover.run()),
        }
    }

    /// Requests a stop and waits for all three tasks.
    pub async fn shutdown(self) {
        self.stop.cancel();
        if let Err(error) = self.loader.await {
            error!(%error, "loader task panicked");
        }
        if let Err(error) = self.publisher.await {
            error!(%error, "publisher task panicked");
        }
        if let Err(error) = self.remover.await {
            error!(%error, "remover task panicked");
        }
    }
}
