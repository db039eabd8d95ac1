//! Memory-to-broker stage: prepares payloads and dispatches them round-robin
//! across the endpoint pool.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::task::{DeliveryState, DeliveryTask};
use crate::broker::{AliasResolver, BrokerConnector, DestinationSet, EndpointPool};
use crate::channel::{BoundedChannel, Wait};
use crate::types::{RelayMessage, Ticket};

/// Working-set cap; collection pauses above this many queued messages.
const COLLECT_CAP: usize = 100_000;

/// Batches pulled from the channel per loop iteration.
const MAX_BATCHES_PER_COLLECT: usize = 10;

/// Delivered tickets per batch handed to the remover.
const DELIVERED_BATCH_CAP: usize = 100;

/// Pause before retrying when no broker endpoint could be established.
const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(10);

/// How long an idle publisher waits for new messages per iteration.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Scalar settings the publisher needs from the daemon config.
pub struct PublisherSettings {
    /// Broker DNS alias to resolve and converge on.
    pub alias: String,
    /// Interval between alias re-resolutions while the pool is healthy.
    pub check_interval: Duration,
    /// Value injected as `endpnt` into every payload.
    pub endpoint: String,
    /// Local FQDN, injected when the publish-fqdn flag is on.
    pub fqdn: Option<String>,
}

pub struct Publisher {
    channel: Arc<BoundedChannel<Vec<RelayMessage>>>,
    pool: EndpointPool,
    connector: Box<dyn BrokerConnector>,
    resolver: Box<dyn AliasResolver>,
    destinations: DestinationSet,
    settings: PublisherSettings,
    tasks: VecDeque<DeliveryTask>,
    to_remove: Vec<Ticket>,
    remover_tx: mpsc::UnboundedSender<Vec<Ticket>>,
    stop: CancellationToken,
}

impl Publisher {
    pub fn new(
        channel: Arc<BoundedChannel<Vec<RelayMessage>>>,
        connector: Box<dyn BrokerConnector>,
        resolver: Box<dyn AliasResolver>,
        destinations: DestinationSet,
        settings: PublisherSettings,
        remover_tx: mpsc::UnboundedSender<Vec<Ticket>>,
        stop: CancellationToken,
    ) -> Self {
        Publisher {
            channel,
            pool: EndpointPool::new(),
            connector,
            resolver,
            destinations,
            settings,
            tasks: VecDeque::new(),
            to_remove: Vec::new(),
            remover_tx,
            stop,
        }
    }

    pub async fn run(mut self) {
        let mut last_refresh: Option<Instant> = None;

        loop {
            let refresh_due = last_refresh
                .is_none_or(|at| at.elapsed() >= self.settings.check_interval);
            if (self.pool.is_empty() || refresh_due) && !self.stop.is_cancelled() {
                if self.refresh().await {
                    last_refresh = Some(Instant::now());
                } else {
                    error!(
                        alias = %self.settings.alias,
                        retry_secs = REFRESH_RETRY_DELAY.as_secs(),
                        "no broker endpoints available, will retry"
                    );
                    tokio::select! {
                        _ = self.stop.cancelled() => {}
                        _ = tokio::time::sleep(REFRESH_RETRY_DELAY) => {}
                    }
                }
            }

            if !self.stop.is_cancelled() {
                self.collect().await;
            }
            self.dispatch().await;

            if self.stop.is_cancelled() && self.tasks.is_empty() {
                break;
            }
        }

        self.pool.close_all().await;
        debug!("broker publisher exited");
    }

    /// Re-resolves the alias and converges the pool on the result.
    async fn refresh(&mut self) -> bool {
        let hosts = match self.resolver.resolve(&self.settings.alias).await {
            Ok(hosts) if !hosts.is_empty() => hosts,
            Ok(_) => {
                error!(alias = %self.settings.alias, "alias resolved to no hosts");
                return false;
            }
            Err(error) => {
                error!(alias = %self.settings.alias, %error, "alias resolution failed");
                return false;
            }
        };
        debug!(?hosts, "resolved broker hosts");

        self.pool.refresh(&hosts, self.connector.as_ref()).await;
        if !self.pool.is_empty() {
            info!(hosts = ?self.pool.hosts(), "active broker endpoints");
            true
        } else {
            false
        }
    }

    /// Moves batches from the channel into the working set.
    async fn collect(&mut self) {
        if self.tasks.len() >= COLLECT_CAP {
            return;
        }

        for _ in 0..MAX_BATCHES_PER_COLLECT {
            let wait = if self.tasks.is_empty() {
                Wait::Timeout(IDLE_POLL)
            } else {
                Wait::NoWait
            };
            let Some(batch) = self.channel.pop(wait).await else {
                break;
            };

            for message in batch {
                if message.raw.is_empty() || message.ticket.as_str().is_empty() {
                    continue;
                }
                match message.prepare(&self.settings.endpoint, self.settings.fqdn.as_deref()) {
                    Ok(prepared) => {
                        self.tasks.push_back(DeliveryTask::new(message.ticket, prepared));
                    }
                    Err(error) => {
                        // An entry that can never be prepared would otherwise
                        // be reloaded on every restart; dispose of it like a
                        // delivered one.
                        error!(ticket = %message.ticket, %error, "dropping undeliverable message");
                        self.queue_removal(message.ticket);
                    }
                }
            }
        }
    }

    /// Walks the working set once, sending Ready tasks and retiring
    /// Delivered ones.
    async fn dispatch(&mut self) {
        let mut retained: VecDeque<DeliveryTask> = VecDeque::new();

        while let Some(mut task) = self.tasks.pop_front() {
            if task.state == DeliveryState::Ready
                && !self.pool.is_empty()
                && !self.stop.is_cancelled()
            {
                task.state = DeliveryState::Sending;
                self.attempt_send(&mut task).await;
            }

            match task.state {
                DeliveryState::Delivered => {
                    info!(
                        destination = %self.destinations.for_kind(task.message.kind).path,
                        summary = task.message.summary.as_deref().unwrap_or(""),
                        "message delivered"
                    );
                    self.queue_removal(task.ticket);
                }
                DeliveryState::Failed => {
                    error!(
                        ticket = %task.ticket,
                        destination = %self.destinations.for_kind(task.message.kind).path,
                        "failed to deliver message"
                    );
                    if !self.stop.is_cancelled() {
                        task.state = DeliveryState::Ready;
                        retained.push_back(task);
                    }
                }
                DeliveryState::Ready | DeliveryState::Sending => {
                    // No endpoint took the message; it stays in the working
                    // set unless we are shutting down, in which case a later
                    // start reloads it from disk.
                    if !self.stop.is_cancelled() {
                        task.state = DeliveryState::Ready;
                        retained.push_back(task);
                    }
                }
            }
        }

        self.tasks = retained;
        self.flush_removals();
    }

    /// One send attempt through the endpoint under the cursor.
    async fn attempt_send(&mut self, task: &mut DeliveryTask) {
        let destination = self.destinations.for_kind(task.message.kind).clone();

        let (host, result) = match self.pool.current_mut() {
            Some(endpoint) => {
                let host = endpoint.host.clone();
                let result = endpoint.channel.send(&destination, &task.message).await;
                (host, result)
            }
            None => {
                task.state = DeliveryState::Ready;
                return;
            }
        };

        match result {
            Ok(()) => {
                task.state = DeliveryState::Delivered;
                self.pool.advance();
            }
            Err(error) => {
                // A STOMP broker closes the connection after an ERROR frame,
                // so a rejection leaves the channel as dead as an I/O error.
                warn!(host = %host, %error, "send failed, dropping endpoint");
                task.state = DeliveryState::Failed;
                self.pool.remove_current().await;
            }
        }
    }

    fn queue_removal(&mut self, ticket: Ticket) {
        if self.to_remove.len() >= DELIVERED_BATCH_CAP {
            self.flush_removals();
        }
        self.to_remove.push(ticket);
    }

    fn flush_removals(&mut self) {
        if self.to_remove.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.to_remove);
        if self.remover_tx.send(batch).is_err() {
            warn!("remover queue closed, delivered tickets stay on disk");
        }
    }
}
