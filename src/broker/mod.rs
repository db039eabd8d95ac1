//! Broker endpoints: destination routing, alias resolution, the STOMP
//! transport and the round-robin connection pool.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{DestinationSettings, PublishSettings};
use crate::types::{MessageKind, PreparedMessage};

mod pool;
mod resolve;
mod stomp;

#[cfg(test)]
pub mod testing;

pub use pool::{Endpoint, EndpointPool};
pub use resolve::{AliasResolver, DnsResolver};
pub use stomp::StompConnector;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection to {host} failed: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("broker i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("alias {alias:?} did not resolve: {source}")]
    Resolve {
        alias: String,
        #[source]
        source: std::io::Error,
    },

    #[error("broker rejected the frame: {message}")]
    Rejected { message: String },

    #[error("malformed frame from broker: {0}")]
    Protocol(String),

    #[error("broker closed the connection")]
    Closed,

    #[error("timed out waiting for the broker")]
    Timeout,

    #[error("TLS transport is not available; disable use_ssl or front the broker with a TLS proxy")]
    TlsUnavailable,
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// A named broker destination plus its delivery attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Full STOMP destination path, e.g. `/topic/transfer.fts_monitoring_start`.
    pub path: String,
    /// Ask the broker to persist the message.
    pub persistent: bool,
    /// Message expiry relative to send time.
    pub ttl: Duration,
}

/// The four destinations, one per message kind.
#[derive(Debug, Clone)]
pub struct DestinationSet {
    started: Destination,
    completed: Destination,
    state: Destination,
    optimizer: Destination,
}

impl DestinationSet {
    pub fn from_config(destinations: &DestinationSettings, publish: &PublishSettings) -> Self {
        let prefix = if publish.use_topics {
            "/topic/"
        } else {
            "/queue/"
        };
        let ttl = Duration::from_secs(destinations.ttl_hours * 3600);
        let make = |name: &str, persistent: bool| Destination {
            path: format!("{prefix}{name}"),
            persistent,
            ttl,
        };
        DestinationSet {
            started: make(&destinations.started, true),
            completed: make(&destinations.completed, true),
            state: make(&destinations.state, true),
            // Optimizer updates are superseded within minutes; not worth
            // persisting broker-side.
            optimizer: make(&destinations.optimizer, false),
        }
    }

    pub fn for_kind(&self, kind: MessageKind) -> &Destination {
        match kind {
            MessageKind::TransferStarted => &self.started,
            MessageKind::TransferCompleted => &self.completed,
            MessageKind::TransferState => &self.state,
            MessageKind::OptimizerUpdate => &self.optimizer,
        }
    }
}

/// An established session with one broker host.
#[async_trait]
pub trait BrokerChannel: Send {
    /// Delivers one message and waits for broker acknowledgement.
    async fn send(&mut self, destination: &Destination, message: &PreparedMessage) -> Result<()>;

    /// Says goodbye to the broker. Errors are ignored; the connection is
    /// gone either way.
    async fn close(&mut self);
}

/// Opens [`BrokerChannel`]s to individual hosts.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, host: &str) -> Result<Box<dyn BrokerChannel>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationSettings, PublishSettings};

    #[test]
    fn destinations_use_topic_prefix_by_default() {
        let set = DestinationSet::from_config(
            &DestinationSettings::default(),
            &PublishSettings::default(),
        );

        assert_eq!(
            set.for_kind(MessageKind::TransferStarted).path,
            "/topic/transfer.fts_monitoring_start"
        );
        assert_eq!(
            set.for_kind(MessageKind::OptimizerUpdate).path,
            "/topic/transfer.fts_monitoring_queue_state"
        );
    }

    #[test]
    fn queue_prefix_when_topics_disabled() {
        let publish = PublishSettings {
            use_topics: false,
            ..PublishSettings::default()
        };
        let set = DestinationSet::from_config(&DestinationSettings::default(), &publish);

        assert_eq!(
            set.for_kind(MessageKind::TransferState).path,
            "/queue/transfer.fts_monitoring_state"
        );
    }

    #[test]
    fn only_optimizer_messages_are_non_persistent() {
        let set = DestinationSet::from_config(
            &DestinationSettings::default(),
            &PublishSettings::default(),
        );

        assert!(set.for_kind(MessageKind::TransferStarted).persistent);
        assert!(set.for_kind(MessageKind::TransferCompleted).persistent);
        assert!(set.for_kind(MessageKind::TransferState).persistent);
        assert!(!set.for_kind(MessageKind::OptimizerUpdate).persistent);
    }
}
