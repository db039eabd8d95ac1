//! Round-robin pool of broker endpoints.
//!
//! The pool converges on whatever the broker alias currently resolves to:
//! hosts that stay keep their live connection, new hosts are connected,
//! removed hosts are closed. The cursor always points at a valid endpoint
//! (or the pool is empty).

use tracing::{info, warn};

use super::{BrokerChannel, BrokerConnector};

/// One connected broker host.
pub struct Endpoint {
    pub host: String,
    pub channel: Box<dyn BrokerChannel>,
}

#[derive(Default)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
    cursor: usize,
}

impl EndpointPool {
    pub fn new() -> Self {
        EndpointPool::default()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn hosts(&self) -> Vec<&str> {
        self.endpoints.iter().map(|e| e.host.as_str()).collect()
    }

    /// The endpoint under the cursor.
    pub fn current_mut(&mut self) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(self.cursor)
    }

    /// Moves the cursor to the next endpoint, wrapping around.
    pub fn advance(&mut self) {
        if !self.endpoints.is_empty() {
            self.cursor = (self.cursor + 1) % self.endpoints.len();
        }
    }

    /// Closes and removes the endpoint under the cursor.
    ///
    /// The cursor ends up on the following endpoint, so a failed host does
    /// not cost the next one its turn.
    pub async fn remove_current(&mut self) {
        if self.cursor >= self.endpoints.len() {
            return;
        }
        let mut endpoint = self.endpoints.remove(self.cursor);
        warn!(host = %endpoint.host, "dropping broker endpoint");
        endpoint.channel.close().await;
        if self.cursor >= self.endpoints.len() {
            self.cursor = 0;
        }
    }

    /// Converges the pool on `hosts` (sorted, deduplicated).
    ///
    /// Connections to hosts still in the list are kept as-is. Connect
    /// failures for new hosts are logged and skipped; the next refresh
    /// retries them.
    pub async fn refresh(&mut self, hosts: &[String], connector: &dyn BrokerConnector) {
        let mut kept = Vec::with_capacity(hosts.len());
        for mut endpoint in self.endpoints.drain(..) {
            if hosts.binary_search(&endpoint.host).is_ok() {
                kept.push(endpoint);
            } else {
                info!(host = %endpoint.host, "broker host left the alias, closing");
                endpoint.channel.close().await;
            }
        }
        self.endpoints = kept;

        for host in hosts {
            if self.endpoints.iter().any(|e| &e.host == host) {
                continue;
            }
            match connector.connect(host).await {
                Ok(channel) => {
                    info!(host = %host, "connected to broker");
                    self.endpoints.push(Endpoint {
                        host: host.clone(),
                        channel,
                    });
                }
                Err(error) => {
                    warn!(host = %host, %error, "broker connection failed");
                }
            }
        }

        if self.cursor >= self.endpoints.len() {
            self.cursor = 0;
        }
    }

    /// Closes every endpoint and empties the pool.
    pub async fn close_all(&mut self) {
        for mut endpoint in self.endpoints.drain(..) {
            endpoint.channel.close().await;
        }
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::{MockBroker, MockConnector};
    use crate::broker::Destination;
    use crate::types::{MessageKind, PreparedMessage};
    use std::time::Duration;

    fn hosts(list: &[&str]) -> Vec<String> {
        list.iter().map(|h| h.to_string()).collect()
    }

    fn message() -> PreparedMessage {
        PreparedMessage {
            kind: MessageKind::TransferState,
            text: "{} ".to_string(),
            vo: None,
            summary: None,
        }
    }

    fn destination() -> Destination {
        Destination {
            path: "/topic/t".to_string(),
            persistent: true,
            ttl: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn refresh_connects_all_hosts() {
        let broker = MockBroker::new();
        let connector = MockConnector::new(broker.clone());
        let mut pool = EndpointPool::new();

        pool.refresh(&hosts(&["a", "b"]), &connector).await;

        assert_eq!(pool.hosts(), vec!["a", "b"]);
        assert_eq!(broker.connect_count("a"), 1);
        assert_eq!(broker.connect_count("b"), 1);
    }

    #[tokio::test]
    async fn refresh_keeps_surviving_connections_and_closes_removed() {
        let broker = MockBroker::new();
        let connector = MockConnector::new(broker.clone());
        let mut pool = EndpointPool::new();

        pool.refresh(&hosts(&["a", "b"]), &connector).await;
        pool.refresh(&hosts(&["b", "c"]), &connector).await;

        assert_eq!(pool.hosts(), vec!["b", "c"]);
        // b's connection survived the refresh; only a was closed and only c
        // was newly connected.
        assert_eq!(broker.connect_count("b"), 1);
        assert_eq!(broker.connect_count("c"), 1);
        assert!(broker.was_closed("a"));
        assert!(!broker.was_closed("b"));
    }

    #[tokio::test]
    async fn refresh_skips_hosts_that_refuse() {
        let broker = MockBroker::new();
        broker.refuse_connect("b");
        let connector = MockConnector::new(broker.clone());
        let mut pool = EndpointPool::new();

        pool.refresh(&hosts(&["a", "b"]), &connector).await;
        assert_eq!(pool.hosts(), vec!["a"]);

        // Once the host accepts again, the next refresh picks it up.
        let broker2 = MockBroker::new();
        let connector2 = MockConnector::new(broker2.clone());
        pool.refresh(&hosts(&["a", "b"]), &connector2).await;
        assert_eq!(pool.hosts(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn round_robin_visits_endpoints_in_turn() {
        let broker = MockBroker::new();
        let connector = MockConnector::new(broker.clone());
        let mut pool = EndpointPool::new();
        pool.refresh(&hosts(&["a", "b", "c"]), &connector).await;

        let dest = destination();
        let msg = message();
        for _ in 0..6 {
            let endpoint = pool.current_mut().unwrap();
            endpoint.channel.send(&dest, &msg).await.unwrap();
            pool.advance();
        }

        assert_eq!(broker.send_hosts(), vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn remove_current_keeps_cursor_valid() {
        let broker = MockBroker::new();
        let connector = MockConnector::new(broker.clone());
        let mut pool = EndpointPool::new();
        pool.refresh(&hosts(&["a", "b"]), &connector).await;

        // Cursor on "a"; removing it leaves the cursor on "b".
        pool.remove_current().await;
        assert!(broker.was_closed("a"));
        assert_eq!(pool.current_mut().unwrap().host, "b");

        // Removing the last endpoint resets to an empty pool.
        pool.remove_current().await;
        assert!(pool.is_empty());
        assert!(pool.current_mut().is_none());
        pool.advance();
        assert!(pool.current_mut().is_none());
    }

    #[tokio::test]
    async fn close_all_closes_every_endpoint() {
        let broker = MockBroker::new();
        let connector = MockConnector::new(broker.clone());
        let mut pool = EndpointPool::new();
        pool.refresh(&hosts(&["a", "b"]), &connector).await;

        pool.close_all().await;
        assert!(pool.is_empty());
        assert!(broker.was_closed("a"));
        assert!(broker.was_closed("b"));
    }
}
