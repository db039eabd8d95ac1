//! In-memory broker doubles for pool and relay tests.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{
    AliasResolver, BrokerChannel, BrokerConnector, BrokerError, Destination, Result,
};
use crate::types::PreparedMessage;

/// Everything that happened to the mock broker, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Connected(String),
    Sent {
        host: String,
        destination: String,
        body: String,
    },
    Closed(String),
}

/// Shared scripted broker backing [`MockConnector`] channels.
#[derive(Default)]
pub struct MockBroker {
    events: Mutex<Vec<BrokerEvent>>,
    refuse_connect: Mutex<HashSet<String>>,
    fail_sends: Mutex<HashSet<String>>,
    reject_sends: Mutex<HashSet<String>>,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(MockBroker::default())
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Hosts that messages were sent to, in send order.
    pub fn send_hosts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                BrokerEvent::Sent { host, .. } => Some(host),
                _ => None,
            })
            .collect()
    }

    pub fn connect_count(&self, host: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, BrokerEvent::Connected(h) if h == host))
            .count()
    }

    pub fn was_closed(&self, host: &str) -> bool {
        self.events()
            .iter()
            .any(|event| matches!(event, BrokerEvent::Closed(h) if h == host))
    }

    /// Makes future connection attempts to `host` fail.
    pub fn refuse_connect(&self, host: &str) {
        self.refuse_connect.lock().unwrap().insert(host.to_string());
    }

    /// Makes future sends through channels to `host` fail.
    pub fn fail_sends(&self, host: &str) {
        self.fail_sends.lock().unwrap().insert(host.to_string());
    }

    /// Makes `host` answer every send with a broker-level ERROR frame.
    pub fn reject_sends(&self, host: &str) {
        self.reject_sends.lock().unwrap().insert(host.to_string());
    }

    fn record(&self, event: BrokerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Connector handing out channels that record into a [`MockBroker`].
pub struct MockConnector {
    broker: Arc<MockBroker>,
}

impl MockConnector {
    pub fn new(broker: Arc<MockBroker>) -> Self {
        MockConnector { broker }
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn connect(&self, host: &str) -> Result<Box<dyn BrokerChannel>> {
        if self.broker.refuse_connect.lock().unwrap().contains(host) {
            return Err(BrokerError::Connect {
                host: host.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        self.broker.record(BrokerEvent::Connected(host.to_string()));
        Ok(Box::new(MockChannel {
            host: host.to_string(),
            broker: Arc::clone(&self.broker),
        }))
    }
}

pub struct MockChannel {
    host: String,
    broker: Arc<MockBroker>,
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn send(&mut self, destination: &Destination, message: &PreparedMessage) -> Result<()> {
        if self.broker.fail_sends.lock().unwrap().contains(&self.host) {
            return Err(BrokerError::Closed);
        }
        if self.broker.reject_sends.lock().unwrap().contains(&self.host) {
            return Err(BrokerError::Rejected {
                message: "refused by policy".to_string(),
            });
        }
        self.broker.record(BrokerEvent::Sent {
            host: self.host.clone(),
            destination: destination.path.clone(),
            body: message.text.clone(),
        });
        Ok(())
    }

    async fn close(&mut self) {
        self.broker.record(BrokerEvent::Closed(self.host.clone()));
    }
}

/// Resolver returning scripted host lists, then repeating the last one.
pub struct ScriptedResolver {
    outcomes: Mutex<VecDeque<Result<Vec<String>>>>,
    last: Mutex<Vec<String>>,
}

impl ScriptedResolver {
    pub fn new(hosts: &[&str]) -> Self {
        ScriptedResolver {
            outcomes: Mutex::new(VecDeque::new()),
            last: Mutex::new(hosts.iter().map(|h| h.to_string()).collect()),
        }
    }

    /// Queues a one-shot resolution before falling back to the last list.
    pub fn push(&self, outcome: Result<Vec<String>>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Changes the steady-state host list.
    pub fn set(&self, hosts: &[&str]) {
        *self.last.lock().unwrap() = hosts.iter().map(|h| h.to_string()).collect();
    }
}

#[async_trait]
impl AliasResolver for ScriptedResolver {
    async fn resolve(&self, _alias: &str) -> Result<Vec<String>> {
        if let Some(outcome) = self.outcomes.lock().unwrap().pop_front() {
            return outcome;
        }
        Ok(self.last.lock().unwrap().clone())
    }
}
