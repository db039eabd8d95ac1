//! End-to-end pipeline tests: real disk queue, mock broker.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::{PublisherSettings, Relay};
use crate::broker::testing::{BrokerEvent, MockBroker, MockConnector, ScriptedResolver};
use crate::broker::DestinationSet;
use crate::config::{DestinationSettings, PipelineSettings, PublishSettings};
use crate::dirq::DirQueue;

struct Pipeline {
    _dir: TempDir,
    queue: Arc<DirQueue>,
    broker: Arc<MockBroker>,
    relay: Relay,
}

fn start_pipeline(hosts: &[&str], payloads: &[&str]) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let queue = Arc::new(DirQueue::open(dir.path()).unwrap());
    for payload in payloads {
        queue.add(payload.as_bytes()).unwrap();
    }

    let broker = MockBroker::new();
    let relay = Relay::start(
        Arc::clone(&queue),
        Box::new(MockConnector::new(Arc::clone(&broker))),
        Box::new(ScriptedResolver::new(hosts)),
        DestinationSet::from_config(&DestinationSettings::default(), &PublishSettings::default()),
        PublisherSettings {
            alias: "mq.example.org".to_string(),
            check_interval: Duration::from_secs(1800),
            endpoint: "fts3.example.org".to_string(),
            fqdn: None,
        },
        &PipelineSettings::default(),
        CancellationToken::new(),
    );

    Pipeline {
        _dir: dir,
        queue,
        broker,
        relay,
    }
}

/// Polls until the disk queue is empty or the deadline passes.
async fn wait_for_empty_queue(queue: &DirQueue) -> bool {
    for _ in 0..200 {
        if queue.entries().unwrap().is_empty() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn messages_flow_from_disk_to_broker_and_are_removed() {
    let pipeline = start_pipeline(
        &["a"],
        &[
            r#"ST {"vo_name":"atlas"}"#,
            r#"SS {"job_id":"j1","file_id":17,"file_state":"ACTIVE"}"#,
            r#"CO {"job_id":"j1"}"#,
        ],
    );

    assert!(wait_for_empty_queue(&pipeline.queue).await);
    pipeline.relay.shutdown().await;

    // Each message was delivered exactly once.
    let sends: Vec<BrokerEvent> = pipeline
        .broker
        .events()
        .into_iter()
        .filter(|e| matches!(e, BrokerEvent::Sent { .. }))
        .collect();
    assert_eq!(sends.len(), 3);

    // Every payload reached the broker rewritten with the endpoint alias.
    for event in &sends {
        if let BrokerEvent::Sent { body, .. } = event {
            assert!(body.contains("fts3.example.org"));
            assert!(body.ends_with(' '));
        }
    }
}

#[tokio::test]
async fn messages_are_routed_by_type_prefix() {
    let pipeline = start_pipeline(
        &["a"],
        &[r#"ST {"x":1}"#, r#"OP {"source_se":"s","dest_se":"d"}"#],
    );

    assert!(wait_for_empty_queue(&pipeline.queue).await);
    pipeline.relay.shutdown().await;

    let destinations: Vec<String> = pipeline
        .broker
        .events()
        .into_iter()
        .filter_map(|e| match e {
            BrokerEvent::Sent { destination, .. } => Some(destination),
            _ => None,
        })
        .collect();
    assert!(destinations.contains(&"/topic/transfer.fts_monitoring_start".to_string()));
    assert!(destinations.contains(&"/topic/transfer.fts_monitoring_queue_state".to_string()));
}

#[tokio::test]
async fn unreachable_brokers_leave_messages_on_disk() {
    let dir = TempDir::new().unwrap();
    let queue = Arc::new(DirQueue::open(dir.path()).unwrap());
    for payload in ["SS {}", "SS {}", "SS {}"] {
        queue.add(payload.as_bytes()).unwrap();
    }

    let broker = MockBroker::new();
    broker.refuse_connect("a");
    let relay = Relay::start(
        Arc::clone(&queue),
        Box::new(MockConnector::new(Arc::clone(&broker))),
        Box::new(ScriptedResolver::new(&["a"])),
        DestinationSet::from_config(&DestinationSettings::default(), &PublishSettings::default()),
        PublisherSettings {
            alias: "mq.example.org".to_string(),
            check_interval: Duration::from_secs(1800),
            endpoint: "fts3.example.org".to_string(),
            fqdn: None,
        },
        &PipelineSettings::default(),
        CancellationToken::new(),
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    relay.shutdown().await;

    // Nothing was sent, nothing was lost.
    assert!(broker.send_hosts().is_empty());
    assert_eq!(queue.entries().unwrap().len(), 3);
}

#[tokio::test]
async fn sends_spread_evenly_across_endpoints() {
    let payloads: Vec<String> = (0..6).map(|i| format!("SS {{\"n\":{i}}}")).collect();
    let payload_refs: Vec<&str> = payloads.iter().map(String::as_str).collect();
    let pipeline = start_pipeline(&["a", "b"], &payload_refs);

    assert!(wait_for_empty_queue(&pipeline.queue).await);
    pipeline.relay.shutdown().await;

    let hosts = pipeline.broker.send_hosts();
    assert_eq!(hosts.len(), 6);
    assert_eq!(hosts.iter().filter(|h| *h == "a").count(), 3);
    assert_eq!(hosts.iter().filter(|h| *h == "b").count(), 3);
}

#[tokio::test]
async fn shutdown_removes_already_delivered_messages() {
    let pipeline = start_pipeline(&["a"], &["SS {}"]);

    // Wait for delivery, then stop; the remover must finish its queue even
    // though the stop token fired.
    assert!(wait_for_empty_queue(&pipeline.queue).await);
    pipeline.relay.shutdown().await;

    assert!(pipeline.queue.entries().unwrap().is_empty());
    assert_eq!(pipeline.broker.send_hosts(), vec!["a"]);
}
