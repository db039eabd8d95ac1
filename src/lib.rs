//! Monitoring message relay for a grid data-transfer service.
//!
//! Transfer and job events are written by local producers into an on-disk
//! queue. This crate forwards them to a pool of message brokers resolved from
//! a DNS alias, and removes them from disk only once delivery is confirmed.
//!
//! The pipeline is three supervised tasks connected by queues:
//!
//! ```text
//! DirQueue --Loader--> BoundedChannel --Publisher--> (delivered batches) --Remover--> DirQueue::remove
//! ```

pub mod broker;
pub mod channel;
pub mod config;
pub mod dirq;
pub mod relay;
pub mod types;
