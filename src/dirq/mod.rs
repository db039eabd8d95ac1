//! Durable on-disk message queue ("DirQ").
//!
//! Producers on the local host append entries; the relay pipeline reads,
//! locks and eventually removes them. Entries survive crashes: a message is
//! only deleted after the publisher has confirmed broker delivery.

mod fsync;
mod queue;

pub use fsync::{fsync_dir, fsync_file};
pub use queue::{DirQueue, DirqError, Result};
