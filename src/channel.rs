//! Capacity-bounded handoff channel between the loader and the publisher.
//!
//! This is deliberately not a backpressuring channel: `push` on a full
//! channel silently discards the value. The queue is the overload-shedding
//! valve of the pipeline: dropped entries stay on disk and are picked up by
//! a later scan, so shedding trades latency for bounded memory. Producers
//! that want to throttle use [`BoundedChannel::drain`] instead, which waits
//! for the consumer to make progress.
//!
//! All blocking operations observe a shared [`CancellationToken`] and return
//! promptly once stop is requested.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How long a `pop` may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Return immediately; `None` if the channel is empty.
    NoWait,
    /// Block up to the given duration for an item.
    Timeout(Duration),
    /// Block until an item arrives or stop is requested.
    Block,
}

/// A thread-safe FIFO with a hard capacity and silent overflow shedding.
pub struct BoundedChannel<T> {
    capacity: usize,
    queue: Mutex<VecDeque<T>>,
    // Size mirror; every push/pop bumps the watch so waiters re-check.
    size_tx: watch::Sender<usize>,
    stop: CancellationToken,
}

impl<T> BoundedChannel<T> {
    /// Creates a channel holding at most `capacity` items.
    pub fn new(capacity: usize, stop: CancellationToken) -> Self {
        let (size_tx, _) = watch::channel(0);
        BoundedChannel {
            capacity,
            queue: Mutex::new(VecDeque::new()),
            size_tx,
            stop,
        }
    }

    /// Current number of queued items.
    pub fn len(&self) -> usize {
        *self.size_tx.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `value`, or silently discards it when the channel is full.
    ///
    /// Never blocks and never fails. Waiters are woken either way.
    pub fn push(&self, value: T) {
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            if queue.len() < self.capacity {
                queue.push_back(value);
            }
            // Shed drops `value` here without a per-item log: under sustained
            // overload that would be a log storm.
        }
        self.bump();
    }

    /// Removes and returns the oldest item.
    ///
    /// With [`Wait::Block`] or [`Wait::Timeout`], a stop request ends the
    /// wait early; whatever is queued at that moment is still returned.
    pub async fn pop(&self, wait: Wait) -> Option<T> {
        if let Some(v) = self.try_pop() {
            return Some(v);
        }

        let mut rx = self.size_tx.subscribe();
        let deadline = match wait {
            Wait::NoWait => return None,
            Wait::Timeout(d) => Some(tokio::time::Instant::now() + d),
            Wait::Block => None,
        };

        loop {
            if let Some(v) = self.try_pop() {
                return Some(v);
            }
            tokio::select! {
                _ = self.stop.cancelled() => return self.try_pop(),
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => return self.try_pop(),
                _ = rx.changed() => {}
            }
        }
    }

    /// Blocks until the channel size drops below its current value.
    ///
    /// This is the producer-side throttle: it returns as soon as the consumer
    /// removes anything (not when the channel is empty), or when stop is
    /// requested. An empty channel returns immediately.
    pub async fn drain(&self) {
        let mut rx = self.size_tx.subscribe();
        let snapshot = *rx.borrow_and_update();
        if snapshot == 0 {
            return;
        }

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return,
                _ = rx.changed() => {
                    if *rx.borrow_and_update() < snapshot {
                        return;
                    }
                }
            }
        }
    }

    fn try_pop(&self) -> Option<T> {
        let value = {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.pop_front()
        };
        if value.is_some() {
            self.bump();
        }
        value
    }

    fn bump(&self) {
        let len = self.queue.lock().unwrap_or_else(|e| e.into_inner()).len();
        self.size_tx.send_replace(len);
    }
}
