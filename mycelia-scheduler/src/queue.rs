use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use mycelia_core::{Message, OverflowPolicy, Pkr};

use crate::error::SchedulerError;

/// Kernel-set acceptance metadata attached at enqueue time: only the
/// kernel is allowed to set `caller_id`/`caller_id_set_by` (§4.5 step 4).
#[derive(Clone)]
pub struct AcceptOptions {
    pub caller_id: Option<Pkr>,
    pub caller_id_set_by: Option<Pkr>,
    pub deadline: Option<Instant>,
}

pub struct QueueEntry {
    pub message: Message,
    pub accept_options: AcceptOptions,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatistics {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped_newest: u64,
    pub dropped_oldest: u64,
    pub rejected: u64,
}

struct Inner {
    entries: VecDeque<(Instant, QueueEntry)>,
    stats: QueueStatistics,
}

/// A bounded, single-consumer FIFO for one subsystem. The overflow
/// policy governs what happens when `enqueue` is called at capacity;
/// `drop-oldest`/`drop-newest` are silent-with-statistics, matching
/// the source exactly (only `reject` is caller-visible).
pub struct BoundedQueue {
    capacity: usize,
    policy: OverflowPolicy,
    inner: Mutex<Inner>,
}

impl BoundedQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        BoundedQueue {
            capacity,
            policy,
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                stats: QueueStatistics::default(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn enqueue(&self, entry: QueueEntry, subsystem: &str) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.len() < self.capacity {
            inner.entries.push_back((Instant::now(), entry));
            inner.stats.enqueued += 1;
            return Ok(());
        }
        match self.policy {
            OverflowPolicy::Reject => {
                inner.stats.rejected += 1;
                Err(SchedulerError::QueueFull {
                    subsystem: subsystem.to_string(),
                })
            }
            OverflowPolicy::DropNewest => {
                inner.stats.dropped_newest += 1;
                Ok(())
            }
            OverflowPolicy::DropOldest => {
                inner.entries.pop_front();
                inner.entries.push_back((Instant::now(), entry));
                inner.stats.dropped_oldest += 1;
                inner.stats.enqueued += 1;
                Ok(())
            }
        }
    }

    pub fn dequeue(&self) -> Option<QueueEntry> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.entries.pop_front();
        if entry.is_some() {
            inner.stats.dequeued += 1;
        }
        entry.map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timestamp the front entry was enqueued at, for the global
    /// scheduler's `fifo` strategy (services the subsystem whose
    /// oldest message has waited longest).
    pub fn oldest_enqueued_at(&self) -> Option<Instant> {
        self.inner.lock().unwrap().entries.front().map(|(instant, _)| *instant)
    }

    pub fn statistics(&self) -> QueueStatistics {
        self.inner.lock().unwrap().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> QueueEntry {
        QueueEntry {
            message: Message::new("echo://ping", serde_json::json!({})).unwrap(),
            accept_options: AcceptOptions {
                caller_id: None,
                caller_id_set_by: None,
                deadline: None,
            },
        }
    }

    #[test]
    fn reject_policy_surfaces_queue_full_at_capacity() {
        let queue = BoundedQueue::new(2, OverflowPolicy::Reject);
        queue.enqueue(entry(), "echo").unwrap();
        queue.enqueue(entry(), "echo").unwrap();
        let err = queue.enqueue(entry(), "echo").unwrap_err();
        assert!(matches!(err, SchedulerError::QueueFull { .. }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn zero_capacity_always_overflows_under_reject() {
        let queue = BoundedQueue::new(0, OverflowPolicy::Reject);
        assert!(queue.enqueue(entry(), "echo").is_err());
    }

    #[test]
    fn drop_oldest_keeps_capacity_and_evicts_front() {
        let queue = BoundedQueue::new(1, OverflowPolicy::DropOldest);
        queue.enqueue(entry(), "echo").unwrap();
        queue.enqueue(entry(), "echo").unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.statistics().dropped_oldest, 1);
    }

    #[test]
    fn drop_newest_silently_discards_incoming() {
        let queue = BoundedQueue::new(1, OverflowPolicy::DropNewest);
        queue.enqueue(entry(), "echo").unwrap();
        queue.enqueue(entry(), "echo").unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.statistics().dropped_newest, 1);
    }

    #[test]
    fn drain_then_enqueue_succeeds_again() {
        let queue = BoundedQueue::new(2, OverflowPolicy::Reject);
        queue.enqueue(entry(), "echo").unwrap();
        queue.enqueue(entry(), "echo").unwrap();
        assert!(queue.enqueue(entry(), "echo").is_err());
        queue.dequeue().unwrap();
        assert!(queue.enqueue(entry(), "echo").is_ok());
    }
}
