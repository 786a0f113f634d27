use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::queue::{BoundedQueue, QueueEntry};

pub type ProcessorFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Invoked once per dequeued entry. Handler failures are the
/// processor's own responsibility to record; the scheduler only cares
/// about throughput.
pub type Processor = Arc<dyn Fn(QueueEntry) -> ProcessorFuture + Send + Sync>;

/// A time-slice budget: a wall-clock duration and a message-count cap,
/// whichever is reached first ends the slice.
#[derive(Debug, Clone, Copy)]
pub struct TimeSlice {
    pub duration: Duration,
    pub message_cap: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SliceStatistics {
    pub processed: usize,
}

/// Drains one subsystem's queue under a time-slice budget. `priority`
/// is advisory: only the `priority` global strategy consults it,
/// round-robin ignores it entirely (§9 Open Questions).
pub struct SubsystemScheduler {
    name: String,
    queue: Arc<BoundedQueue>,
    processor: Processor,
    paused: AtomicBool,
    priority: AtomicI64,
    cancellation: CancellationToken,
}

impl SubsystemScheduler {
    pub fn new(name: impl Into<String>, queue: Arc<BoundedQueue>, processor: Processor) -> Self {
        SubsystemScheduler {
            name: name.into(),
            queue,
            processor,
            paused: AtomicBool::new(false),
            priority: AtomicI64::new(0),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &Arc<BoundedQueue> {
        &self.queue
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_priority(&self, priority: i64) {
        self.priority.store(priority, Ordering::SeqCst);
    }

    pub fn priority(&self) -> i64 {
        self.priority.load(Ordering::SeqCst)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Dequeues and processes up to `slice.message_cap` messages, or
    /// until `slice.duration` elapses, whichever comes first. A paused
    /// subsystem yields an empty slice without touching its queue.
    pub async fn run_slice(&self, slice: TimeSlice) -> SliceStatistics {
        if self.is_paused() {
            trace!(subsystem = %self.name, "slice skipped: paused");
            return SliceStatistics::default();
        }
        let deadline = Instant::now() + slice.duration;
        let mut processed = 0usize;
        while processed < slice.message_cap {
            if Instant::now() >= deadline {
                break;
            }
            if self.cancellation.is_cancelled() {
                break;
            }
            let Some(entry) = self.queue.dequeue() else {
                break;
            };
            (self.processor)(entry).await;
            processed += 1;
        }
        debug!(subsystem = %self.name, processed, "slice complete");
        SliceStatistics { processed }
    }
}
