//! Response manager: tracks one-shot reply bindings and settles them
//! on delivery or timeout (§3 Reply Binding, §4.5 Response manager).
//!
//! Bindings are scheduled on a min-heap of `(expiry, messageId)` pairs
//! (per the spec's Design Notes §9) so timeout eviction is O(log n)
//! regardless of how many requests are in flight. A single background
//! task sweeps the heap, woken either by its own timer or by a
//! [`tokio::sync::Notify`] whenever a binding with an earlier expiry
//! is registered.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use mycelia_core::{Message, MessageId, Pkr};

use crate::error::KernelError;

/// What a waiting caller's one-shot request settles with.
#[derive(Debug)]
pub enum ReplyOutcome {
    Delivered(Message),
    TimedOut,
}

struct Binding {
    requester: Pkr,
    reply_channel: String,
    sender: Mutex<Option<oneshot::Sender<ReplyOutcome>>>,
}

struct Heap {
    entries: BinaryHeap<Reverse<(Instant, MessageId)>>,
}

/// Tracks `messageId -> { replyChannel, requesterPkr, expires }` and
/// settles the waiting caller exactly once, whichever comes first:
/// delivery or timeout.
pub struct ResponseManager {
    bindings: DashMap<MessageId, Binding>,
    heap: Mutex<Heap>,
    wake: Notify,
    cancellation: CancellationToken,
}

impl ResponseManager {
    pub fn new() -> std::sync::Arc<Self> {
        let manager = std::sync::Arc::new(ResponseManager {
            bindings: DashMap::new(),
            heap: Mutex::new(Heap {
                entries: BinaryHeap::new(),
            }),
            wake: Notify::new(),
            cancellation: CancellationToken::new(),
        });
        let sweeper = std::sync::Arc::clone(&manager);
        tokio::spawn(async move { sweeper.sweep_loop().await });
        manager
    }

    /// Registers a reply binding for `message_id` and returns the
    /// receiver half the caller awaits. `timeout` of zero expires on
    /// the reaper's very next wake, matching the spec's boundary case.
    pub fn register_reply(
        &self,
        message_id: MessageId,
        reply_channel: impl Into<String>,
        requester: Pkr,
        timeout: Duration,
    ) -> oneshot::Receiver<ReplyOutcome> {
        let (sender, receiver) = oneshot::channel();
        self.bindings.insert(
            message_id,
            Binding {
                requester,
                reply_channel: reply_channel.into(),
                sender: Mutex::new(Some(sender)),
            },
        );
        let expiry = Instant::now() + timeout;
        {
            let mut heap = self.heap.lock().unwrap();
            let was_earliest = heap
                .entries
                .peek()
                .map(|Reverse((top, _))| expiry < *top)
                .unwrap_or(true);
            heap.entries.push(Reverse((expiry, message_id)));
            if was_earliest {
                self.wake.notify_one();
            }
        }
        receiver
    }

    /// The channel a handler should reply to for `message_id`, if a
    /// binding is still active.
    pub fn get_reply_to(&self, message_id: MessageId) -> Option<String> {
        self.bindings.get(&message_id).map(|b| b.reply_channel.clone())
    }

    pub fn requester_for(&self, message_id: MessageId) -> Option<Pkr> {
        self.bindings.get(&message_id).map(|b| b.requester.clone())
    }

    /// Matches `response` by `meta.inReplyTo`, settles the waiting
    /// one-shot with the response body and clears the binding. A
    /// response with no matching (or already-settled/expired) binding
    /// is silently discarded, matching "late response is discarded"
    /// (§5 Cancellation & timeouts).
    pub fn deliver_response(&self, response: Message) -> Result<(), KernelError> {
        let Some(message_id) = response.meta.in_reply_to() else {
            return Ok(());
        };
        if let Some((_, binding)) = self.bindings.remove(&message_id) {
            if let Some(sender) = binding.sender.lock().unwrap().take() {
                let _ = sender.send(ReplyOutcome::Delivered(response));
            }
        }
        Ok(())
    }

    fn settle_timeout(&self, message_id: MessageId) {
        if let Some((_, binding)) = self.bindings.remove(&message_id) {
            if let Some(sender) = binding.sender.lock().unwrap().take() {
                let _ = sender.send(ReplyOutcome::TimedOut);
                warn!(%message_id, "response manager: one-shot request timed out");
            }
        }
    }

    async fn sweep_loop(self: std::sync::Arc<Self>) {
        loop {
            let next_expiry = { self.heap.lock().unwrap().entries.peek().map(|Reverse((t, _))| *t) };
            let sleep = match next_expiry {
                Some(expiry) => tokio::time::sleep_until(expiry),
                None => tokio::time::sleep(Duration::from_secs(3600)),
            };
            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = self.wake.notified() => continue,
                _ = sleep => {
                    let due = {
                        let mut heap = self.heap.lock().unwrap();
                        heap.entries.pop().map(|Reverse((_, id))| id)
                    };
                    if let Some(message_id) = due {
                        trace!(%message_id, "response manager: sweeping expired binding");
                        self.settle_timeout(message_id);
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }
}
