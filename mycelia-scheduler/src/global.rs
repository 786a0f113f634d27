//! The single cooperative scheduler that allocates time slices across
//! registered subsystems. It runs a tick loop: each tick it asks the
//! active [`SchedulingStrategy`] to pick a subsystem, grants it one
//! [`TimeSlice`], and folds the result into per-subsystem statistics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SchedulerError;
use crate::strategy::{
    FifoStrategy, PriorityStrategy, RoundRobinStrategy, SchedulingStrategy, SubsystemSnapshot,
};
use crate::subsystem::{SubsystemScheduler, TimeSlice};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GlobalStatistics {
    pub ticks: u64,
    pub processed: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubsystemStatistics {
    pub slices_granted: u64,
    pub processed: u64,
}

struct Entry {
    name: String,
    scheduler: Arc<SubsystemScheduler>,
    registration_index: usize,
    stats: SubsystemStatistics,
}

struct State {
    entries: Vec<Option<Entry>>,
    names: HashMap<String, usize>,
    next_registration_index: usize,
}

impl State {
    fn new() -> Self {
        State {
            entries: Vec::new(),
            names: HashMap::new(),
            next_registration_index: 0,
        }
    }

    fn snapshot(&self) -> (Vec<SubsystemSnapshot>, Vec<usize>) {
        let mut snapshots = Vec::new();
        let mut indices = Vec::new();
        for (index, slot) in self.entries.iter().enumerate() {
            if let Some(entry) = slot {
                snapshots.push(SubsystemSnapshot {
                    name: entry.name.clone(),
                    priority: entry.scheduler.priority(),
                    oldest_waiting: entry.scheduler.queue().oldest_enqueued_at(),
                    registration_index: entry.registration_index,
                });
                indices.push(index);
            }
        }
        (snapshots, indices)
    }
}

/// Registers named [`SubsystemScheduler`]s and drives them under a
/// pluggable [`SchedulingStrategy`]. `round-robin`, `fifo` and
/// `priority` are registered out of the box; `fifo` is active by
/// default.
pub struct GlobalScheduler {
    state: Mutex<State>,
    strategies: RwLock<HashMap<&'static str, Arc<dyn SchedulingStrategy>>>,
    active_strategy: RwLock<&'static str>,
    tick: AtomicU64,
    total_processed: AtomicU64,
    time_slice: TimeSlice,
    cancellation: Mutex<CancellationToken>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GlobalScheduler {
    pub fn new(time_slice: TimeSlice) -> Arc<Self> {
        let mut strategies: HashMap<&'static str, Arc<dyn SchedulingStrategy>> = HashMap::new();
        strategies.insert("round-robin", Arc::new(RoundRobinStrategy));
        strategies.insert("priority", Arc::new(PriorityStrategy));
        strategies.insert("fifo", Arc::new(FifoStrategy));
        Arc::new(GlobalScheduler {
            state: Mutex::new(State::new()),
            strategies: RwLock::new(strategies),
            active_strategy: RwLock::new("fifo"),
            tick: AtomicU64::new(0),
            total_processed: AtomicU64::new(0),
            time_slice,
            cancellation: Mutex::new(CancellationToken::new()),
            handle: Mutex::new(None),
        })
    }

    /// Registers a subsystem scheduler under `name`, replacing any
    /// prior registration of the same name.
    pub fn register_subsystem(&self, name: impl Into<String>, scheduler: Arc<SubsystemScheduler>) {
        let name = name.into();
        let mut state = self.state.lock().unwrap();
        let registration_index = state.next_registration_index;
        state.next_registration_index += 1;
        let entry = Some(Entry {
            name: name.clone(),
            scheduler,
            registration_index,
            stats: SubsystemStatistics::default(),
        });
        if let Some(&index) = state.names.get(&name) {
            state.entries[index] = entry;
        } else {
            let index = state.entries.len();
            state.entries.push(entry);
            state.names.insert(name, index);
        }
    }

    pub fn unregister_subsystem(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(index) = state.names.remove(name) {
            state.entries[index] = None;
        }
    }

    pub fn register_strategy(&self, strategy: Arc<dyn SchedulingStrategy>) {
        self.strategies
            .write()
            .unwrap()
            .insert(strategy.name(), strategy);
    }

    pub fn set_strategy(&self, name: &'static str) -> Result<(), SchedulerError> {
        if !self.strategies.read().unwrap().contains_key(name) {
            return Err(SchedulerError::UnknownStrategy {
                name: name.to_string(),
            });
        }
        *self.active_strategy.write().unwrap() = name;
        Ok(())
    }

    pub fn active_strategy(&self) -> &'static str {
        *self.active_strategy.read().unwrap()
    }

    /// Runs one tick synchronously: selects a subsystem per the active
    /// strategy and grants it one time slice. Returns the name of the
    /// subsystem serviced, or `None` if no subsystem is registered.
    pub async fn tick_once(&self) -> Option<String> {
        let (snapshots, indices) = self.state.lock().unwrap().snapshot();
        if snapshots.is_empty() {
            return None;
        }
        let tick = self.tick.fetch_add(1, Ordering::SeqCst);
        let active_name = self.active_strategy();
        let strategy = self.strategies.read().unwrap().get(active_name).cloned();
        let strategy = strategy?;
        let picked = strategy.select(&snapshots, tick)?;
        let entry_index = indices[picked];

        let scheduler = {
            let state = self.state.lock().unwrap();
            state.entries[entry_index].as_ref().map(|e| Arc::clone(&e.scheduler))
        }?;
        let name = snapshots[picked].name.clone();
        let stats = scheduler.run_slice(self.time_slice).await;

        self.total_processed.fetch_add(stats.processed as u64, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries[entry_index].as_mut() {
            entry.stats.slices_granted += 1;
            entry.stats.processed += stats.processed as u64;
        }
        debug!(subsystem = %name, processed = stats.processed, tick, "global tick serviced subsystem");
        Some(name)
    }

    /// Spawns the tick loop as a background task. A subsequent `start`
    /// call while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut handle_guard = self.handle.lock().unwrap();
        if handle_guard.is_some() {
            return;
        }
        let cancellation = {
            let mut token = self.cancellation.lock().unwrap();
            *token = CancellationToken::new();
            token.clone()
        };
        let scheduler = Arc::clone(self);
        info!("global scheduler starting");
        *handle_guard = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = scheduler.tick_once() => {}
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    /// Cancels the tick loop and awaits its shutdown.
    pub async fn stop(&self) {
        self.cancellation.lock().unwrap().cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("global scheduler stopped");
    }

    pub fn get_statistics(&self) -> GlobalStatistics {
        GlobalStatistics {
            ticks: self.tick.load(Ordering::SeqCst),
            processed: self.total_processed.load(Ordering::SeqCst),
        }
    }

    pub fn get_subsystem_statistics(&self, name: &str) -> Option<SubsystemStatistics> {
        let state = self.state.lock().unwrap();
        let index = *state.names.get(name)?;
        state.entries[index].as_ref().map(|e| e.stats)
    }

    /// Deregisters every subsystem and resets tick/processed counters.
    /// Does not stop an already-running tick loop; with no subsystems
    /// left it simply idles.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.entries.clear();
        state.names.clear();
        state.next_registration_index = 0;
        self.tick.store(0, Ordering::SeqCst);
        self.total_processed.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{AcceptOptions, BoundedQueue, QueueEntry};
    use crate::subsystem::Processor;
    use mycelia_core::{Message, OverflowPolicy};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn push(queue: &BoundedQueue) {
        queue
            .enqueue(
                QueueEntry {
                    message: Message::new("echo://ping", serde_json::json!({})).unwrap(),
                    accept_options: AcceptOptions {
                        caller_id: None,
                        caller_id_set_by: None,
                        deadline: None,
                    },
                },
                "echo",
            )
            .unwrap();
    }

    fn counting_processor() -> (Processor, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let processor: Processor = Arc::new(move |_entry| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });
        (processor, count)
    }

    #[tokio::test(start_paused = true)]
    async fn round_robin_cycles_registered_subsystems() {
        let global = GlobalScheduler::new(TimeSlice {
            duration: Duration::from_millis(10),
            message_cap: 1,
        });
        global.set_strategy("round-robin").unwrap();

        let queue_a = Arc::new(BoundedQueue::new(8, OverflowPolicy::Reject));
        let queue_b = Arc::new(BoundedQueue::new(8, OverflowPolicy::Reject));
        for _ in 0..3 {
            push(&queue_a);
            push(&queue_b);
        }
        let (processor_a, _) = counting_processor();
        let (processor_b, _) = counting_processor();
        global.register_subsystem("a", Arc::new(SubsystemScheduler::new("a", queue_a, processor_a)));
        global.register_subsystem("b", Arc::new(SubsystemScheduler::new("b", queue_b, processor_b)));

        let first = global.tick_once().await;
        let second = global.tick_once().await;
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn statistics_accumulate_across_ticks() {
        let global = GlobalScheduler::new(TimeSlice {
            duration: Duration::from_millis(10),
            message_cap: 2,
        });
        let queue = Arc::new(BoundedQueue::new(8, OverflowPolicy::Reject));
        for _ in 0..4 {
            push(&queue);
        }
        let (processor, count) = counting_processor();
        global.register_subsystem("echo", Arc::new(SubsystemScheduler::new("echo", queue, processor)));

        global.tick_once().await;
        global.tick_once().await;

        assert_eq!(count.load(Ordering::SeqCst), 4);
        let stats = global.get_statistics();
        assert_eq!(stats.processed, 4);
        let subsystem_stats = global.get_subsystem_statistics("echo").unwrap();
        assert_eq!(subsystem_stats.slices_granted, 2);
        assert_eq!(subsystem_stats.processed, 4);
    }

    #[tokio::test]
    async fn unknown_strategy_is_rejected() {
        let global = GlobalScheduler::new(TimeSlice {
            duration: Duration::from_millis(10),
            message_cap: 1,
        });
        assert!(matches!(
            global.set_strategy("nonexistent"),
            Err(SchedulerError::UnknownStrategy { .. })
        ));
    }

    #[tokio::test]
    async fn empty_registry_ticks_to_none() {
        let global = GlobalScheduler::new(TimeSlice {
            duration: Duration::from_millis(10),
            message_cap: 1,
        });
        assert!(global.tick_once().await.is_none());
    }

    #[tokio::test]
    async fn start_and_stop_round_trip() {
        let global = GlobalScheduler::new(TimeSlice {
            duration: Duration::from_millis(1),
            message_cap: 1,
        });
        global.start();
        global.stop().await;
    }
}
