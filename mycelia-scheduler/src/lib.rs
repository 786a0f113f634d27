//! Per-subsystem bounded queues, per-subsystem schedulers, and the
//! cooperative global scheduler that allocates time slices across
//! subsystems (§4.4).

pub mod error;
pub mod global;
pub mod queue;
pub mod strategy;
pub mod subsystem;

pub use error::SchedulerError;
pub use global::{GlobalScheduler, GlobalStatistics, SubsystemStatistics};
pub use queue::{AcceptOptions, BoundedQueue, QueueEntry, QueueStatistics};
pub use strategy::{
    FifoStrategy, PriorityStrategy, RoundRobinStrategy, SchedulingStrategy, SubsystemSnapshot,
};
pub use subsystem::{Processor, ProcessorFuture, SliceStatistics, SubsystemScheduler, TimeSlice};
