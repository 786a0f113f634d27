//! Subsystem registry and lifecycle state machine: `Unregistered ->
//! Built -> Registered -> Disposed` (§4.5).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use mycelia_core::{CapabilityContext, KernelConfig, OverflowPolicy, Pkr};
use mycelia_router::Router;
use mycelia_scheduler::{BoundedQueue, SubsystemScheduler};

use crate::error::KernelError;

/// Reserved subsystem (scheme) names the kernel refuses to allocate
/// to a caller-registered subsystem (§4.5).
pub const RESERVED_SUBSYSTEM_NAMES: &[&str] = &["kernel", "query", "command", "event"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemState {
    Unregistered,
    Built,
    Registered,
    Disposed,
}

/// Caller-supplied options for `register_subsystem`.
#[derive(Debug, Clone, Default)]
pub struct SubsystemOptions {
    pub synchronous: bool,
    pub queue_capacity: Option<usize>,
    pub overflow_policy: Option<OverflowPolicy>,
    pub priority: i64,
    pub metadata: Option<serde_json::Value>,
}

/// A registered subsystem: its own router, bounded queue and
/// per-subsystem scheduler, plus the kernel-issued identity it was
/// allocated on registration.
pub struct SubsystemHandle {
    pub name: String,
    pub identity: Pkr,
    pub router: RwLock<Router>,
    pub queue: Arc<BoundedQueue>,
    pub scheduler: Arc<SubsystemScheduler>,
    pub synchronous: bool,
    pub metadata: Option<serde_json::Value>,
    /// Resolved build-plan capabilities (empty unless the subsystem was
    /// registered with a capability dependency graph).
    pub capabilities: CapabilityContext,
    priority: AtomicI64,
    state: Mutex<SubsystemState>,
}

impl SubsystemHandle {
    pub fn state(&self) -> SubsystemState {
        *self.state.lock().unwrap()
    }

    /// Looks up a resolved capability by name, per the build plan's
    /// "exposes capabilities by name through a lookup method" contract.
    pub fn capability<T: std::any::Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.capabilities.get(name)
    }

    pub fn set_state(&self, state: SubsystemState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn priority(&self) -> i64 {
        self.priority.load(Ordering::SeqCst)
    }
}

/// Name-keyed store of live [`SubsystemHandle`]s.
pub struct SubsystemRegistry {
    handles: DashMap<String, Arc<SubsystemHandle>>,
}

impl Default for SubsystemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubsystemRegistry {
    pub fn new() -> Self {
        SubsystemRegistry {
            handles: DashMap::new(),
        }
    }

    pub fn validate_name(name: &str) -> Result<(), KernelError> {
        if name.is_empty() || RESERVED_SUBSYSTEM_NAMES.contains(&name) {
            return Err(KernelError::ReservedName {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Builds a fresh, `Built`-state handle. Does not allocate an
    /// identity or make the subsystem routable — that happens in
    /// `register` (`Built -> Registered`).
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        name: impl Into<String>,
        identity: Pkr,
        config: &KernelConfig,
        options: &SubsystemOptions,
        router: Router,
        processor: mycelia_scheduler::Processor,
        capabilities: CapabilityContext,
    ) -> Arc<SubsystemHandle> {
        let name = name.into();
        let capacity = options.queue_capacity.unwrap_or(config.queue_capacity);
        let policy = options.overflow_policy.unwrap_or(config.overflow_policy);
        let queue = Arc::new(BoundedQueue::new(capacity, policy));
        let scheduler = Arc::new(SubsystemScheduler::new(name.clone(), Arc::clone(&queue), processor));
        scheduler.set_priority(options.priority);
        Arc::new(SubsystemHandle {
            name,
            identity,
            router: RwLock::new(router),
            queue,
            scheduler,
            synchronous: options.synchronous,
            metadata: options.metadata.clone(),
            capabilities,
            priority: AtomicI64::new(options.priority),
            state: Mutex::new(SubsystemState::Built),
        })
    }

    pub fn register(&self, handle: Arc<SubsystemHandle>) -> Result<(), KernelError> {
        Self::validate_name(&handle.name)?;
        if self.handles.contains_key(&handle.name) {
            return Err(KernelError::DuplicateSubsystem {
                name: handle.name.clone(),
            });
        }
        handle.set_state(SubsystemState::Registered);
        self.handles.insert(handle.name.clone(), handle);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<SubsystemHandle>> {
        self.handles.get(name).map(|h| Arc::clone(&h))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<SubsystemHandle>> {
        self.handles.remove(name).map(|(_, h)| h)
    }

    pub fn names(&self) -> Vec<String> {
        self.handles.iter().map(|e| e.key().clone()).collect()
    }

    /// Reverse lookup used by channel fan-out: which subsystem, if
    /// any, was registered with this exact identity.
    pub fn find_name_by_identity(&self, pkr: &Pkr) -> Option<String> {
        self.handles
            .iter()
            .find(|entry| entry.value().identity.public_key == pkr.public_key)
            .map(|entry| entry.key().clone())
    }
}
