//! The Mycelia Kernel: bootstraps identity, the two permission layers,
//! per-subsystem routing and the cooperative global scheduler behind a
//! single trusted entry point, `Kernel::send_protected`.

pub mod channel;
pub mod error;
pub mod error_store;
pub mod kernel;
pub mod registry;
pub mod response;
pub mod telemetry;

pub use channel::{ChannelManager, ChannelRecord};
pub use error::KernelError;
pub use error_store::{ErrorManager, ErrorRecord, ErrorSeverity, ErrorSummary};
pub use kernel::{
    Kernel, KernelChildren, ResponseRequirement, SendOptions, SendOutcome,
};
pub use registry::{SubsystemHandle, SubsystemOptions, SubsystemRegistry, SubsystemState};
pub use response::{ReplyOutcome, ResponseManager};
pub use telemetry::init_tracing;

pub use mycelia_acl::{AclError, RwsSet, RwsStore};
pub use mycelia_core::{
    CapabilityContext, CapabilityError, CapabilityRegistry, CreatePrincipalOptions, GrantLevel,
    KernelConfig, Message, MessageId, MessageType, MetaMap, MessageError, OverflowPolicy, Pkr,
    PrincipalError, PrincipalKind, PrincipalRegistry, Profile, ProfileApplication,
    ProfileGrantSink, ProfileError, ProfileStore, ScopeRequirement,
};
pub use mycelia_router::{
    Handler, HandlerFuture, HandlerOutcome, MatchOutcome, MatchedRoute, PathParams,
    RouteMetadata, RouteOptions, Router, RouterError,
};
pub use mycelia_scheduler::{
    AcceptOptions, BoundedQueue, FifoStrategy, GlobalScheduler, GlobalStatistics, Processor,
    PriorityStrategy, QueueEntry, QueueStatistics, RoundRobinStrategy, SchedulerError,
    SchedulingStrategy, SliceStatistics, SubsystemScheduler, SubsystemSnapshot,
    SubsystemStatistics, TimeSlice,
};
