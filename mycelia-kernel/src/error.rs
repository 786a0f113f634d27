use std::fmt;

use mycelia_core::{CapabilityError, MessageError, PrincipalError, ProfileError};
use mycelia_router::RouterError;
use mycelia_scheduler::SchedulerError;

/// The kernel's top-level error type (§7). Every variant here is one
/// of the error kinds the specification names; `HandlerFailure` wraps
/// whatever a subsystem handler itself returned or panicked with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    UnknownPrincipal { detail: String },
    UnknownDestination { scheme: String },
    PermissionDenied {
        scope: String,
        required: String,
        caller: Option<String>,
    },
    QueueFull { subsystem: String },
    RouteNotFound { path: String },
    HandlerFailure { detail: serde_json::Value },
    ResponseTimeout { message_id: String },
    ReservedName { name: String },
    DuplicateSubsystem { name: String },
    UnknownSubsystem { name: String },
    InvalidChannelName { name: String },
    InvalidPath { detail: String },
    CycleDetected { detail: String },
    DependencyMissing { detail: String },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::UnknownPrincipal { detail } => write!(f, "unknown principal: {detail}"),
            KernelError::UnknownDestination { scheme } => {
                write!(f, "no subsystem registered for scheme: {scheme}")
            }
            KernelError::PermissionDenied {
                scope,
                required,
                caller,
            } => write!(
                f,
                "permission denied for scope '{scope}' (required {required}){}",
                caller
                    .as_ref()
                    .map(|c| format!(", caller {c}"))
                    .unwrap_or_default()
            ),
            KernelError::QueueFull { subsystem } => write!(f, "queue full for subsystem: {subsystem}"),
            KernelError::RouteNotFound { path } => write!(f, "no route matches path: {path}"),
            KernelError::HandlerFailure { detail } => write!(f, "handler failure: {detail}"),
            KernelError::ResponseTimeout { message_id } => {
                write!(f, "response timed out for message: {message_id}")
            }
            KernelError::ReservedName { name } => write!(f, "name is reserved: {name}"),
            KernelError::DuplicateSubsystem { name } => {
                write!(f, "subsystem already registered: {name}")
            }
            KernelError::UnknownSubsystem { name } => write!(f, "unknown subsystem: {name}"),
            KernelError::InvalidChannelName { name } => write!(f, "invalid channel name: {name}"),
            KernelError::InvalidPath { detail } => write!(f, "invalid message path: {detail}"),
            KernelError::CycleDetected { detail } => write!(f, "cyclic build dependency: {detail}"),
            KernelError::DependencyMissing { detail } => {
                write!(f, "missing build dependency: {detail}")
            }
        }
    }
}

impl std::error::Error for KernelError {}

impl From<PrincipalError> for KernelError {
    fn from(err: PrincipalError) -> Self {
        KernelError::UnknownPrincipal {
            detail: err.to_string(),
        }
    }
}

impl From<MessageError> for KernelError {
    fn from(err: MessageError) -> Self {
        KernelError::InvalidPath {
            detail: err.to_string(),
        }
    }
}

impl From<ProfileError> for KernelError {
    fn from(err: ProfileError) -> Self {
        KernelError::HandlerFailure {
            detail: serde_json::json!({ "profile_error": err.to_string() }),
        }
    }
}

impl From<RouterError> for KernelError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::PermissionDenied { scope, required } => KernelError::PermissionDenied {
                scope,
                required: format!("{required:?}"),
                caller: None,
            },
            other => KernelError::RouteNotFound {
                path: other.to_string(),
            },
        }
    }
}

impl From<SchedulerError> for KernelError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::QueueFull { subsystem } => KernelError::QueueFull { subsystem },
            SchedulerError::UnknownStrategy { name } => KernelError::HandlerFailure {
                detail: serde_json::json!({ "unknown_strategy": name }),
            },
        }
    }
}

impl From<CapabilityError> for KernelError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::CyclicDependency { .. } => KernelError::CycleDetected {
                detail: err.to_string(),
            },
            CapabilityError::MissingDependency { .. } => KernelError::DependencyMissing {
                detail: err.to_string(),
            },
            CapabilityError::DuplicateCapability { .. } => KernelError::DependencyMissing {
                detail: err.to_string(),
            },
        }
    }
}
