use std::fmt;

use mycelia_core::ScopeRequirement;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    DuplicatePattern { pattern: String },
    UnknownPattern { pattern: String },
    PermissionDenied {
        scope: String,
        required: ScopeRequirement,
    },
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::DuplicatePattern { pattern } => {
                write!(f, "route pattern already registered: {pattern}")
            }
            RouterError::UnknownPattern { pattern } => {
                write!(f, "no such route pattern: {pattern}")
            }
            RouterError::PermissionDenied { scope, required } => write!(
                f,
                "permission denied for scope '{scope}' (required {required:?})"
            ),
        }
    }
}

impl std::error::Error for RouterError {}
