use std::fmt;

use mycelia_core::PrincipalError;

/// Errors raised by the Reader/Writer/Grantor Set (RWS) store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclError {
    UnknownPrincipal { detail: String },
}

impl From<PrincipalError> for AclError {
    fn from(err: PrincipalError) -> Self {
        AclError::UnknownPrincipal {
            detail: err.to_string(),
        }
    }
}

impl fmt::Display for AclError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AclError::UnknownPrincipal { detail } => write!(f, "unknown principal: {detail}"),
        }
    }
}

impl std::error::Error for AclError {}
