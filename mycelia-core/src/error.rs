use std::fmt;

/// Errors raised by the principal registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrincipalError {
    /// A PKR does not resolve to any known private key.
    UnknownPrincipal { uuid: String },
}

impl fmt::Display for PrincipalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrincipalError::UnknownPrincipal { uuid } => {
                write!(f, "unknown principal: {uuid}")
            }
        }
    }
}

impl std::error::Error for PrincipalError {}

/// Errors raised by the Layer-1 profile store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    DuplicateProfile { name: String },
    UnknownProfile { name: String },
    InvalidGrantLevel { value: String },
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileError::DuplicateProfile { name } => {
                write!(f, "profile already registered: {name}")
            }
            ProfileError::UnknownProfile { name } => write!(f, "unknown profile: {name}"),
            ProfileError::InvalidGrantLevel { value } => {
                write!(f, "invalid grant level: {value} (expected r, rw or rwg)")
            }
        }
    }
}

impl std::error::Error for ProfileError {}

/// Errors raised by message path parsing/validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    EmptyPath,
    SchemeOnlyPath { path: String },
    InvalidPath { path: String },
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::EmptyPath => write!(f, "message path is empty"),
            MessageError::SchemeOnlyPath { path } => {
                write!(f, "message path has no segments beyond its scheme: {path}")
            }
            MessageError::InvalidPath { path } => write!(f, "malformed message path: {path}"),
        }
    }
}

impl std::error::Error for MessageError {}

/// Errors raised while resolving a [`crate::builder::CapabilityRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    CyclicDependency { cycle: Vec<&'static str> },
    MissingDependency {
        capability: &'static str,
        dependency: &'static str,
    },
    DuplicateCapability { name: &'static str },
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityError::CyclicDependency { cycle } => {
                write!(f, "cyclic capability dependency: {}", cycle.join(" -> "))
            }
            CapabilityError::MissingDependency {
                capability,
                dependency,
            } => write!(
                f,
                "capability '{capability}' depends on unregistered capability '{dependency}'"
            ),
            CapabilityError::DuplicateCapability { name } => {
                write!(f, "capability already registered: {name}")
            }
        }
    }
}

impl std::error::Error for CapabilityError {}
