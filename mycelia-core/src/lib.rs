//! Principal registry, Layer-1 profile permissions, message envelope
//! types, shared configuration and the topological capability builder
//! that every other Mycelia Kernel crate depends on.

pub mod builder;
pub mod config;
pub mod error;
pub mod message;
pub mod principal;
pub mod profile;

pub use builder::{CapabilityContext, CapabilityRegistry};
pub use config::{KernelConfig, OverflowPolicy};
pub use error::{CapabilityError, MessageError, PrincipalError, ProfileError};
pub use message::{
    Message, MessageId, MessageType, MetaMap, META_CORRELATION_ID, META_ERROR, META_IN_REPLY_TO,
    META_IS_RESPONSE, META_PROCESS_IMMEDIATELY, META_SUCCESS,
};
pub use principal::{
    Authority, CreatePrincipalOptions, Pkr, PrincipalKind, PrincipalRegistry, PrivateKey,
    PublicKey,
};
pub use profile::{GrantLevel, Profile, ProfileApplication, ProfileGrantSink, ProfileStore, ScopeRequirement};
