//! Layer-2 Reader/Writer/Grantor Set (RWS) access control.

pub mod error;
pub mod rws;

pub use error::AclError;
pub use rws::{RwsSet, RwsStore};
