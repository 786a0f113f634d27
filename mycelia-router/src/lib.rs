//! Per-subsystem path matching: a segment-keyed trie with `{param}`
//! wildcard edges, a bounded LRU outcome cache, and the Layer-1 scope
//! check performed before a handler is ever invoked.

pub mod error;
pub mod router;
pub mod types;

pub use error::RouterError;
pub use router::{MatchOutcome, MatchedRoute, Router};
pub use types::{Handler, HandlerFuture, HandlerOutcome, PathParams, RouteMetadata, RouteOptions};
