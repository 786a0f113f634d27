use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use mycelia_acl::RwsStore;
use mycelia_core::{Message, Pkr, ScopeRequirement};

/// Parameters extracted from `{name}` segments of a matched pattern.
#[derive(Debug, Clone, Default)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    pub fn new() -> Self {
        PathParams(HashMap::new())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|s| s.as_str())
    }

    pub fn insert(&mut self, name: String, value: String) {
        self.0.insert(name, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Caller-visible route metadata: scope requirement plus any
/// user-defined passthrough fields.
#[derive(Debug, Clone, Default)]
pub struct RouteMetadata {
    pub required: Option<ScopeRequirement>,
    pub scope: Option<String>,
    pub method: Option<String>,
    pub extra: HashMap<String, serde_json::Value>,
}

/// Whatever the kernel set on the inbound accept before dispatch, plus
/// a handle onto the RWS store so a handler performing privileged
/// actions against a resource can evaluate `can_read`/`can_write`/
/// `can_grant` itself. This is the "identity-based auth wrapper": the
/// Layer-1 scope gate already passed by the time a handler runs,
/// Layer-2 checks are the handler's to make against specific targets.
#[derive(Clone)]
pub struct RouteOptions {
    pub caller_id: Option<Pkr>,
    pub caller_id_set_by: Option<Pkr>,
    pub rws: Option<Arc<RwsStore>>,
}

/// The result of a handler invocation. Mirrors the source's
/// `result | {success:false, error}` contract without conflating it
/// with Rust's `Result`, since a handler's own "failure" value is
/// still routed back to the caller rather than short-circuited.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    Success(serde_json::Value),
    Failure(serde_json::Value),
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerOutcome> + Send>>;

/// `async (message, params, routeOptions) -> result | {success:false, error}`.
pub type Handler = Arc<dyn Fn(Message, PathParams, RouteOptions) -> HandlerFuture + Send + Sync>;
