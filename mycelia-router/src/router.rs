use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::{debug, trace};

use mycelia_acl::RwsStore;
use mycelia_core::{Pkr, PrincipalRegistry, ProfileStore, ScopeRequirement};

use crate::error::RouterError;
use crate::types::{Handler, HandlerFuture, HandlerOutcome, PathParams, RouteMetadata, RouteOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    Param(String),
}

fn parse_pattern(pattern: &str) -> Vec<PatternSegment> {
    pattern
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            if let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                PatternSegment::Param(name.to_string())
            } else {
                PatternSegment::Literal(segment.to_string())
            }
        })
        .collect()
}

/// A node in the segment-keyed route trie. Literal edges are tried
/// before param edges during matching, so an exact-literal route
/// naturally outranks a parameterized one covering the same path.
#[derive(Default)]
struct TrieNode {
    literal_children: HashMap<String, TrieNode>,
    param_children: Vec<(String, TrieNode)>,
    route_index: Option<usize>,
}

impl TrieNode {
    fn insert(&mut self, segments: &[PatternSegment], index: usize) {
        match segments.split_first() {
            None => self.route_index = Some(index),
            Some((PatternSegment::Literal(literal), rest)) => self
                .literal_children
                .entry(literal.clone())
                .or_default()
                .insert(rest, index),
            Some((PatternSegment::Param(name), rest)) => {
                if let Some((_, child)) = self
                    .param_children
                    .iter_mut()
                    .find(|(existing, _)| existing == name)
                {
                    child.insert(rest, index);
                } else {
                    let mut child = TrieNode::default();
                    child.insert(rest, index);
                    self.param_children.push((name.clone(), child));
                }
            }
        }
    }

    /// Collects every complete match for `segments`, each tagged with
    /// its literal-segment count for ranking.
    fn collect_matches<'a>(
        &self,
        segments: &[&'a str],
        literal_count: usize,
        params: &mut Vec<(String, &'a str)>,
        out: &mut Vec<(usize, usize, Vec<(String, String)>)>,
    ) {
        match segments.split_first() {
            None => {
                if let Some(index) = self.route_index {
                    out.push((
                        literal_count,
                        index,
                        params
                            .iter()
                            .map(|(k, v)| (k.clone(), v.to_string()))
                            .collect(),
                    ));
                }
            }
            Some((head, rest)) => {
                if let Some(child) = self.literal_children.get(*head) {
                    child.collect_matches(rest, literal_count + 1, params, out);
                }
                for (name, child) in &self.param_children {
                    params.push((name.clone(), head));
                    child.collect_matches(rest, literal_count, params, out);
                    params.pop();
                }
            }
        }
    }
}

struct RouteEntry {
    pattern: String,
    metadata: RouteMetadata,
    handler: Handler,
    seq: usize,
}

/// A successful match: the matched pattern, extracted params and its
/// metadata.
pub struct MatchedRoute {
    pub pattern: String,
    pub params: PathParams,
    pub metadata: RouteMetadata,
    index: usize,
}

/// Distinguishes "no route matched" from "a route matched but the
/// caller's scope permission was insufficient", per §4.3's routing
/// contract.
pub enum MatchOutcome {
    Matched(MatchedRoute),
    NotFound,
    ScopeDenied { scope: String, required: ScopeRequirement },
}

/// Only the *structural* trie match is cached here — which pattern a
/// path resolves to and its extracted params. The Layer-1 scope
/// permission check is never cached: it runs fresh on every
/// `match_path` call so a profile/RWS mutation takes effect on the
/// very next send rather than waiting on LRU eviction. Keying on
/// `path` alone (no caller) is therefore sufficient and safe to share
/// across callers.
#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: String,
}

#[derive(Clone)]
enum CachedMatch {
    Matched { index: usize, params: Vec<(String, String)> },
    NotFound,
}

/// A per-subsystem path matcher: pattern registry, trie-based
/// matching with a bounded LRU outcome cache, and the Layer-1 scope
/// check performed before a handler is ever invoked.
pub struct Router {
    entries: Vec<Option<RouteEntry>>,
    pattern_index: HashMap<String, usize>,
    trie: TrieNode,
    next_seq: usize,
    cache: Mutex<LruCache<CacheKey, CachedMatch>>,
    profiles: Arc<ProfileStore>,
    principals: Arc<PrincipalRegistry>,
    rws: Arc<RwsStore>,
}

impl Router {
    pub fn new(
        profiles: Arc<ProfileStore>,
        principals: Arc<PrincipalRegistry>,
        rws: Arc<RwsStore>,
        cache_capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Router {
            entries: Vec::new(),
            pattern_index: HashMap::new(),
            trie: TrieNode::default(),
            next_seq: 0,
            cache: Mutex::new(LruCache::new(capacity)),
            profiles,
            principals,
            rws,
        }
    }

    pub fn register_route(
        &mut self,
        pattern: impl Into<String>,
        handler: Handler,
        metadata: RouteMetadata,
    ) -> Result<(), RouterError> {
        let pattern = pattern.into();
        if self.pattern_index.contains_key(&pattern) {
            return Err(RouterError::DuplicatePattern { pattern });
        }
        let segments = parse_pattern(&pattern);
        let index = self.entries.len();
        self.entries.push(Some(RouteEntry {
            pattern: pattern.clone(),
            metadata,
            handler,
            seq: self.next_seq,
        }));
        self.next_seq += 1;
        self.trie.insert(&segments, index);
        self.pattern_index.insert(pattern, index);
        self.cache.lock().unwrap().clear();
        Ok(())
    }

    pub fn unregister_route(&mut self, pattern: &str) -> Result<(), RouterError> {
        let index = self
            .pattern_index
            .remove(pattern)
            .ok_or_else(|| RouterError::UnknownPattern {
                pattern: pattern.to_string(),
            })?;
        self.entries[index] = None;
        self.cache.lock().unwrap().clear();
        Ok(())
    }

    pub fn has_route(&self, pattern: &str) -> bool {
        self.pattern_index.contains_key(pattern)
    }

    pub fn routes(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| e.as_ref().map(|e| e.pattern.as_str()))
            .collect()
    }

    fn strip_scheme(path: &str) -> &str {
        path.split_once("://").map(|(_, rest)| rest).unwrap_or(path)
    }

    /// Matches `path` (optionally scheme-prefixed) against the
    /// registered patterns, performing the Layer-1 scope check when
    /// the winning entry requires one and `caller` is provided.
    ///
    /// Only the structural outcome (which pattern, which params) is
    /// cached; the scope check below always reads the profile/RWS
    /// stores fresh, so a grant or revocation made between two calls
    /// is honored on the very next one rather than waiting on LRU
    /// eviction.
    pub fn match_path(&self, path: &str, caller: Option<&Pkr>) -> MatchOutcome {
        let key = CacheKey { path: path.to_string() };
        let cached = self.cache.lock().unwrap().get(&key).cloned();
        let matched = match cached {
            Some(cached) => {
                trace!(path, "router: structural match cache hit");
                cached
            }
            None => {
                let computed = self.compute_match(path);
                trace!(path, "router: structural match cache miss");
                self.cache.lock().unwrap().put(key, computed.clone());
                computed
            }
        };

        match matched {
            CachedMatch::NotFound => MatchOutcome::NotFound,
            CachedMatch::Matched { index, params } => {
                let entry = self.entries[index].as_ref().unwrap();
                match self.check_scope(&entry.metadata, caller) {
                    ScopeCheck::Denied { scope, required } => {
                        debug!(path, scope = %scope, required = ?required, "router: scope check denied dispatch");
                        MatchOutcome::ScopeDenied { scope, required }
                    }
                    ScopeCheck::Allowed => {
                        let mut path_params = PathParams::new();
                        for (name, value) in &params {
                            path_params.insert(name.clone(), value.clone());
                        }
                        MatchOutcome::Matched(MatchedRoute {
                            pattern: entry.pattern.clone(),
                            params: path_params,
                            metadata: entry.metadata.clone(),
                            index,
                        })
                    }
                }
            }
        }
    }

    /// Runs the trie match with no scope check and no cache lookup:
    /// the pure structural result, safe to cache indefinitely since it
    /// only changes when routes are (un)registered (which clears the
    /// cache outright).
    fn compute_match(&self, path: &str) -> CachedMatch {
        let rest = Self::strip_scheme(path);
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        let mut completions = Vec::new();
        let mut params_buf = Vec::new();
        self.trie
            .collect_matches(&segments, 0, &mut params_buf, &mut completions);

        let best = completions
            .into_iter()
            .filter(|(_, index, _)| self.entries[*index].is_some())
            .max_by_key(|(literal_count, index, _)| {
                let seq = self.entries[*index].as_ref().unwrap().seq;
                (*literal_count, usize::MAX - seq)
            });

        match best {
            None => CachedMatch::NotFound,
            Some((_, index, params)) => CachedMatch::Matched { index, params },
        }
    }

    fn check_scope(&self, metadata: &RouteMetadata, caller: Option<&Pkr>) -> ScopeCheck {
        let (Some(required), Some(scope)) = (metadata.required, metadata.scope.as_ref()) else {
            return ScopeCheck::Allowed;
        };
        let Some(caller) = caller else {
            return ScopeCheck::Allowed;
        };
        let allowed = self
            .principals
            .get_role_for_pkr(caller)
            .ok()
            .flatten()
            .and_then(|role| self.profiles.get_profile(&role))
            .is_some_and(|profile| profile.satisfies(scope, required));
        if allowed {
            ScopeCheck::Allowed
        } else {
            ScopeCheck::Denied {
                scope: scope.clone(),
                required,
            }
        }
    }

    /// Matches then invokes the winning handler, wrapping it with an
    /// identity-based auth handle so the handler can perform its own
    /// Layer-2 RWS checks against specific targets.
    pub async fn route(
        &self,
        message: mycelia_core::Message,
        caller_id: Option<Pkr>,
        caller_id_set_by: Option<Pkr>,
    ) -> Result<Option<HandlerOutcome>, RouterError> {
        match self.match_path(&message.path, caller_id.as_ref()) {
            MatchOutcome::NotFound => Ok(None),
            MatchOutcome::ScopeDenied { scope, required } => {
                Err(RouterError::PermissionDenied { scope, required })
            }
            MatchOutcome::Matched(matched) => {
                let entry = self.entries[matched.index].as_ref().unwrap();
                let options = RouteOptions {
                    caller_id,
                    caller_id_set_by,
                    rws: Some(Arc::clone(&self.rws)),
                };
                let future: HandlerFuture = (entry.handler)(message, matched.params, options);
                Ok(Some(future.await))
            }
        }
    }
}

enum ScopeCheck {
    Allowed,
    Denied { scope: String, required: ScopeRequirement },
}

#[cfg(test)]
mod tests {
    use super::*;
    use mycelia_core::{CreatePrincipalOptions, GrantLevel, Message, MessageType, PrincipalKind};
    use std::collections::HashMap as StdHashMap;

    fn test_router() -> (Router, Arc<PrincipalRegistry>, Arc<ProfileStore>) {
        let (registry, _kernel) = PrincipalRegistry::new();
        let registry = Arc::new(registry);
        let profiles = Arc::new(ProfileStore::new());
        let rws = Arc::new(RwsStore::new(Arc::clone(&registry)));
        let router = Router::new(Arc::clone(&profiles), Arc::clone(&registry), rws, 64);
        (router, registry, profiles)
    }

    fn ok_handler() -> Handler {
        Arc::new(|_msg, _params, _opts| {
            Box::pin(async { HandlerOutcome::Success(serde_json::json!({"ok": true})) })
        })
    }

    #[tokio::test]
    async fn exact_literal_route_matches() {
        let (mut router, _registry, _profiles) = test_router();
        router
            .register_route("ping", ok_handler(), RouteMetadata::default())
            .unwrap();

        let message = Message::new("echo://ping", serde_json::json!({})).unwrap();
        let result = router.route(message, None, None).await.unwrap();
        assert!(matches!(result, Some(HandlerOutcome::Success(_))));
    }

    #[tokio::test]
    async fn literal_route_outranks_param_route() {
        let (mut router, _registry, _profiles) = test_router();
        router
            .register_route("resource/{id}", ok_handler(), RouteMetadata::default())
            .unwrap();
        router
            .register_route("resource/default", ok_handler(), RouteMetadata::default())
            .unwrap();

        match router.match_path("workspace://resource/default", None) {
            MatchOutcome::Matched(matched) => assert_eq!(matched.pattern, "resource/default"),
            _ => panic!("expected a match"),
        }
    }

    #[tokio::test]
    async fn param_segment_is_extracted() {
        let (mut router, _registry, _profiles) = test_router();
        router
            .register_route("resource/{id}", ok_handler(), RouteMetadata::default())
            .unwrap();

        match router.match_path("workspace://resource/42", None) {
            MatchOutcome::Matched(matched) => {
                assert_eq!(matched.params.get("id"), Some("42"));
            }
            _ => panic!("expected a match"),
        }
    }

    #[tokio::test]
    async fn duplicate_pattern_rejected() {
        let (mut router, _registry, _profiles) = test_router();
        router
            .register_route("ping", ok_handler(), RouteMetadata::default())
            .unwrap();
        let err = router
            .register_route("ping", ok_handler(), RouteMetadata::default())
            .unwrap_err();
        assert!(matches!(err, RouterError::DuplicatePattern { .. }));
    }

    #[tokio::test]
    async fn scope_denial_blocks_dispatch_without_invoking_handler() {
        let (mut router, registry, profiles) = test_router();
        let mut grants = StdHashMap::new();
        grants.insert("workspace:read".to_string(), GrantLevel::R);
        profiles.create_profile("student", grants, None).unwrap();

        let student = registry.create_principal(PrincipalKind::Friend, CreatePrincipalOptions::default());
        registry.set_role_for_pkr(&student, "student").unwrap();

        let mut metadata = RouteMetadata::default();
        metadata.required = Some(mycelia_core::ScopeRequirement::Write);
        metadata.scope = Some("workspace:read".to_string());
        router
            .register_route("update", ok_handler(), metadata)
            .unwrap();

        let message = Message::new("workspace://update", serde_json::json!({}))
            .unwrap()
            .with_type(MessageType::Simple);
        let err = router
            .route(message, Some(student), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn empty_path_never_matches() {
        let (router, _registry, _profiles) = test_router();
        match router.match_path("", None) {
            MatchOutcome::NotFound => {}
            _ => panic!("empty path should not match"),
        }
    }
}
