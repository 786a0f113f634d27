use std::collections::HashMap;

use dashmap::DashMap;

use crate::error::ProfileError;
use crate::principal::Pkr;

/// A grant level in the `r < rw < rwg` partial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GrantLevel {
    R,
    Rw,
    Rwg,
}

impl GrantLevel {
    pub fn parse(value: &str) -> Result<Self, ProfileError> {
        match value {
            "r" => Ok(GrantLevel::R),
            "rw" => Ok(GrantLevel::Rw),
            "rwg" => Ok(GrantLevel::Rwg),
            other => Err(ProfileError::InvalidGrantLevel {
                value: other.to_string(),
            }),
        }
    }

    /// Whether this grant level satisfies `requirement` (read/write/grant).
    pub fn satisfies(self, requirement: ScopeRequirement) -> bool {
        match requirement {
            ScopeRequirement::Read => true,
            ScopeRequirement::Write => matches!(self, GrantLevel::Rw | GrantLevel::Rwg),
            ScopeRequirement::Grant => matches!(self, GrantLevel::Rwg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRequirement {
    Read,
    Write,
    Grant,
}

/// A named role: a table of colon-delimited scope patterns to grant
/// levels. A pattern ending in `*` matches any scope sharing its
/// leading colon-delimited segment.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub name: String,
    pub grants: HashMap<String, GrantLevel>,
    pub metadata: Option<serde_json::Value>,
}

impl Profile {
    /// Finds the grant level applicable to `scope`, preferring an exact
    /// match over a wildcard match.
    pub fn grant_for_scope(&self, scope: &str) -> Option<GrantLevel> {
        if let Some(level) = self.grants.get(scope) {
            return Some(*level);
        }
        let head = scope.split(':').next().unwrap_or(scope);
        for (pattern, level) in &self.grants {
            if let Some(prefix) = pattern.strip_suffix('*') {
                let prefix = prefix.strip_suffix(':').unwrap_or(prefix);
                if prefix == head {
                    return Some(*level);
                }
            }
        }
        None
    }

    pub fn satisfies(&self, scope: &str, requirement: ScopeRequirement) -> bool {
        self.grant_for_scope(scope)
            .is_some_and(|level| level.satisfies(requirement))
    }
}

/// Outcome of [`ProfileStore::apply_profile_to_principal`].
#[derive(Debug, Clone, Default)]
pub struct ProfileApplication {
    pub applied: Vec<String>,
    pub failed: Vec<String>,
    pub errors: Vec<String>,
}

/// A hook invoked per-grant while applying a profile to a principal.
/// Implemented by the access-control layer (mycelia-acl) so that Layer
/// 1 (profiles) never needs to depend on Layer 2 (RWS) directly.
pub trait ProfileGrantSink {
    fn add_reader(&self, owner: &Pkr, target: &Pkr) -> Result<(), String>;
    fn add_writer(&self, owner: &Pkr, target: &Pkr) -> Result<(), String>;
    fn set_grantor(&self, owner: &Pkr, target: &Pkr) -> Result<(), String>;
}

/// Layer-1 permission store: `roleName -> Profile`.
pub struct ProfileStore {
    profiles: DashMap<String, Profile>,
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileStore {
    pub fn new() -> Self {
        ProfileStore {
            profiles: DashMap::new(),
        }
    }

    pub fn create_profile(
        &self,
        name: impl Into<String>,
        grants: HashMap<String, GrantLevel>,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), ProfileError> {
        let name = name.into();
        if self.profiles.contains_key(&name) {
            return Err(ProfileError::DuplicateProfile { name });
        }
        self.profiles.insert(
            name.clone(),
            Profile {
                name,
                grants,
                metadata,
            },
        );
        Ok(())
    }

    /// `replace = false` merges `grants` into the existing table;
    /// `replace = true` substitutes it wholesale.
    pub fn update_profile(
        &self,
        name: &str,
        grants: HashMap<String, GrantLevel>,
        replace: bool,
    ) -> Result<(), ProfileError> {
        let mut profile = self
            .profiles
            .get_mut(name)
            .ok_or_else(|| ProfileError::UnknownProfile {
                name: name.to_string(),
            })?;
        if replace {
            profile.grants = grants;
        } else {
            profile.grants.extend(grants);
        }
        Ok(())
    }

    pub fn delete_profile(&self, name: &str) -> Result<(), ProfileError> {
        self.profiles
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProfileError::UnknownProfile {
                name: name.to_string(),
            })
    }

    pub fn get_profile(&self, name: &str) -> Option<Profile> {
        self.profiles.get(name).map(|p| p.clone())
    }

    /// Applies every `(scope, level)` grant in profile `name` to
    /// `principal` via `sink`: `rw`/`rwg` add a writer, `rwg` also sets
    /// grantor, and `r` adds a reader. `owner` is the resource these
    /// grants are rooted at (typically the principal itself for
    /// self-scoped roles).
    pub fn apply_profile_to_principal(
        &self,
        name: &str,
        owner: &Pkr,
        principal: &Pkr,
        sink: &dyn ProfileGrantSink,
    ) -> Result<ProfileApplication, ProfileError> {
        let profile = self
            .profiles
            .get(name)
            .ok_or_else(|| ProfileError::UnknownProfile {
                name: name.to_string(),
            })?;
        let mut outcome = ProfileApplication::default();
        for (scope, level) in &profile.grants {
            let result = match level {
                GrantLevel::R => sink.add_reader(owner, principal),
                GrantLevel::Rw => sink.add_writer(owner, principal),
                GrantLevel::Rwg => sink
                    .add_writer(owner, principal)
                    .and_then(|_| sink.set_grantor(owner, principal)),
            };
            match result {
                Ok(()) => outcome.applied.push(scope.clone()),
                Err(err) => {
                    outcome.failed.push(scope.clone());
                    outcome.errors.push(err);
                }
            }
        }
        Ok(outcome)
    }
}
