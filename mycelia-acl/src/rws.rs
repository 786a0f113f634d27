//! Layer-2 permission store: Reader/Writer/Grantor Sets.
//!
//! Grounded on the same concurrent-map shape the teacher uses for its
//! authorization decision store: every resource's membership set is a
//! `DashSet`, so reads and writes against distinct resources never
//! contend, and a single resource's membership mutates atomically
//! with respect to concurrent routing-time reads (§5's linearizability
//! requirement).
//!
//! Sets are keyed by the resource's **private key**, not its public
//! token: a `refreshPrincipal` rotation must leave RWS membership
//! untouched (it is rooted at the unchanging authority, not the
//! ephemeral PKR).

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::DashSet;
use mycelia_core::{Pkr, PrincipalRegistry, PrivateKey, ProfileGrantSink};
use tracing::debug;

use crate::error::AclError;

/// The reader/writer/grantor membership rooted at one resource
/// principal.
#[derive(Default)]
pub struct RwsSet {
    readers: DashSet<PrivateKey>,
    writers: DashSet<PrivateKey>,
    grantors: DashSet<PrivateKey>,
}

impl RwsSet {
    fn can_read(&self, target: PrivateKey) -> bool {
        self.readers.contains(&target) || self.writers.contains(&target)
    }

    fn can_write(&self, target: PrivateKey) -> bool {
        self.writers.contains(&target)
    }

    fn can_grant(&self, target: PrivateKey) -> bool {
        self.grantors.contains(&target)
    }
}

/// Keyed by the resource principal's private key; created lazily on
/// first access, mirroring `createRWS`'s "creates one on first access"
/// contract.
pub struct RwsStore {
    registry: Arc<PrincipalRegistry>,
    sets: DashMap<PrivateKey, Arc<RwsSet>>,
}

impl RwsStore {
    pub fn new(registry: Arc<PrincipalRegistry>) -> Self {
        RwsStore {
            registry,
            sets: DashMap::new(),
        }
    }

    /// Returns the RWS rooted at `owner`, creating an empty one on
    /// first access.
    pub fn create_rws(&self, owner: &Pkr) -> Result<Arc<RwsSet>, AclError> {
        let owner_key = self.registry.resolve_pkr(owner)?;
        Ok(Arc::clone(
            self.sets
                .entry(owner_key)
                .or_insert_with(|| Arc::new(RwsSet::default())),
        ))
    }

    pub fn add_reader(&self, owner: &Pkr, target: &Pkr) -> Result<(), AclError> {
        let rws = self.create_rws(owner)?;
        let target_key = self.registry.resolve_pkr(target)?;
        rws.readers.insert(target_key);
        debug!(owner = ?owner.public_key, "rws: reader added");
        Ok(())
    }

    pub fn add_writer(&self, owner: &Pkr, target: &Pkr) -> Result<(), AclError> {
        let rws = self.create_rws(owner)?;
        let target_key = self.registry.resolve_pkr(target)?;
        rws.writers.insert(target_key);
        debug!(owner = ?owner.public_key, "rws: writer added");
        Ok(())
    }

    pub fn remove_writer(&self, owner: &Pkr, target: &Pkr) -> Result<(), AclError> {
        let rws = self.create_rws(owner)?;
        let target_key = self.registry.resolve_pkr(target)?;
        rws.writers.remove(&target_key);
        rws.grantors.remove(&target_key);
        debug!(owner = ?owner.public_key, "rws: writer removed");
        Ok(())
    }

    pub fn set_grantor(&self, owner: &Pkr, target: &Pkr) -> Result<(), AclError> {
        let rws = self.create_rws(owner)?;
        let target_key = self.registry.resolve_pkr(target)?;
        rws.grantors.insert(target_key);
        debug!(owner = ?owner.public_key, "rws: grantor set");
        Ok(())
    }

    pub fn can_read(&self, owner: &Pkr, target: &Pkr) -> Result<bool, AclError> {
        let rws = self.create_rws(owner)?;
        let target_key = self.registry.resolve_pkr(target)?;
        Ok(rws.can_read(target_key))
    }

    pub fn can_write(&self, owner: &Pkr, target: &Pkr) -> Result<bool, AclError> {
        let rws = self.create_rws(owner)?;
        let target_key = self.registry.resolve_pkr(target)?;
        Ok(rws.can_write(target_key))
    }

    pub fn can_grant(&self, owner: &Pkr, target: &Pkr) -> Result<bool, AclError> {
        let rws = self.create_rws(owner)?;
        let target_key = self.registry.resolve_pkr(target)?;
        Ok(rws.can_grant(target_key))
    }
}

/// Lets the Layer-1 profile store apply grants without depending on
/// this crate's concrete error type.
impl ProfileGrantSink for RwsStore {
    fn add_reader(&self, owner: &Pkr, target: &Pkr) -> Result<(), String> {
        RwsStore::add_reader(self, owner, target).map_err(|e| e.to_string())
    }

    fn add_writer(&self, owner: &Pkr, target: &Pkr) -> Result<(), String> {
        RwsStore::add_writer(self, owner, target).map_err(|e| e.to_string())
    }

    fn set_grantor(&self, owner: &Pkr, target: &Pkr) -> Result<(), String> {
        RwsStore::set_grantor(self, owner, target).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mycelia_core::{CreatePrincipalOptions, PrincipalKind};

    fn registry() -> Arc<PrincipalRegistry> {
        let (registry, _kernel) = PrincipalRegistry::new();
        Arc::new(registry)
    }

    #[test]
    fn writer_implies_reader() {
        let registry = registry();
        let store = RwsStore::new(Arc::clone(&registry));
        let owner = registry.create_principal(PrincipalKind::Resource, CreatePrincipalOptions::default());
        let writer = registry.create_principal(PrincipalKind::Friend, CreatePrincipalOptions::default());

        store.add_writer(&owner, &writer).unwrap();

        assert!(store.can_write(&owner, &writer).unwrap());
        assert!(store.can_read(&owner, &writer).unwrap());
        assert!(!store.can_grant(&owner, &writer).unwrap());
    }

    #[test]
    fn reader_alone_cannot_write_or_grant() {
        let registry = registry();
        let store = RwsStore::new(Arc::clone(&registry));
        let owner = registry.create_principal(PrincipalKind::Resource, CreatePrincipalOptions::default());
        let reader = registry.create_principal(PrincipalKind::Friend, CreatePrincipalOptions::default());

        store.add_reader(&owner, &reader).unwrap();

        assert!(store.can_read(&owner, &reader).unwrap());
        assert!(!store.can_write(&owner, &reader).unwrap());
    }

    #[test]
    fn set_grantor_requires_existing_writer_semantics() {
        let registry = registry();
        let store = RwsStore::new(Arc::clone(&registry));
        let owner = registry.create_principal(PrincipalKind::Resource, CreatePrincipalOptions::default());
        let writer = registry.create_principal(PrincipalKind::Friend, CreatePrincipalOptions::default());

        store.add_writer(&owner, &writer).unwrap();
        store.set_grantor(&owner, &writer).unwrap();

        assert!(store.can_grant(&owner, &writer).unwrap());
    }

    #[test]
    fn remove_writer_clears_grantor_flag() {
        let registry = registry();
        let store = RwsStore::new(Arc::clone(&registry));
        let owner = registry.create_principal(PrincipalKind::Resource, CreatePrincipalOptions::default());
        let writer = registry.create_principal(PrincipalKind::Friend, CreatePrincipalOptions::default());

        store.add_writer(&owner, &writer).unwrap();
        store.set_grantor(&owner, &writer).unwrap();
        store.remove_writer(&owner, &writer).unwrap();

        assert!(!store.can_write(&owner, &writer).unwrap());
        assert!(!store.can_grant(&owner, &writer).unwrap());
    }

    #[test]
    fn rws_membership_survives_target_refresh() {
        let registry = registry();
        let store = RwsStore::new(Arc::clone(&registry));
        let owner = registry.create_principal(PrincipalKind::Resource, CreatePrincipalOptions::default());
        let writer = registry.create_principal(PrincipalKind::Friend, CreatePrincipalOptions::default());
        store.add_writer(&owner, &writer).unwrap();

        let refreshed = registry.refresh_principal(&writer).unwrap();

        assert!(store.can_write(&owner, &refreshed).unwrap());
    }
}
