use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::PrincipalError;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// An opaque authority token. Not a cryptographic key: possession is
/// enforced by reference inside the process, never by signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrivateKey(u64);

impl PrivateKey {
    fn allocate() -> Self {
        PrivateKey(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// An opaque public token, unique per principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(u64);

impl PublicKey {
    fn allocate() -> Self {
        PublicKey(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// A principal's authority: either it owns a fresh private key, or it
/// shares the authority of another principal's public key.
///
/// Two principals with the same `Owned(owner)` resolve to the same
/// private key — this is how kernel children and top-level subsystems
/// acquire kernel authority without a distinguishable public identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    Unique(PrivateKey),
    Owned(PublicKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    Kernel,
    TopLevel,
    Child,
    Friend,
    Resource,
}

/// Options accepted by [`PrincipalRegistry::create_principal`].
#[derive(Debug, Clone, Default)]
pub struct CreatePrincipalOptions {
    pub owner: Option<PublicKey>,
    pub metadata: Option<serde_json::Value>,
}

/// A principal's externally visible handle. Compared by `public_key`
/// identity, never by metadata content.
#[derive(Debug, Clone)]
pub struct Pkr {
    pub uuid: Uuid,
    pub kind: PrincipalKind,
    pub public_key: PublicKey,
    pub metadata: Option<serde_json::Value>,
}

impl PartialEq for Pkr {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
    }
}
impl Eq for Pkr {}

#[derive(Debug, Clone)]
struct PrincipalRecord {
    uuid: Uuid,
    kind: PrincipalKind,
    authority: Authority,
    role: Option<String>,
}

/// Allocates and resolves principals, including ownership (shared
/// private-key) relationships.
///
/// `public_to_private` is the single source of truth for authority
/// resolution and must stay linearizable with respect to routing
/// decisions (§5): readers never observe a torn write.
pub struct PrincipalRegistry {
    records: DashMap<PublicKey, PrincipalRecord>,
    /// private key -> role, survives PKR refresh since it is keyed by
    /// the underlying authority rather than the public token.
    roles_by_private_key: DashMap<PrivateKey, String>,
    kernel_private_key: PrivateKey,
    kernel_public_key: PublicKey,
}

impl PrincipalRegistry {
    /// Creates the registry and its kernel principal. The kernel
    /// principal is, by construction, the first principal created and
    /// its private key is reserved as the kernel authority.
    pub fn new() -> (Self, Pkr) {
        let kernel_private_key = PrivateKey::allocate();
        let kernel_public_key = PublicKey::allocate();
        let registry = PrincipalRegistry {
            records: DashMap::new(),
            roles_by_private_key: DashMap::new(),
            kernel_private_key,
            kernel_public_key,
        };
        let uuid = Uuid::new_v4();
        registry.records.insert(
            kernel_public_key,
            PrincipalRecord {
                uuid,
                kind: PrincipalKind::Kernel,
                authority: Authority::Unique(kernel_private_key),
                role: None,
            },
        );
        let pkr = Pkr {
            uuid,
            kind: PrincipalKind::Kernel,
            public_key: kernel_public_key,
            metadata: None,
        };
        (registry, pkr)
    }

    pub fn kernel_private_key(&self) -> PrivateKey {
        self.kernel_private_key
    }

    pub fn kernel_public_key(&self) -> PublicKey {
        self.kernel_public_key
    }

    /// Allocates a fresh principal. If `owner` is set, the new
    /// principal's public key maps to the owner's private key instead
    /// of a freshly allocated one.
    pub fn create_principal(
        &self,
        kind: PrincipalKind,
        options: CreatePrincipalOptions,
    ) -> Pkr {
        let public_key = PublicKey::allocate();
        let uuid = Uuid::new_v4();
        let authority = match options.owner {
            Some(owner) => Authority::Owned(owner),
            None => Authority::Unique(PrivateKey::allocate()),
        };
        self.records.insert(
            public_key,
            PrincipalRecord {
                uuid,
                kind,
                authority,
                role: None,
            },
        );
        Pkr {
            uuid,
            kind,
            public_key,
            metadata: options.metadata,
        }
    }

    /// Resolves a PKR's authority to its underlying private key,
    /// following ownership chains (which are always exactly one hop
    /// deep: an owner is never itself `Owned`, see invariant below).
    pub fn resolve_pkr(&self, pkr: &Pkr) -> Result<PrivateKey, PrincipalError> {
        self.resolve_public_key(pkr.public_key)
    }

    fn resolve_public_key(&self, public_key: PublicKey) -> Result<PrivateKey, PrincipalError> {
        let record = self
            .records
            .get(&public_key)
            .ok_or_else(|| PrincipalError::UnknownPrincipal {
                uuid: format!("{public_key:?}"),
            })?;
        match record.authority {
            Authority::Unique(private_key) => Ok(private_key),
            Authority::Owned(owner) => {
                drop(record);
                self.resolve_public_key(owner)
            }
        }
    }

    /// True iff `pkr` ultimately resolves to the kernel's private key.
    /// Note this is also true for every kernel-owned child: they share
    /// kernel authority by construction (§9 Open Questions). Callers
    /// that need to distinguish the real kernel from a kernel child
    /// must inspect `pkr.kind` instead.
    pub fn is_kernel(&self, pkr: &Pkr) -> bool {
        matches!(self.resolve_pkr(pkr), Ok(key) if key == self.kernel_private_key)
    }

    pub fn set_role_for_pkr(&self, pkr: &Pkr, role: impl Into<String>) -> Result<(), PrincipalError> {
        let private_key = self.resolve_pkr(pkr)?;
        let role = role.into();
        self.roles_by_private_key.insert(private_key, role.clone());
        if let Some(mut record) = self.records.get_mut(&pkr.public_key) {
            record.role = Some(role);
        }
        Ok(())
    }

    pub fn get_role_for_pkr(&self, pkr: &Pkr) -> Result<Option<String>, PrincipalError> {
        let private_key = self.resolve_pkr(pkr)?;
        Ok(self
            .roles_by_private_key
            .get(&private_key)
            .map(|r| r.clone()))
    }

    /// Allocates a fresh public key for `old_pkr` while preserving its
    /// private key, role, and (by keying on the private key) any RWS
    /// memberships rooted at it.
    pub fn refresh_principal(&self, old_pkr: &Pkr) -> Result<Pkr, PrincipalError> {
        let private_key = self.resolve_pkr(old_pkr)?;
        let new_public_key = PublicKey::allocate();
        let old_record = self
            .records
            .get(&old_pkr.public_key)
            .ok_or_else(|| PrincipalError::UnknownPrincipal {
                uuid: format!("{:?}", old_pkr.public_key),
            })?
            .clone();
        self.records.insert(
            new_public_key,
            PrincipalRecord {
                uuid: old_record.uuid,
                kind: old_record.kind,
                authority: Authority::Unique(private_key),
                role: old_record.role.clone(),
            },
        );
        self.records.remove(&old_pkr.public_key);
        Ok(Pkr {
            uuid: old_record.uuid,
            kind: old_record.kind,
            public_key: new_public_key,
            metadata: old_pkr.metadata.clone(),
        })
    }
}
