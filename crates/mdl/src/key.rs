//! Opaque composite keys identifying a lockable schema object (§3, §4.1).

use serde::{Deserialize, Serialize};
use std::fmt;

/// The namespace tag distinguishing the kind of object an [`MdlKey`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Namespace {
    /// The single global read-lock namespace (singleton key).
    Global,
    /// Tablespace identity.
    Tablespace,
    /// Schema (database) identity.
    Schema,
    /// Table identity.
    Table,
    /// Stored function identity.
    Function,
    /// Stored procedure identity.
    Procedure,
    /// Trigger identity.
    Trigger,
    /// Event identity.
    Event,
    /// The single commit-blocker namespace (singleton key).
    Commit,
    /// Named `GET_LOCK()`-style user lock.
    UserLock,
    /// Locking-service (application-defined) lock.
    LockingService,
}

impl Namespace {
    /// Whether this namespace addresses one of the two pre-allocated
    /// singleton keys (§4.2 step 1).
    #[must_use]
    pub const fn is_singleton(self) -> bool {
        matches!(self, Namespace::Global | Namespace::Commit)
    }

    /// Whether this namespace uses the restricted scoped-lock type family
    /// (§4.4) rather than the object family.
    #[must_use]
    pub const fn is_scoped(self) -> bool {
        matches!(
            self,
            Namespace::Global | Namespace::Commit | Namespace::Schema | Namespace::Tablespace
        )
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Composite `(namespace, db, name)` key, compared and hashed as a
/// null-byte-separated byte string (§4.1). Two well-known keys address
/// singleton `LockObject`s: [`MdlKey::global`] and [`MdlKey::commit`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MdlKey {
    namespace: Namespace,
    db: String,
    name: String,
}

impl MdlKey {
    /// Builds a key from its three parts.
    #[must_use]
    pub fn new(namespace: Namespace, db: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace,
            db: db.into(),
            name: name.into(),
        }
    }

    /// The well-known global read-lock key.
    #[must_use]
    pub fn global() -> Self {
        Self::new(Namespace::Global, "", "")
    }

    /// The well-known commit-blocker key.
    #[must_use]
    pub fn commit() -> Self {
        Self::new(Namespace::Commit, "", "")
    }

    /// This key's namespace tag.
    #[must_use]
    pub const fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// The schema/database component, empty for namespaces that do not use it.
    #[must_use]
    pub fn db(&self) -> &str {
        &self.db
    }

    /// The object name component.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this key addresses a pre-allocated singleton `LockObject`.
    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.namespace.is_singleton()
    }

    /// The serialized null-byte-separated form used for consistent
    /// ordering and hashing across the lock table (§4.1).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.db.len() + self.name.len() + 3);
        buf.push(self.namespace as u8);
        buf.push(0);
        buf.extend_from_slice(self.db.as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.name.as_bytes());
        buf
    }
}

impl fmt::Display for MdlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.namespace, self.db, self.name)
    }
}
