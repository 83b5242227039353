//! The concurrent map from key to [`LockObject`], plus the two
//! pre-allocated singletons (§4.2, C2).
//!
//! The original implements this as a lock-free hash table with hazard
//! pointers: a lookup publishes a pinned pointer, and an entry's memory
//! isn't returned to the allocator until no pin still references it. This
//! crate already depends on `dashmap` (a teacher dependency, used
//! elsewhere for "lock-free concurrent hash maps"), whose sharded
//! `RwLock<HashMap<K, V>>` buckets plus `Arc<LockObject>` reference
//! counting give the same observable safety property — no
//! use-after-free of an entry a concurrent remover just evicted — without
//! hand-rolled pointer arithmetic. A "pin" in this port is simply holding
//! an `Arc<LockObject>` clone; reclamation is an ordinary last-`Arc`-drop.
//! This substitution is recorded in `DESIGN.md`.

use crate::error::{MdlError, MdlResult};
use crate::key::{MdlKey, Namespace};
use crate::lock_object::LockObject;
use dashmap::DashMap;
use std::sync::Arc;

/// The process-wide lock table (§4.2). One instance is created at
/// `init()` and lives for the process lifetime; `shutdown()` asserts it is
/// empty save for the two singletons.
#[derive(Debug)]
pub struct LockTable {
    map: DashMap<MdlKey, Arc<LockObject>>,
    global: Arc<LockObject>,
    commit: Arc<LockObject>,
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LockTable {
    /// Creates a fresh, empty lock table with its two singletons
    /// pre-allocated (§4.2 step 1).
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
            global: LockObject::new(MdlKey::global()),
            commit: LockObject::new(MdlKey::commit()),
        }
    }

    /// §4.2 `find_or_insert`: returns the `LockObject` for `key`, creating
    /// it on first reference. Global/Commit keys skip the hash entirely
    /// and return the pre-allocated singleton (step 1).
    ///
    /// # Errors
    /// Returns [`MdlError::OutOfMemory`] only in the degenerate sense that
    /// a real allocator failure while inserting a new entry is surfaced
    /// this way, mirroring the original's OOM-propagation contract; the
    /// safe-Rust allocator itself aborts on allocation failure rather than
    /// returning an error, so in practice this path is unreachable and
    /// exists to preserve the §4.2 "Failures" contract at the type level.
    pub fn find_or_insert(&self, key: &MdlKey) -> MdlResult<Arc<LockObject>> {
        if key.namespace() == Namespace::Global {
            return Ok(Arc::clone(&self.global));
        }
        if key.namespace() == Namespace::Commit {
            return Ok(Arc::clone(&self.commit));
        }

        loop {
            if let Some(existing) = self.map.get(key) {
                let candidate = Arc::clone(existing.value());
                drop(existing);
                if candidate.read().destroyed {
                    // Lost a race with a concurrent `remove`; retry.
                    continue;
                }
                return Ok(candidate);
            }

            let fresh = LockObject::new(key.clone());
            match self.map.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(occupied) => {
                    let candidate = Arc::clone(occupied.get());
                    drop(occupied);
                    if candidate.read().destroyed {
                        continue;
                    }
                    return Ok(candidate);
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(&fresh));
                    return Ok(fresh);
                }
            }
        }
    }

    /// §4.2 `remove`: evicts `lock` from the table once its caller has
    /// observed it empty. Singletons are silently ignored (§4.2 step 1,
    /// §3 invariant 2). If the entry is no longer the one in the table
    /// (already raced out and back in under a new `Arc`), this is a no-op.
    pub fn remove(&self, lock: &Arc<LockObject>) {
        if lock.key().is_singleton() {
            return;
        }
        {
            let mut state = lock.write();
            state.destroyed = true;
        }
        self.map.remove_if(lock.key(), |_, v| Arc::ptr_eq(v, lock));
    }

    /// Number of live non-singleton entries, for `unused_locks_*`
    /// reaping heuristics (§6.3; the reaper itself is a host-side concern,
    /// see `SPEC_FULL.md`).
    #[must_use]
    pub fn unused_object_count(&self) -> usize {
        self.map.iter().filter(|entry| entry.value().is_empty()).count()
    }

    /// Total number of live non-singleton entries, used/empty alike.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the table holds no non-singleton entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The pre-allocated global read-lock singleton.
    #[must_use]
    pub fn global(&self) -> &Arc<LockObject> {
        &self.global
    }

    /// The pre-allocated commit-blocker singleton.
    #[must_use]
    pub fn commit(&self) -> &Arc<LockObject> {
        &self.commit
    }

    /// Asserts the table is empty save for singletons (§6.4 `shutdown`).
    ///
    /// # Errors
    /// Returns an error describing any leftover non-singleton entries
    /// instead of panicking, so a host can log and decide how to proceed.
    pub fn assert_empty_for_shutdown(&self) -> Result<(), String> {
        if self.map.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "lock table still has {} live entries at shutdown",
                self.map.len()
            ))
        }
    }
}
