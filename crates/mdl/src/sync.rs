//! Reader-preferring mutual exclusion.
//!
//! [`PreferReaderLock`] backs every [`LockObject`](crate::lock_object::LockObject)
//! and a context's `waiting_for` edge. Plain `std::sync::RwLock` has an
//! unspecified (and on most platforms writer-preferring) fairness policy,
//! which would let a pending writer block a reader that arrives after it.
//! The deadlock detector walks the wait-for graph under a read lock on
//! exactly these structures, so a writer-preferring discipline could let an
//! in-flight grant decision stall behind a waiter the detector must be able
//! to see past (§5, §4.3 invariant 6).
//!
//! The workspace forbids `unsafe`, so this is not a hand-rolled futex: a
//! `Mutex`-and-`Condvar` gate decides *when* a thread is allowed to take the
//! actual `std::sync::RwLock` guard on the data, and enforces the ordering
//! std's own lock does not promise. By the time a writer passes the gate,
//! the gate's own bookkeeping guarantees no reader is still waiting to call
//! `read()`, so the inner `RwLock` itself never sees contention the gate
//! hasn't already resolved.

use std::sync::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct Gate {
    active_readers: u32,
    writer_active: bool,
    waiting_writers: u32,
}

/// A mutual-exclusion lock that never lets a waiting writer block a new
/// reader. Writers still wait for all active readers to drain, and only one
/// writer holds the lock at a time.
pub struct PreferReaderLock<T> {
    data: RwLock<T>,
    gate: Mutex<Gate>,
    readable: Condvar,
    writable: Condvar,
}

impl<T> std::fmt::Debug for PreferReaderLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferReaderLock").finish_non_exhaustive()
    }
}

fn lock_gate(mutex: &Mutex<Gate>) -> MutexGuard<'_, Gate> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl<T> PreferReaderLock<T> {
    /// Wraps `data` in a new reader-preferring lock.
    pub fn new(data: T) -> Self {
        Self {
            data: RwLock::new(data),
            gate: Mutex::new(Gate {
                active_readers: 0,
                writer_active: false,
                waiting_writers: 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Acquires a shared read guard. Blocks only while a writer is holding
    /// the lock, never while one is merely waiting.
    pub fn read(&self) -> ReadGuard<'_, T> {
        let mut gate = lock_gate(&self.gate);
        while gate.writer_active {
            gate = self
                .readable
                .wait(gate)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        gate.active_readers += 1;
        drop(gate);

        let inner = self
            .data
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        ReadGuard { lock: self, inner }
    }

    /// Acquires the exclusive write guard, blocking until no reader or
    /// writer holds the lock.
    pub fn write(&self) -> WriteGuard<'_, T> {
        let mut gate = lock_gate(&self.gate);
        gate.waiting_writers += 1;
        while gate.writer_active || gate.active_readers > 0 {
            gate = self
                .writable
                .wait(gate)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        gate.waiting_writers -= 1;
        gate.writer_active = true;
        drop(gate);

        let inner = self
            .data
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        WriteGuard { lock: self, inner }
    }

    fn release_read(&self) {
        let mut gate = lock_gate(&self.gate);
        gate.active_readers -= 1;
        let should_wake_writers = gate.active_readers == 0 && gate.waiting_writers > 0;
        drop(gate);
        if should_wake_writers {
            self.writable.notify_all();
        }
    }

    fn release_write(&self) {
        let mut gate = lock_gate(&self.gate);
        gate.writer_active = false;
        drop(gate);
        // Readers always get first refusal; any writer still waiting will
        // re-check `writer_active`/`active_readers` and requeue itself.
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

impl<T: Default> Default for PreferReaderLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII shared-read guard returned by [`PreferReaderLock::read`].
pub struct ReadGuard<'a, T> {
    lock: &'a PreferReaderLock<T>,
    inner: RwLockReadGuard<'a, T>,
}

impl<T> std::ops::Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

/// RAII exclusive-write guard returned by [`PreferReaderLock::write`].
pub struct WriteGuard<'a, T> {
    lock: &'a PreferReaderLock<T>,
    inner: RwLockWriteGuard<'a, T>,
}

impl<T> std::ops::Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> std::ops::DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}
