//! Tickets: the record of one granted or waiting request (§3 "Ticket", C5).

use crate::context::Context;
use crate::lock_object::LockObject;
use crate::strategy::LockType;
use crate::wait_slot::WaitStatus;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// How long a ticket lives before it is released automatically (§3 "Lock
/// types and durations"). Duration never participates in compatibility
/// decisions; it only governs *when* `release_statement`/
/// `release_transactional`/explicit release reclaim the ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Duration {
    /// Released at the end of the current SQL statement.
    Statement,
    /// Released at the end of the current transaction.
    Transaction,
    /// Released only by an explicit `release` call (e.g. `UNLOCK TABLES`).
    Explicit,
}

/// Process-wide ticket id source. Ticket identity is used for dedup lookups
/// and as the opaque handle returned to callers across the §6.1 boundary.
static NEXT_TICKET_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle to a live ticket, returned by `acquire`/`try_acquire` and
/// accepted by `release`/`upgrade`/`Ticket::downgrade` (§6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(pub(crate) u64);

/// Mutable ticket state: the parts that change after creation without the
/// ticket changing identity (upgrade/downgrade rewrite `lock_type`;
/// materialization flips `is_fast_path`; `set_explicit_for_all`/
/// `set_transactional_for_all` rewrite `duration`).
#[derive(Debug)]
pub struct TicketMut {
    /// The currently granted/requested lock type.
    pub lock_type: LockType,
    /// Whether this ticket is presently accounted for on the fast path
    /// (§3 invariant 4: if true, the ticket is not in `granted`).
    pub is_fast_path: bool,
    /// Which per-context list this ticket currently lives on.
    pub duration: Duration,
}

/// A granted or waiting request, owned by exactly one
/// [`Context`](crate::context::Context) and (weakly, via shared ownership)
/// referenced by at most one [`LockObject`] list at a time (§3 "Ticket").
///
/// The original keeps tickets on three intrusive lists (context duration
/// list, lock granted list, lock waiting list) linked by raw pointers. This
/// crate forbids `unsafe`, so membership is instead "the same `Arc<Ticket>`
/// clone lives in both collections"; a ticket is fully released once the
/// last list drops its clone and the context drops its own, which is the
/// same observable lifetime the original's pointer dance produces.
#[derive(Debug)]
pub struct Ticket {
    id: TicketId,
    context_id: u64,
    owner: Weak<Context>,
    /// Caller-provided weight used by the deadlock detector's victim
    /// selection when this ticket is the one a context is waiting on
    /// (§4.7 "Victim selection & weight").
    deadlock_weight: i64,
    lock: Arc<LockObject>,
    state: Mutex<TicketMut>,
}

impl Ticket {
    /// Creates a new ticket in the given initial state. Called only from
    /// the acquire path (§4.5), which is responsible for pushing the
    /// resulting `Arc` onto both the context's duration list and the
    /// lock's granted/waiting list as appropriate.
    #[must_use]
    pub fn new(
        owner: &Arc<Context>,
        lock: Arc<LockObject>,
        lock_type: LockType,
        duration: Duration,
        deadlock_weight: i64,
        is_fast_path: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: TicketId(NEXT_TICKET_ID.fetch_add(1, Ordering::Relaxed)),
            context_id: owner.id(),
            owner: Arc::downgrade(owner),
            deadlock_weight,
            lock,
            state: Mutex::new(TicketMut { lock_type, is_fast_path, duration }),
        })
    }

    /// Builds a ticket with no real owning context, for unit tests in
    /// modules (e.g. `lock_object`) that exercise list/bitmap bookkeeping
    /// without needing a full `Context`. `try_grant` on such a ticket is
    /// always a no-op since the weak owner never upgrades.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn new_detached(
        context_id: u64,
        lock: Arc<LockObject>,
        lock_type: LockType,
        duration: Duration,
        deadlock_weight: i64,
        is_fast_path: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: TicketId(NEXT_TICKET_ID.fetch_add(1, Ordering::Relaxed)),
            context_id,
            owner: Weak::new(),
            deadlock_weight,
            lock,
            state: Mutex::new(TicketMut { lock_type, is_fast_path, duration }),
        })
    }

    /// This ticket's opaque handle.
    #[must_use]
    pub const fn id(&self) -> TicketId {
        self.id
    }

    /// The id of the context that owns this ticket.
    #[must_use]
    pub const fn context_id(&self) -> u64 {
        self.context_id
    }

    /// The duration this ticket is released by.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.lock_state().duration
    }

    /// The caller-provided deadlock weight for this ticket's request.
    #[must_use]
    pub const fn deadlock_weight(&self) -> i64 {
        self.deadlock_weight
    }

    /// The `LockObject` this ticket names.
    #[must_use]
    pub fn lock(&self) -> &Arc<LockObject> {
        &self.lock
    }

    /// The currently granted/requested lock type.
    #[must_use]
    pub fn lock_type(&self) -> LockType {
        self.lock_state().lock_type
    }

    /// Whether this ticket is presently on the fast path.
    #[must_use]
    pub fn is_fast_path(&self) -> bool {
        self.lock_state().is_fast_path
    }

    /// Whether this ticket's current type is at least as strong as
    /// `other` (§4.5 step 1 dedup, §4.5 "Upgrade").
    #[must_use]
    pub fn has_stronger_or_equal(&self, other: LockType) -> bool {
        self.lock_type().is_stronger_or_equal(other)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TicketMut> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Rewrites the ticket's type in place. Used by upgrade/downgrade
    /// (§4.5) while the caller holds the owning lock's write-lock.
    pub fn set_lock_type(&self, lock_type: LockType) {
        self.lock_state().lock_type = lock_type;
    }

    /// Flips the fast-path flag. Used by materialization (§3 invariant 5)
    /// and by the initial fast-path grant (§4.5 step 6).
    pub fn set_is_fast_path(&self, is_fast_path: bool) {
        self.lock_state().is_fast_path = is_fast_path;
    }

    /// Moves this ticket to a different per-context duration list without
    /// changing its identity or its membership in the lock's granted list
    /// (§4.9 `set_explicit_duration_for_all`/`set_transaction_duration_for_all`).
    /// The caller is responsible for moving the `Arc` between the context's
    /// own `Vec`-backed lists to match.
    pub(crate) fn set_duration(&self, duration: Duration) {
        self.lock_state().duration = duration;
    }

    /// The owning context, if it is still alive.
    #[must_use]
    pub fn owner(&self) -> Option<Arc<Context>> {
        self.owner.upgrade()
    }

    /// §4.5 `downgrade`: rewrites this granted ticket's type to a weaker
    /// one in place and reschedules any waiters that can now be granted
    /// as a result.
    ///
    /// # Errors
    /// [`crate::error::MdlError::UpgradeNotAllowed`] if `new_type` is not
    /// weaker-or-equal to the ticket's current type — a caller precondition
    /// violation (§7 "internal assertion").
    pub fn downgrade(self: &Arc<Self>, new_type: LockType) -> crate::error::MdlResult<()> {
        if !self.has_stronger_or_equal(new_type) {
            return Err(crate::error::MdlError::UpgradeNotAllowed(
                "downgrade target must not be stronger than the current type".to_string(),
            ));
        }
        if self.lock_type() == new_type {
            return Ok(());
        }

        let lock = Arc::clone(&self.lock);
        let mut state = lock.write();
        state.remove_ticket(crate::lock_object::TicketList::Granted, self.id());
        self.set_lock_type(new_type);
        state.add_granted(Arc::clone(self));
        if new_type.fast_path_increment() != 0 {
            state.obtrusive_count -= 1;
        }
        state.reschedule_waiters(lock.family(), crate::config::current().max_write_lock_count);
        Ok(())
    }

    /// Attempts to transition the owning context's wait slot to `Granted`
    /// (§4.5 `reschedule_waiters`). Returns `false` if the owner is gone or
    /// another party already resolved the wait (already timed out or was
    /// chosen as victim) — the caller must then leave the ticket on the
    /// waiting list for its owner to clean up.
    #[must_use]
    pub fn try_grant(&self) -> bool {
        match self.owner.upgrade() {
            Some(ctx) => ctx.wait_slot().set(WaitStatus::Granted),
            None => false,
        }
    }
}

impl PartialEq for Ticket {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Ticket {}
