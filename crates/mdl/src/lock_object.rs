//! Per-key lock state: granted/waiting ticket lists, fast-path counters,
//! the obtrusive count, and the hog-lock anti-starvation counter (§3
//! "LockObject", C3).

use crate::key::MdlKey;
use crate::strategy::Family;
use crate::sync::{PreferReaderLock, ReadGuard, WriteGuard};
use crate::ticket::Ticket;
use std::sync::Arc;

/// Which of a `LockObject`'s two ticket lists an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketList {
    /// The granted list (§3).
    Granted,
    /// The waiting list (§3).
    Waiting,
}

/// The mutable half of a [`LockObject`], behind its reader-preferring
/// rwlock (§3 invariant 6, §5 "Lock discipline").
#[derive(Debug)]
pub struct LockObjectState {
    pub(crate) granted: Vec<Arc<Ticket>>,
    pub(crate) granted_bitmap: u16,
    pub(crate) waiting: Vec<Arc<Ticket>>,
    pub(crate) waiting_bitmap: u16,
    pub(crate) fast_path_granted_count: u64,
    pub(crate) obtrusive_count: i64,
    pub(crate) hog_lock_count: u64,
    /// Set by `LockTable::remove` while racing a concurrent `find_or_insert`
    /// (§4.2); never set on a singleton.
    pub(crate) destroyed: bool,
}

impl LockObjectState {
    fn new() -> Self {
        Self {
            granted: Vec::new(),
            granted_bitmap: 0,
            waiting: Vec::new(),
            waiting_bitmap: 0,
            fast_path_granted_count: 0,
            obtrusive_count: 0,
            hog_lock_count: 0,
            destroyed: false,
        }
    }

    /// §3 invariant 1: empty iff the fast-path counter, the granted list,
    /// and the waiting list are all empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fast_path_granted_count == 0 && self.granted.is_empty() && self.waiting.is_empty()
    }

    /// Number of requests currently obtrusive (§3 "obtrusive_count"): every
    /// granted-or-waiting ticket whose type has a zero fast-path increment.
    #[must_use]
    pub const fn obtrusive_count(&self) -> i64 {
        self.obtrusive_count
    }

    /// The packed per-type fast-path counter (§4.4 "Fast-path increments").
    #[must_use]
    pub const fn fast_path_granted_count(&self) -> u64 {
        self.fast_path_granted_count
    }

    /// Number of tickets currently on the granted list (fast-path holders
    /// are not counted here; see §3 invariant 4).
    #[must_use]
    pub fn granted_count(&self) -> usize {
        self.granted.len()
    }

    /// Number of tickets currently parked on the waiting list.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Consecutive hog-type grants since the waiting set last contained no
    /// non-hog type (§4.4 "Anti-starvation").
    #[must_use]
    pub const fn hog_lock_count(&self) -> u64 {
        self.hog_lock_count
    }

    fn recompute_granted_bitmap(&mut self) {
        self.granted_bitmap = self.granted.iter().fold(0, |acc, t| acc | t.lock_type().bit());
    }

    fn recompute_waiting_bitmap(&mut self) {
        self.waiting_bitmap = self.waiting.iter().fold(0, |acc, t| acc | t.lock_type().bit());
    }

    /// Appends `ticket` to the granted list (§4.3 `add_granted`).
    pub fn add_granted(&mut self, ticket: Arc<Ticket>) {
        self.granted_bitmap |= ticket.lock_type().bit();
        self.granted.push(ticket);
    }

    /// Appends `ticket` to the waiting list, preserving FIFO order (§4.3
    /// `add_waiting`).
    pub fn add_waiting(&mut self, ticket: Arc<Ticket>) {
        self.waiting_bitmap |= ticket.lock_type().bit();
        self.waiting.push(ticket);
    }

    /// Removes the ticket with `ticket_id` from `list`, recomputing that
    /// list's bitmap from what remains (§4.3 `remove_ticket`).
    pub fn remove_ticket(
        &mut self,
        list: TicketList,
        ticket_id: crate::ticket::TicketId,
    ) -> Option<Arc<Ticket>> {
        let target = match list {
            TicketList::Granted => &mut self.granted,
            TicketList::Waiting => &mut self.waiting,
        };
        let pos = target.iter().position(|t| t.id() == ticket_id)?;
        let removed = target.remove(pos);
        match list {
            TicketList::Granted => self.recompute_granted_bitmap(),
            TicketList::Waiting => self.recompute_waiting_bitmap(),
        }
        Some(removed)
    }

    /// §4.3 `can_grant`: true iff a request for `lock_type` by
    /// `requestor_context_id` may be granted immediately.
    #[must_use]
    pub fn can_grant(
        &self,
        lock_type: crate::strategy::LockType,
        requestor_context_id: u64,
        ignore_priority: bool,
    ) -> bool {
        let priority_ok = ignore_priority || (self.waiting_bitmap & lock_type.waiting_incompat() == 0);
        if !priority_ok {
            return false;
        }
        let fast_path_bitmap =
            crate::strategy::ObjectLockType::fast_path_granted_bitmap(self.fast_path_granted_count);
        if fast_path_bitmap & lock_type.granted_incompat() != 0 {
            return false;
        }
        if self.granted_bitmap & lock_type.granted_incompat() == 0 {
            return true;
        }
        // A conflict bit is set; it is only forgivable if every granted
        // ticket producing it belongs to the requestor itself.
        self.granted.iter().all(|t| {
            t.context_id() == requestor_context_id || t.lock_type().granted_incompat() & lock_type.bit() == 0
        })
    }

    /// §4.5 `reschedule_waiters`: grants as many FIFO-eligible waiters as
    /// possible, honoring hog-lock anti-starvation. Returns the tickets
    /// moved from `waiting` to `granted`, in the order they were granted,
    /// so the caller can flip each one's wait slot.
    #[must_use]
    pub fn reschedule_waiters(
        &mut self,
        family: Family,
        max_write_lock_count: u64,
    ) -> Vec<Arc<Ticket>> {
        let hog_types = family.hog_types();
        let skip_hog = self.hog_lock_count >= max_write_lock_count && (self.waiting_bitmap & !hog_types) != 0;

        let waiting = std::mem::take(&mut self.waiting);
        let mut granted_now = Vec::new();
        let mut remaining: Vec<Arc<Ticket>> = Vec::with_capacity(waiting.len());

        for (idx, ticket) in waiting.iter().enumerate() {
            let ticket = Arc::clone(ticket);
            let lock_type = ticket.lock_type();
            let is_hog = lock_type.bit() & hog_types != 0;
            if skip_hog && is_hog {
                remaining.push(ticket);
                continue;
            }
            if self.can_grant(lock_type, ticket.context_id(), skip_hog) && ticket.try_grant() {
                self.granted_bitmap |= lock_type.bit();
                if is_hog {
                    self.hog_lock_count += 1;
                }
                granted_now.push(Arc::clone(&ticket));
                self.granted.push(ticket);
                // A later waiter's `can_grant` call in this same pass must
                // see this grant reflected immediately, the way the
                // original removes a granted ticket from `m_waiting` in
                // place rather than leaving a stale bitmap for the rest of
                // the pass (§4.5 `reschedule_waiters`): recompute from
                // exactly what is still pending — the waiters deferred so
                // far, plus the ones not yet visited.
                self.waiting_bitmap = remaining
                    .iter()
                    .chain(waiting[idx + 1..].iter())
                    .fold(0, |acc, t| acc | t.lock_type().bit());
            } else {
                remaining.push(ticket);
            }
        }
        self.waiting = remaining;
        self.recompute_waiting_bitmap();
        if self.waiting_bitmap & !hog_types == 0 {
            self.hog_lock_count = 0;
        }
        granted_now
    }
}

/// One instance per live key (§3 "LockObject"). Two singletons
/// (global/commit, §4.2) are never destroyed or removed from the lock
/// table; every other instance is created on first reference and removed
/// by whichever thread observes it empty after a release.
#[derive(Debug)]
pub struct LockObject {
    key: MdlKey,
    family: Family,
    state: PreferReaderLock<LockObjectState>,
}

impl LockObject {
    /// Creates a fresh, empty `LockObject` for `key`.
    #[must_use]
    pub fn new(key: MdlKey) -> Arc<Self> {
        let family = Family::of(key.namespace());
        Arc::new(Self {
            key,
            family,
            state: PreferReaderLock::new(LockObjectState::new()),
        })
    }

    /// This object's key.
    #[must_use]
    pub const fn key(&self) -> &MdlKey {
        &self.key
    }

    /// The namespace family governing this object's compatibility tables.
    #[must_use]
    pub const fn family(&self) -> Family {
        self.family
    }

    /// Acquires the read-lock (§5 "Lock discipline": used by
    /// `has_pending_conflicting_lock` and `visit_subgraph`).
    #[must_use]
    pub fn read(&self) -> ReadGuard<'_, LockObjectState> {
        self.state.read()
    }

    /// Acquires the write-lock (§5: all state-modifying operations).
    #[must_use]
    pub fn write(&self) -> WriteGuard<'_, LockObjectState> {
        self.state.write()
    }

    /// Whether this object is currently empty (§3 invariant 1), taking the
    /// read-lock itself.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Direct edges out of `waiting_ticket`'s owning context for the
    /// deadlock detector (§4.7 "Edges"): contexts holding a granted ticket
    /// incompatible with `waiting_ticket`'s type, plus contexts holding an
    /// earlier waiting ticket incompatible-when-waiting with it.
    #[must_use]
    pub fn conflicting_context_ids(&self, waiting_ticket: &Arc<Ticket>) -> Vec<u64> {
        let state = self.read();
        let lock_type = waiting_ticket.lock_type();
        let mut ids: Vec<u64> = state
            .granted
            .iter()
            .filter(|t| t.lock_type().granted_incompat() & lock_type.bit() != 0)
            .map(|t| t.context_id())
            .collect();
        for earlier in &state.waiting {
            if earlier.id() == waiting_ticket.id() {
                break;
            }
            if earlier.lock_type().waiting_incompat() & lock_type.bit() != 0
                || lock_type.waiting_incompat() & earlier.lock_type().bit() != 0
            {
                ids.push(earlier.context_id());
            }
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
