//! The acquire/release kernel and the rest of `Context`'s request-handling
//! surface (§4.5, §4.9, C7).
//!
//! Everything here is `impl Context` methods defined in this module rather
//! than in `context.rs`, the way the original splits the `MDL_context`
//! class's declaration from the `.cc` file that implements its scheduling
//! logic.

use crate::context::{Context, WaitEdge};
use crate::error::{MdlError, MdlResult};
use crate::key::MdlKey;
use crate::lock_object::{LockObject, TicketList};
use crate::lock_table::LockTable;
use crate::strategy::LockType;
use crate::ticket::{Duration as TicketDuration, Ticket};
use crate::wait_slot::{WaitSlot, WaitStatus};
use std::sync::{Arc, PoisonError};
use std::time::{Duration as StdDuration, Instant};

/// A request to acquire one lock type on one key (§6.1 `Request::new`).
#[derive(Debug, Clone)]
pub struct Request {
    key: MdlKey,
    lock_type: LockType,
    duration: TicketDuration,
    deadlock_weight: i64,
}

impl Request {
    /// Builds a request with the default `DML` deadlock weight (§4.7).
    #[must_use]
    pub fn new(key: MdlKey, lock_type: LockType, duration: TicketDuration) -> Self {
        Self { key, lock_type, duration, deadlock_weight: crate::deadlock::weight::DML }
    }

    /// Overrides this request's deadlock weight, e.g. to
    /// `crate::deadlock::weight::DDL` for a statement that should be
    /// preferred as the survivor in a cycle.
    #[must_use]
    pub fn with_weight(mut self, deadlock_weight: i64) -> Self {
        self.deadlock_weight = deadlock_weight;
        self
    }

    /// The key this request names.
    #[must_use]
    pub const fn key(&self) -> &MdlKey {
        &self.key
    }

    /// The lock type requested.
    #[must_use]
    pub const fn lock_type(&self) -> LockType {
        self.lock_type
    }
}

/// Result of a non-blocking acquire attempt (§6.1 `try_acquire`).
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    /// The request was satisfied immediately.
    Granted(Arc<Ticket>),
    /// The request would have to wait; no ticket was created.
    NotGranted,
}

/// A mark recorded by [`Context::savepoint`], consumed by
/// [`Context::rollback_to`] (§4.5 "Savepoints & bulk release").
#[derive(Debug, Clone, Copy)]
pub struct Savepoint {
    statement_len: usize,
    transaction_len: usize,
}

enum GrantAttempt {
    Granted(Arc<Ticket>),
    Waiting(Arc<Ticket>, Arc<LockObject>),
}

impl Context {
    /// §4.5 step 1: reuses an existing ticket on the same key at least as
    /// strong as `req`, cloning it onto a different duration list only when
    /// durations differ (or the target is `Explicit`), so that an
    /// `Explicit`-duration reacquire never shares lifetime with a
    /// transaction-scoped ticket.
    fn try_reuse_existing(&self, req: &Request) -> Option<Arc<Ticket>> {
        let existing = self
            .all_tickets()
            .into_iter()
            .find(|t| t.lock().key() == &req.key && t.has_stronger_or_equal(req.lock_type))?;

        if existing.duration() == req.duration && req.duration != TicketDuration::Explicit {
            return Some(existing);
        }

        let lock = Arc::clone(existing.lock());
        let cloned = Ticket::new(
            &self.arc(),
            Arc::clone(&lock),
            existing.lock_type(),
            req.duration,
            req.deadlock_weight,
            existing.is_fast_path(),
        );

        if existing.is_fast_path() {
            let mut state = lock.write();
            state.fast_path_granted_count += cloned.lock_type().fast_path_increment();
        } else {
            let mut state = lock.write();
            state.add_granted(Arc::clone(&cloned));
            if cloned.lock_type().fast_path_increment() == 0 {
                state.obtrusive_count += 1;
            }
        }
        self.push_to_duration_list(req.duration, Arc::clone(&cloned));
        Some(cloned)
    }

    /// §3 invariant 5: moves every fast-path ticket this context holds into
    /// its owning lock's `granted` list before the context is allowed to
    /// wait on anything, so the deadlock detector always sees a complete
    /// graph.
    fn materialize_fast_path_tickets(&self) {
        for ticket in self.all_tickets() {
            if ticket.is_fast_path() {
                let lock = Arc::clone(ticket.lock());
                {
                    let mut state = lock.write();
                    state.fast_path_granted_count -= ticket.lock_type().fast_path_increment();
                    state.add_granted(Arc::clone(&ticket));
                }
                ticket.set_is_fast_path(false);
            }
        }
    }

    fn push_to_duration_list(&self, duration: TicketDuration, ticket: Arc<Ticket>) {
        self.duration_list(duration)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ticket);
    }

    fn remove_from_duration_list(&self, ticket: &Arc<Ticket>) {
        self.duration_list(ticket.duration())
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|t| t.id() != ticket.id());
    }

    /// §4.5 steps 2-8, shared by `try_acquire` and `acquire`: dedups,
    /// chooses fast path vs. slow path, and either grants immediately or
    /// returns an ungranted ticket the caller must decide whether to wait
    /// on.
    fn attempt_grant(&self, table: &LockTable, req: &Request) -> MdlResult<GrantAttempt> {
        if let Some(ticket) = self.try_reuse_existing(req) {
            return Ok(GrantAttempt::Granted(ticket));
        }

        let incr = req.lock_type.fast_path_increment();
        let force_slow = incr == 0 || self.needs_thr_lock_abort();

        if incr == 0 {
            self.materialize_fast_path_tickets();
        }

        // §4.2 step 3: `find_or_insert` may have returned an entry that a
        // concurrent `release` + `LockTable::remove` destroys and evicts
        // before we take its write-lock here; recheck `destroyed` under the
        // write-lock itself and retry the whole find-then-lock sequence
        // whenever that race is observed, rather than proceeding against a
        // stale, already-evicted `LockObject`.
        let mut lock = table.find_or_insert(&req.key)?;
        let mut state = loop {
            let candidate_state = lock.write();
            if candidate_state.destroyed {
                drop(candidate_state);
                lock = table.find_or_insert(&req.key)?;
                continue;
            }
            break candidate_state;
        };
        if !force_slow && state.obtrusive_count == 0 {
            state.fast_path_granted_count += incr;
            drop(state);
            let ticket = Ticket::new(
                &self.arc(),
                Arc::clone(&lock),
                req.lock_type,
                req.duration,
                req.deadlock_weight,
                true,
            );
            self.push_to_duration_list(req.duration, Arc::clone(&ticket));
            return Ok(GrantAttempt::Granted(ticket));
        }

        if state.can_grant(req.lock_type, self.id(), false) {
            let ticket = Ticket::new(
                &self.arc(),
                Arc::clone(&lock),
                req.lock_type,
                req.duration,
                req.deadlock_weight,
                false,
            );
            state.add_granted(Arc::clone(&ticket));
            if incr == 0 {
                state.obtrusive_count += 1;
            }
            drop(state);
            self.push_to_duration_list(req.duration, Arc::clone(&ticket));
            return Ok(GrantAttempt::Granted(ticket));
        }

        drop(state);
        let ticket = Ticket::new(
            &self.arc(),
            Arc::clone(&lock),
            req.lock_type,
            req.duration,
            req.deadlock_weight,
            false,
        );
        Ok(GrantAttempt::Waiting(ticket, lock))
    }

    /// §6.1 `try_acquire`: never blocks. A request that cannot be granted
    /// immediately is reported as [`AcquireOutcome::NotGranted`] without
    /// ever entering the wait-for graph (§4.5 step 8).
    ///
    /// # Errors
    /// Propagates [`MdlError::OutOfMemory`] from the lock table.
    pub fn try_acquire(&self, table: &LockTable, req: &Request) -> MdlResult<AcquireOutcome> {
        match self.attempt_grant(table, req)? {
            GrantAttempt::Granted(ticket) => Ok(AcquireOutcome::Granted(ticket)),
            GrantAttempt::Waiting(..) => Ok(AcquireOutcome::NotGranted),
        }
    }

    /// §6.1 `acquire`: blocks up to `timeout` for the request to be
    /// granted, registering this context in the wait-for graph and running
    /// the deadlock detector if it cannot be granted immediately.
    ///
    /// # Errors
    /// [`MdlError::Deadlock`], [`MdlError::Timeout`],
    /// [`MdlError::Killed`]/[`MdlError::Disconnected`], or
    /// [`MdlError::OutOfMemory`].
    pub fn acquire(
        &self,
        table: &LockTable,
        req: &Request,
        timeout: StdDuration,
    ) -> MdlResult<Arc<Ticket>> {
        let deadline = Instant::now() + timeout;
        match self.attempt_grant(table, req)? {
            GrantAttempt::Granted(ticket) => Ok(ticket),
            GrantAttempt::Waiting(ticket, lock) => self.wait_for_ticket(table, ticket, lock, deadline),
        }
    }

    fn notify_conflicting(&self, lock: &Arc<LockObject>, ticket: &Arc<Ticket>) {
        for context_id in lock.conflicting_context_ids(ticket) {
            if let Some(ctx) = crate::context::lookup_context(context_id) {
                self.owner().notify_shared_lock(context_id, ctx.needs_thr_lock_abort());
            }
        }
    }

    /// §4.5 steps 9-13: the parked half of `acquire`.
    fn wait_for_ticket(
        &self,
        table: &LockTable,
        mut ticket: Arc<Ticket>,
        mut lock: Arc<LockObject>,
        deadline: Instant,
    ) -> MdlResult<Arc<Ticket>> {
        let is_obtrusive = ticket.lock_type().is_obtrusive();
        {
            // §4.2 step 3: the same race as `attempt_grant`'s first
            // write-lock acquisition — `lock` here was verified live when
            // `attempt_grant` built it, but that write-lock was dropped
            // before returning `GrantAttempt::Waiting`, leaving another
            // window for a concurrent `remove` to destroy and evict it
            // before this write-lock is taken. Retry against a fresh
            // `LockObject` (and a fresh ticket bound to it, since a
            // ticket's `lock` field is fixed at construction) whenever
            // that race is observed.
            let mut state = loop {
                let candidate_state = lock.write();
                if candidate_state.destroyed {
                    drop(candidate_state);
                    lock = table.find_or_insert(lock.key())?;
                    ticket = Ticket::new(
                        &self.arc(),
                        Arc::clone(&lock),
                        ticket.lock_type(),
                        ticket.duration(),
                        ticket.deadlock_weight(),
                        false,
                    );
                    continue;
                }
                break candidate_state;
            };
            state.add_waiting(Arc::clone(&ticket));
            if is_obtrusive {
                state.obtrusive_count += 1;
            }
        }

        self.wait_slot().reset();
        // Re-materialize: an unobtrusive ticket granted between attempt_grant
        // and here must not be left on the fast path while we wait (§3
        // invariant 5).
        self.materialize_fast_path_tickets();
        self.begin_waiting_for(WaitEdge::Ticket(Arc::clone(&ticket)));
        crate::deadlock::find(&self.arc());

        // Unobtrusive... no: an *obtrusive* waiter is one whose presence
        // may be blocking a foreign table-level lock the host needs to
        // abort, so only obtrusive waits re-notify on the short interval
        // (§4.5 step 12, §5 "External notifications").
        let status = if is_obtrusive {
            loop {
                let now = Instant::now();
                if now >= deadline {
                    break self.wait_slot().timed_wait(self.owner(), now, true, "Waiting for metadata lock");
                }
                let short_deadline = (now + WaitSlot::notification_interval()).min(deadline);
                let is_final = short_deadline >= deadline;
                let resolved =
                    self.wait_slot().timed_wait(self.owner(), short_deadline, is_final, "Waiting for metadata lock");
                if resolved.is_resolved() {
                    break resolved;
                }
                self.notify_conflicting(&lock, &ticket);
            }
        } else {
            self.wait_slot().timed_wait(self.owner(), deadline, true, "Waiting for metadata lock")
        };

        self.end_waiting_for();

        match status {
            WaitStatus::Granted => {
                self.push_to_duration_list(ticket.duration(), Arc::clone(&ticket));
                Ok(ticket)
            }
            other => {
                let became_empty = {
                    let mut state = lock.write();
                    state.remove_ticket(TicketList::Waiting, ticket.id());
                    if is_obtrusive {
                        state.obtrusive_count -= 1;
                    }
                    let empty = state.is_empty();
                    if !empty {
                        state.reschedule_waiters(lock.family(), crate::config::current().max_write_lock_count);
                    }
                    empty
                };
                if became_empty {
                    table.remove(&lock);
                }
                Err(match other {
                    WaitStatus::Victim => MdlError::Deadlock,
                    WaitStatus::Timeout => MdlError::Timeout,
                    WaitStatus::Killed => MdlError::Killed,
                    WaitStatus::Empty | WaitStatus::Granted => MdlError::Timeout,
                })
            }
        }
    }

    /// §4.9 `acquire_locks`: sorts `requests` into a deterministic key
    /// order (so two contexts racing over the same multi-table DDL can
    /// never form a cycle against each other purely from ordering) and
    /// acquires them one at a time, rolling back to the entry savepoint on
    /// the first failure.
    ///
    /// # Errors
    /// The first error encountered, after all previously-granted tickets
    /// in this batch have been rolled back.
    pub fn acquire_many(
        &self,
        table: &LockTable,
        requests: &[Request],
        timeout: StdDuration,
    ) -> MdlResult<Vec<Arc<Ticket>>> {
        let savepoint = self.savepoint();
        let mut ordered: Vec<&Request> = requests.iter().collect();
        ordered.sort_by(|a, b| a.key.cmp(&b.key));

        let mut granted = Vec::with_capacity(ordered.len());
        for req in ordered {
            match self.acquire(table, req, timeout) {
                Ok(ticket) => granted.push(ticket),
                Err(err) => {
                    self.rollback_to(table, savepoint);
                    return Err(err);
                }
            }
        }
        Ok(granted)
    }

    /// §4.5 "Upgrade": acquires `new_type` on the same key as `ticket` (via
    /// the ordinary acquire path, so it can itself wait and participate in
    /// deadlock detection) and then folds the result back into `ticket` in
    /// place, so the caller's existing ticket handle keeps its identity.
    /// A no-op if `ticket` is already at least as strong as `new_type`.
    ///
    /// # Errors
    /// Whatever the synthesized acquire can fail with; on failure `ticket`
    /// is left exactly as it was.
    pub fn upgrade(
        &self,
        table: &LockTable,
        ticket: &Arc<Ticket>,
        new_type: LockType,
        timeout: StdDuration,
    ) -> MdlResult<()> {
        if ticket.has_stronger_or_equal(new_type) {
            return Ok(());
        }

        let synth_req = Request::new(ticket.lock().key().clone(), new_type, TicketDuration::Transaction);
        let synthesized = self.acquire(table, &synth_req, timeout)?;

        let lock = Arc::clone(ticket.lock());
        {
            let mut state = lock.write();
            if synthesized.is_fast_path() {
                state.fast_path_granted_count -= synthesized.lock_type().fast_path_increment();
            } else {
                state.remove_ticket(TicketList::Granted, synthesized.id());
                if synthesized.lock_type().is_obtrusive() {
                    state.obtrusive_count -= 1;
                }
            }

            let was_obtrusive = ticket.lock_type().is_obtrusive();
            state.remove_ticket(TicketList::Granted, ticket.id());
            ticket.set_lock_type(new_type);
            state.add_granted(Arc::clone(ticket));
            if !was_obtrusive {
                state.obtrusive_count += 1;
            }
        }
        self.remove_from_duration_list(&synthesized);
        Ok(())
    }

    fn release_ticket_state(&self, table: &LockTable, ticket: &Arc<Ticket>) {
        let lock = Arc::clone(ticket.lock());
        let became_empty = {
            let mut state = lock.write();
            if ticket.is_fast_path() {
                state.fast_path_granted_count -= ticket.lock_type().fast_path_increment();
            } else {
                state.remove_ticket(TicketList::Granted, ticket.id());
                if ticket.lock_type().is_obtrusive() {
                    state.obtrusive_count -= 1;
                }
            }
            let empty = state.is_empty();
            if !empty {
                state.reschedule_waiters(lock.family(), crate::config::current().max_write_lock_count);
            }
            empty
        };
        if became_empty {
            table.remove(&lock);
        }
    }

    /// §4.5 "Release path": releases a single ticket, whichever duration
    /// list it lives on.
    pub fn release(&self, table: &LockTable, ticket: &Arc<Ticket>) {
        self.release_ticket_state(table, ticket);
        self.remove_from_duration_list(ticket);
    }

    /// Releases every ticket still on the `Transaction` duration list
    /// (§6.1 `release_transactional`).
    pub fn release_transactional(&self, table: &LockTable) {
        let tickets: Vec<Arc<Ticket>> = {
            let mut list = self
                .duration_list(TicketDuration::Transaction)
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *list)
        };
        for ticket in tickets {
            self.release_ticket_state(table, &ticket);
        }
    }

    /// Releases every ticket still on the `Statement` duration list
    /// (§6.1 `release_statement`).
    pub fn release_statement(&self, table: &LockTable) {
        let tickets: Vec<Arc<Ticket>> = {
            let mut list = self
                .duration_list(TicketDuration::Statement)
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *list)
        };
        for ticket in tickets {
            self.release_ticket_state(table, &ticket);
        }
    }

    /// §4.9 `release_all_for_name`: releases every `Explicit`-duration
    /// ticket that names the same underlying lock as `ticket_in_group`
    /// (e.g. `UNLOCK TABLES` releasing every alias of one opened table).
    pub fn release_all_for_name(&self, table: &LockTable, ticket_in_group: &Arc<Ticket>) {
        let target_lock = Arc::clone(ticket_in_group.lock());
        let matching: Vec<Arc<Ticket>> = {
            let mut list = self
                .duration_list(TicketDuration::Explicit)
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut matching = Vec::new();
            list.retain(|t| {
                if Arc::ptr_eq(t.lock(), &target_lock) {
                    matching.push(Arc::clone(t));
                    false
                } else {
                    true
                }
            });
            matching
        };
        for ticket in matching {
            self.release_ticket_state(table, &ticket);
        }
    }

    /// §4.5 "Savepoints & bulk release": records the current length of the
    /// `Statement` and `Transaction` duration lists.
    #[must_use]
    pub fn savepoint(&self) -> Savepoint {
        let statement_len =
            self.duration_list(TicketDuration::Statement).lock().unwrap_or_else(PoisonError::into_inner).len();
        let transaction_len =
            self.duration_list(TicketDuration::Transaction).lock().unwrap_or_else(PoisonError::into_inner).len();
        Savepoint { statement_len, transaction_len }
    }

    /// Releases every ticket acquired on the `Statement`/`Transaction`
    /// lists after `savepoint` was taken, in last-acquired-first order.
    /// `Explicit`-duration tickets are never touched (§4.5).
    pub fn rollback_to(&self, table: &LockTable, savepoint: Savepoint) {
        self.release_tail(table, TicketDuration::Statement, savepoint.statement_len);
        self.release_tail(table, TicketDuration::Transaction, savepoint.transaction_len);
    }

    fn release_tail(&self, table: &LockTable, duration: TicketDuration, keep_len: usize) {
        loop {
            let popped = {
                let mut list = self.duration_list(duration).lock().unwrap_or_else(PoisonError::into_inner);
                if list.len() <= keep_len {
                    None
                } else {
                    list.pop()
                }
            };
            match popped {
                Some(ticket) => self.release_ticket_state(table, &ticket),
                None => break,
            }
        }
    }

    fn move_all_tickets_to(&self, duration: TicketDuration) {
        let mut statement =
            self.duration_list(TicketDuration::Statement).lock().unwrap_or_else(PoisonError::into_inner);
        let mut transaction =
            self.duration_list(TicketDuration::Transaction).lock().unwrap_or_else(PoisonError::into_inner);
        let mut explicit =
            self.duration_list(TicketDuration::Explicit).lock().unwrap_or_else(PoisonError::into_inner);

        let mut all = Vec::new();
        all.append(&mut statement);
        all.append(&mut transaction);
        all.append(&mut explicit);
        for ticket in &all {
            ticket.set_duration(duration);
        }

        match duration {
            TicketDuration::Statement => *statement = all,
            TicketDuration::Transaction => *transaction = all,
            TicketDuration::Explicit => *explicit = all,
        }
    }

    /// §4.9 `set_explicit_duration_for_all`: moves every ticket this
    /// context holds, regardless of current duration, onto the `Explicit`
    /// list (e.g. `LOCK TABLES` promoting transaction-scoped locks).
    pub fn set_explicit_for_all(&self) {
        self.move_all_tickets_to(TicketDuration::Explicit);
    }

    /// §4.9 `set_transaction_duration_for_all`: the inverse of
    /// [`Context::set_explicit_for_all`].
    pub fn set_transactional_for_all(&self) {
        self.move_all_tickets_to(TicketDuration::Transaction);
    }

    /// §6.1 `find_deadlock`: runs the detector rooted at this context
    /// on demand, outside the normal wait path (e.g. a host-side watchdog).
    pub fn find_deadlock(&self) {
        crate::deadlock::find(&self.arc());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AcquireDecision, KillStatus, MdlContextOwner};
    use crate::key::Namespace;
    use crate::strategy::ObjectLockType;

    struct NeverKilledOwner;
    impl MdlContextOwner for NeverKilledOwner {
        fn enter_cond(&self, _stage: &'static str) {}
        fn exit_cond(&self, _stage: &'static str) {}
        fn is_killed(&self) -> KillStatus {
            KillStatus::Alive
        }
        fn notify_shared_lock(&self, _other: u64, _abort: bool) {}
        fn notify_hton_pre_acquire_exclusive(&self, _key: &MdlKey) -> AcquireDecision {
            AcquireDecision::Allow
        }
        fn notify_hton_post_release_exclusive(&self, _key: &MdlKey) {}
        fn rand_seed(&self) -> u32 {
            0
        }
    }

    fn ctx() -> Arc<Context> {
        Context::new(Box::new(NeverKilledOwner))
    }

    #[test]
    fn two_readers_share_the_fast_path() {
        let table = LockTable::new();
        let a = ctx();
        let b = ctx();
        let key = MdlKey::new(Namespace::Table, "db", "t");
        let req = Request::new(key, LockType::Object(ObjectLockType::SharedRead), TicketDuration::Transaction);

        let ticket_a = a.acquire(&table, &req, StdDuration::from_secs(1)).expect("a granted");
        let ticket_b = b.acquire(&table, &req, StdDuration::from_secs(1)).expect("b granted");
        assert!(ticket_a.is_fast_path());
        assert!(ticket_b.is_fast_path());
    }

    #[test]
    fn exclusive_blocks_a_concurrent_exclusive_request() {
        let table = LockTable::new();
        let a = ctx();
        let b = ctx();
        let key = MdlKey::new(Namespace::Table, "db", "t");
        let req = Request::new(key, LockType::Object(ObjectLockType::Exclusive), TicketDuration::Transaction);

        a.acquire(&table, &req, StdDuration::from_secs(1)).expect("a granted");
        let outcome = b.try_acquire(&table, &req).expect("no allocation error");
        assert!(matches!(outcome, AcquireOutcome::NotGranted));
    }

    #[test]
    fn release_lets_a_waiting_exclusive_through() {
        let table = Arc::new(LockTable::new());
        let a = ctx();
        let b = ctx();
        let key = MdlKey::new(Namespace::Table, "db", "t");
        let req = Request::new(key, LockType::Object(ObjectLockType::Exclusive), TicketDuration::Transaction);

        let ticket_a = a.acquire(&table, &req, StdDuration::from_secs(1)).expect("a granted");

        let table2 = Arc::clone(&table);
        let req2 = req.clone();
        let b2 = Arc::clone(&b);
        let handle = std::thread::spawn(move || b2.acquire(&table2, &req2, StdDuration::from_secs(5)));

        std::thread::sleep(StdDuration::from_millis(50));
        a.release(&table, &ticket_a);

        let ticket_b = handle.join().expect("b thread panicked").expect("b eventually granted");
        assert_eq!(ticket_b.lock_type(), LockType::Object(ObjectLockType::Exclusive));
    }

    #[test]
    fn dedup_reuses_a_stronger_existing_ticket_on_the_same_duration() {
        let table = LockTable::new();
        let a = ctx();
        let key = MdlKey::new(Namespace::Table, "db", "t");
        let strong = Request::new(key.clone(), LockType::Object(ObjectLockType::Exclusive), TicketDuration::Transaction);
        let weak = Request::new(key, LockType::Object(ObjectLockType::SharedRead), TicketDuration::Transaction);

        let first = a.acquire(&table, &strong, StdDuration::from_secs(1)).expect("granted");
        let second = a.acquire(&table, &weak, StdDuration::from_secs(1)).expect("granted");
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn timeout_restores_obtrusive_count() {
        let table = LockTable::new();
        let a = ctx();
        let b = ctx();
        let key = MdlKey::new(Namespace::Table, "db", "t");
        let req_a = Request::new(key.clone(), LockType::Object(ObjectLockType::SharedNoReadWrite), TicketDuration::Transaction);
        let req_b = Request::new(key, LockType::Object(ObjectLockType::SharedWrite), TicketDuration::Transaction);

        let ticket_a = a.acquire(&table, &req_a, StdDuration::from_secs(1)).expect("a granted");
        let result = b.acquire(&table, &req_b, StdDuration::from_millis(50));
        assert!(matches!(result, Err(MdlError::Timeout)));
        assert_eq!(ticket_a.lock().read().obtrusive_count, 1);
    }

    #[test]
    fn rollback_to_releases_only_tickets_acquired_after_the_savepoint() {
        let table = LockTable::new();
        let a = ctx();
        let key1 = MdlKey::new(Namespace::Table, "db", "t1");
        let key2 = MdlKey::new(Namespace::Table, "db", "t2");
        let req1 = Request::new(key1, LockType::Object(ObjectLockType::Exclusive), TicketDuration::Transaction);
        let req2 = Request::new(key2, LockType::Object(ObjectLockType::Exclusive), TicketDuration::Transaction);

        let _first = a.acquire(&table, &req1, StdDuration::from_secs(1)).expect("granted");
        let sp = a.savepoint();
        let second = a.acquire(&table, &req2, StdDuration::from_secs(1)).expect("granted");

        a.rollback_to(&table, sp);
        assert!(second.lock().is_empty());
        assert_eq!(a.all_tickets().len(), 1);
    }
}
