//! Depth-first search over wait-for edges, with a pluggable visitor that
//! both the MDL wait-for graph and the commit-order graph (C9) share
//! (§4.7, §9 "Deadlock visitor").

use crate::context::Context;
use crate::ticket::Ticket;
use crate::wait_slot::WaitStatus;
use std::sync::Arc;

/// Bounded traversal depth (§4.7 "Traversal": "Bounded depth = 32").
pub const MAX_DEPTH: usize = 32;

/// Caller-provided deadlock weights (§4.7 "Victim selection & weight").
/// Lower weight is preferred as the victim.
pub mod weight {
    /// Ordinary DML statements.
    pub const DML: i64 = 0;
    /// `GET_LOCK()`-style user-level locks.
    pub const USER_LEVEL_LOCK: i64 = 50;
    /// DDL statements.
    pub const DDL: i64 = 100;
    /// Commit-order graph waits (§4.9).
    pub const COMMIT_ORDER: i64 = 0;
}

/// The visitor protocol shared by the MDL wait-for graph and the
/// commit-order graph (§4.7, §9). `enter_node` returning `true` means the
/// traversal hit its depth bound and `ctx` is selected as victim on the
/// spot; `inspect_edge` returning `true` means a cycle back to the search's
/// start node was found.
pub trait DeadlockVisitor {
    /// Called when the DFS descends into `ctx`.
    fn enter_node(&mut self, ctx: &Arc<Context>) -> bool;
    /// Called once per outgoing edge from the current node to `ctx`.
    fn inspect_edge(&mut self, ctx: &Arc<Context>) -> bool;
    /// Called when the DFS returns from `ctx`, after all of its edges (and
    /// their own subgraphs) have been visited.
    fn leave_node(&mut self, ctx: &Arc<Context>);
}

/// The concrete detector: tracks depth, the search's start node, and the
/// lowest-weight victim candidate seen so far (§4.7).
struct CycleSearch {
    start_id: u64,
    depth: usize,
    cycle_found: bool,
    victim: Option<Arc<Context>>,
}

impl CycleSearch {
    fn new(start_id: u64) -> Self {
        Self { start_id, depth: 0, cycle_found: false, victim: None }
    }

    /// `opt_change_victim_to`: replaces the candidate victim whenever
    /// `ctx`'s weight is `<=` the current candidate's, so an equal-weight
    /// candidate is replaced on every `leave_node` call — i.e. ties break
    /// toward the *last* node seen on the unwind path, not the first
    /// (§9 "Open questions": the `>=`-style comparison the original uses).
    fn opt_change_victim_to(&mut self, ctx: &Arc<Context>) {
        let candidate_weight = effective_weight(ctx);
        let replace = match &self.victim {
            None => true,
            Some(current) => candidate_weight <= effective_weight(current),
        };
        if replace {
            self.victim = Some(Arc::clone(ctx));
        }
    }
}

impl DeadlockVisitor for CycleSearch {
    fn enter_node(&mut self, ctx: &Arc<Context>) -> bool {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            self.cycle_found = true;
            self.opt_change_victim_to(ctx);
            true
        } else {
            false
        }
    }

    fn inspect_edge(&mut self, ctx: &Arc<Context>) -> bool {
        if ctx.id() == self.start_id {
            self.cycle_found = true;
            true
        } else {
            false
        }
    }

    fn leave_node(&mut self, ctx: &Arc<Context>) {
        self.depth -= 1;
        if self.cycle_found {
            self.opt_change_victim_to(ctx);
        }
    }
}

fn effective_weight(ctx: &Arc<Context>) -> i64 {
    if ctx.force_dml_deadlock_weight() {
        return weight::DML;
    }
    ctx.current_wait_weight().unwrap_or(weight::DML)
}

/// §4.7 "Inside `L.visit_subgraph`": the per-ticket traversal step, called
/// from [`Context::visit_subgraph`](crate::context::Context::visit_subgraph)
/// when the context is parked on an MDL ticket.
#[must_use]
pub fn visit_ticket_subgraph(
    self_ctx: &Arc<Context>,
    ticket: &Arc<Ticket>,
    visitor: &mut dyn DeadlockVisitor,
) -> bool {
    // Step 1: if the wait already resolved, another thread beat us to it;
    // stop without entering the node (avoids a spurious deadlock report).
    if self_ctx.wait_slot().peek().is_resolved() {
        return false;
    }

    // Step 2.
    if visitor.enter_node(self_ctx) {
        return true;
    }

    let edge_ids = ticket.lock().conflicting_context_ids(ticket);
    let edges: Vec<Arc<Context>> =
        edge_ids.into_iter().filter_map(crate::context::lookup_context).collect();

    // Step 3: BFS over outgoing edges.
    let mut found = false;
    for edge_ctx in &edges {
        if visitor.inspect_edge(edge_ctx) {
            found = true;
        }
    }

    // Step 4: DFS into each adjacent context's own subgraph.
    for edge_ctx in &edges {
        if edge_ctx.visit_subgraph(visitor) {
            found = true;
        }
    }

    // Step 5.
    visitor.leave_node(self_ctx);
    found
}

/// §4.7 "outer loop": repeatedly searches the wait-for graph rooted at
/// `start`, marking at most one victim per pass, until no cycle remains or
/// `start` itself is chosen (in which case the caller's own `acquire` will
/// observe `Victim` on its own wait slot and unwind).
pub fn find(start: &Arc<Context>) {
    loop {
        let mut search = CycleSearch::new(start.id());
        let found = start.visit_subgraph(&mut search);
        if !found || !search.cycle_found {
            return;
        }
        let Some(victim) = search.victim else { return };
        victim.wait_slot().set(WaitStatus::Victim);
        if victim.id() == start.id() {
            return;
        }
        // The cycle just broken may not have been the only one; search again.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AcquireDecision, KillStatus, MdlContextOwner};
    use crate::key::{MdlKey, Namespace};
    use crate::lock_object::LockObject;
    use crate::scheduler::Request;
    use crate::strategy::{LockType, ObjectLockType};
    use std::time::Duration as StdDuration;

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

    #[test]
    fn no_cycle_when_nobody_is_waiting() {
        let ctx = Context::new(Box::new(NeverKilledOwner));
        find(&ctx); // must return promptly; nothing waiting, no panic
        assert_eq!(ctx.wait_slot().peek(), crate::wait_slot::WaitStatus::Empty);
    }

    #[test]
    fn two_context_cycle_selects_a_victim() {
        let table = crate::lock_table::LockTable::new();
        let a = Context::new(Box::new(NeverKilledOwner));
        let b = Context::new(Box::new(NeverKilledOwner));

        let t1 = table.find_or_insert(&MdlKey::new(Namespace::Table, "db", "t1")).unwrap();
        let t2 = table.find_or_insert(&MdlKey::new(Namespace::Table, "db", "t2")).unwrap();

        // A holds X on t1, B holds X on t2.
        let req_a1 = Request::new(
            MdlKey::new(Namespace::Table, "db", "t1"),
            LockType::Object(ObjectLockType::Exclusive),
            crate::ticket::Duration::Transaction,
        );
        let req_b2 = Request::new(
            MdlKey::new(Namespace::Table, "db", "t2"),
            LockType::Object(ObjectLockType::Exclusive),
            crate::ticket::Duration::Transaction,
        );
        a.try_acquire(&table, &req_a1).expect("a acquires t1");
        b.try_acquire(&table, &req_b2).expect("b acquires t2");

        // Now park A waiting on t2 (held by B) to synthesize the cycle,
        // without going through the blocking `acquire` timing path.
        let ticket_a_on_t2 = crate::ticket::Ticket::new(
            &a,
            Arc::clone(&t2),
            LockType::Object(ObjectLockType::Exclusive),
            crate::ticket::Duration::Transaction,
            weight::DDL,
            false,
        );
        t2.write().add_waiting(Arc::clone(&ticket_a_on_t2));
        a.begin_waiting_for(crate::context::WaitEdge::Ticket(ticket_a_on_t2));

        let ticket_b_on_t1 = crate::ticket::Ticket::new(
            &b,
            Arc::clone(&t1),
            LockType::Object(ObjectLockType::Exclusive),
            crate::ticket::Duration::Transaction,
            weight::DDL,
            false,
        );
        t1.write().add_waiting(Arc::clone(&ticket_b_on_t1));
        b.begin_waiting_for(crate::context::WaitEdge::Ticket(ticket_b_on_t1));

        find(&a);

        let a_status = a.wait_slot().peek();
        let b_status = b.wait_slot().peek();
        assert!(
            a_status == crate::wait_slot::WaitStatus::Victim
                || b_status == crate::wait_slot::WaitStatus::Victim,
            "exactly one side of the cycle must be chosen as victim"
        );
        assert!(
            !(a_status == crate::wait_slot::WaitStatus::Victim
                && b_status == crate::wait_slot::WaitStatus::Victim),
            "at most one victim per detection pass"
        );
        let _ = StdDuration::from_secs(0);
    }
}
