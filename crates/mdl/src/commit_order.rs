//! The commit-order dependency graph (§4.8, C9): a FIFO queue of
//! replication-applier workers that shares the MDL deadlock detector's
//! visitor protocol.
//!
//! `spec.md` scopes the worker queue's *scheduling* out as an external
//! collaborator's concern, but keeps it in as a real, runnable structure
//! because it plugs into the deadlock detector through the same
//! [`DeadlockVisitor`](crate::deadlock::DeadlockVisitor) trait `Ticket`
//! does. Workers are identified by the [`Context`] id of the applier
//! thread waiting its turn — there is no separate worker-id namespace,
//! since every commit-order participant is, in this crate, also an MDL
//! context.

use crate::context::{Context, WaitEdge};
use crate::deadlock::DeadlockVisitor;
use crate::error::{MdlError, MdlResult};
use crate::sync::PreferReaderLock;
use crate::wait_slot::WaitStatus;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Identifies a commit-order participant; equal to its MDL `Context` id.
pub type WorkerId = u64;

/// A worker's position in the commit-order queue: the edge type a
/// [`Context`] publishes to `waiting_for` while parked on
/// [`CommitOrderManager::wait_on_graph`] (§4.8, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOrderEdge {
    /// The worker waiting its turn.
    pub worker_id: WorkerId,
}

/// Lifecycle stage of a worker relative to the commit-order queue
/// (§2 C9). Not consulted by the queue's FIFO discipline itself — carried
/// for host-side observability, the way the original's
/// `Commit_order_manager` tags each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStage {
    /// The worker has finished and left the queue.
    Finished,
    /// The worker has registered its intent to commit in order.
    Registered,
    /// The worker finished applying its transaction's effects.
    FinishedApplying,
    /// The worker has asked for its commit-order turn.
    RequestedGrant,
    /// The worker is parked, waiting for its turn.
    Waited,
}

/// An ordered queue of worker ids behind a reader-preferring "freeze" lock
/// (§4.8): the head is conceptually granted, every other entry waits.
#[derive(Debug)]
pub struct CommitOrderManager {
    queue: PreferReaderLock<VecDeque<WorkerId>>,
}

impl Default for CommitOrderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitOrderManager {
    /// An empty commit-order queue.
    #[must_use]
    pub fn new() -> Self {
        Self { queue: PreferReaderLock::new(VecDeque::new()) }
    }

    /// The process-wide commit-order graph, shared by every context that
    /// waits on it (§6.4 "process-wide").
    #[must_use]
    pub fn global() -> &'static CommitOrderManager {
        static GLOBAL: OnceLock<CommitOrderManager> = OnceLock::new();
        GLOBAL.get_or_init(CommitOrderManager::new)
    }

    /// §4.8 `wait_on_graph`: blocks `ctx` until it reaches the head of the
    /// queue, a deadlock selects it as victim, or `deadline` elapses.
    ///
    /// # Errors
    /// [`MdlError::Deadlock`], [`MdlError::Timeout`], or
    /// [`MdlError::Killed`]/[`MdlError::Disconnected`] per the resolved
    /// [`WaitStatus`].
    pub fn wait_on_graph(&self, ctx: &Arc<Context>, deadline: Instant) -> MdlResult<()> {
        {
            let mut queue = self.queue.write();
            if !queue.contains(&ctx.id()) {
                queue.push_back(ctx.id());
            }
            if queue.front() == Some(&ctx.id()) {
                return Ok(());
            }
        }

        ctx.wait_slot().reset();
        ctx.begin_waiting_for(WaitEdge::CommitOrder(CommitOrderEdge { worker_id: ctx.id() }));
        crate::deadlock::find(ctx);
        let status = ctx.wait_slot().timed_wait(ctx.owner(), deadline, true, "Waiting for commit order");
        ctx.end_waiting_for();

        match status {
            WaitStatus::Granted => Ok(()),
            WaitStatus::Victim => Err(MdlError::Deadlock),
            WaitStatus::Timeout => Err(MdlError::Timeout),
            WaitStatus::Killed => Err(MdlError::Killed),
            WaitStatus::Empty => Err(MdlError::Timeout),
        }
    }

    /// §4.8 `finish`: pops the head (which must be `ctx`) and signals the
    /// next worker, if any.
    ///
    /// # Panics
    /// Panics (a programming-error assertion, mirroring the original's
    /// `DBUG_ASSERT`) if `ctx` is not currently the head of the queue.
    pub fn finish(&self, ctx: &Arc<Context>) {
        let next = {
            let mut queue = self.queue.write();
            assert_eq!(
                queue.front(),
                Some(&ctx.id()),
                "finish() called by a worker that is not at the head of the commit-order queue"
            );
            queue.pop_front();
            queue.front().copied()
        };
        if let Some(next_id) = next {
            if let Some(next_ctx) = crate::context::lookup_context(next_id) {
                next_ctx.wait_slot().set(WaitStatus::Granted);
            }
        }
    }

    /// Removes `ctx` from the queue without granting anyone, for a worker
    /// that gives up (victim, timeout, kill) before reaching the head.
    pub fn abandon(&self, ctx: &Arc<Context>) {
        let mut queue = self.queue.write();
        queue.retain(|&id| id != ctx.id());
    }

    /// Current queue contents, head first, for tests and diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> Vec<WorkerId> {
        self.queue.read().iter().copied().collect()
    }
}

/// §4.8 "Participates in the deadlock detector": the commit-order
/// analogue of [`crate::deadlock::visit_ticket_subgraph`]. Always consults
/// the process-wide [`CommitOrderManager::global`] queue, since every
/// commit-order wait in this crate is published against that one queue.
#[must_use]
pub fn visit_commit_order_subgraph(
    self_ctx: &Arc<Context>,
    _edge: &CommitOrderEdge,
    visitor: &mut dyn DeadlockVisitor,
) -> bool {
    if self_ctx.wait_slot().peek().is_resolved() {
        return false;
    }
    if visitor.enter_node(self_ctx) {
        return true;
    }

    let manager = CommitOrderManager::global();
    let queue = manager.queue.read();
    let ahead: Vec<Arc<Context>> = queue
        .iter()
        .take_while(|&&id| id != self_ctx.id())
        .filter_map(|&id| crate::context::lookup_context(id))
        .collect();
    drop(queue);

    let mut found = false;
    for edge_ctx in &ahead {
        if visitor.inspect_edge(edge_ctx) {
            found = true;
        }
    }
    for edge_ctx in &ahead {
        if edge_ctx.visit_subgraph(visitor) {
            found = true;
        }
    }

    visitor.leave_node(self_ctx);
    found
}
