//! Per-session state: the owner vtable, the three per-duration ticket
//! lists, the `waiting_for` edge, and the wait slot (§3 "Context", C5).

use crate::commit_order::CommitOrderEdge;
use crate::key::MdlKey;
use crate::ticket::Ticket;
use crate::wait_slot::WaitSlot;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// What the host server must provide for a `Context` to park, abort
/// foreign locks, and observe its own kill state (§6.2 "Owner vtable").
pub trait MdlContextOwner: Send + Sync {
    /// Called before parking, so the host can record a thread-state stage
    /// name (e.g. for `SHOW PROCESSLIST`). The original also hands the
    /// host its condvar/mutex pair so the host's thread-state machinery can
    /// itself wait on them; this port keeps the condvar/mutex private to
    /// [`WaitSlot`] and only notifies the host of stage transitions, which
    /// is the part of the callback actually used for observability.
    fn enter_cond(&self, stage: &'static str);

    /// Called after the wait resolves, restoring the prior thread-state
    /// stage.
    fn exit_cond(&self, stage: &'static str);

    /// Whether the owning connection has been killed or disconnected.
    fn is_killed(&self) -> KillStatus;

    /// Whether the owning connection is still connected to the server.
    fn is_connected(&self) -> bool {
        self.is_killed() != KillStatus::Disconnected
    }

    /// Asks the host to abort a foreign (non-MDL, e.g. table-level) lock
    /// held by `other_owner` that is blocking an obtrusive acquire here.
    /// Must not re-enter the MDL manager (§5 "External notifications").
    fn notify_shared_lock(&self, other_context_id: u64, needs_thr_lock_abort: bool);

    /// Gives a storage engine the chance to veto an exclusive MDL
    /// acquisition on `key` before it is granted.
    fn notify_hton_pre_acquire_exclusive(&self, key: &MdlKey) -> AcquireDecision;

    /// Tells a storage engine that an exclusive MDL lock on `key` was just
    /// released.
    fn notify_hton_post_release_exclusive(&self, key: &MdlKey);

    /// A seed for randomized backoff/jitter decisions made on this
    /// context's behalf.
    fn rand_seed(&self) -> u32;
}

/// Whether a storage engine allows an exclusive acquire to proceed
/// (§6.2 `notify_hton_pre_acquire_exclusive`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireDecision {
    /// Proceed with the acquire.
    Allow,
    /// Abort and let the caller retry from the top.
    AbortRetry,
}

/// A connection's liveness, as observed by [`MdlContextOwner::is_killed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillStatus {
    /// The connection is alive and should keep waiting.
    Alive,
    /// The connection was killed (e.g. `KILL <id>`).
    Killed,
    /// The connection's transport was lost.
    Disconnected,
}

/// What a context is currently parked on: an MDL ticket, or a slot in the
/// commit-order queue (§4.7 "Edges", §4.8, §9 "Deadlock visitor" — the
/// dual `accept_visitor` on `Ticket` and `CommitOrderEdge`).
#[derive(Debug, Clone)]
pub enum WaitEdge {
    /// Waiting for an MDL ticket to be granted.
    Ticket(Arc<Ticket>),
    /// Waiting for a turn in the commit-order queue.
    CommitOrder(CommitOrderEdge),
}

/// Process-wide id source for contexts, used both as the `Context`'s
/// identity for compatibility/ownership checks and as the registry key
/// the deadlock detector uses to resolve an edge's destination context.
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

type ContextRegistry = DashMap<u64, Weak<Context>>;

fn registry() -> &'static ContextRegistry {
    static REGISTRY: OnceLock<ContextRegistry> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

/// Looks up a live context by id, for the deadlock detector's edge
/// traversal (§4.7) and the commit-order graph's visitor (§4.8).
#[must_use]
pub fn lookup_context(id: u64) -> Option<Arc<Context>> {
    registry().get(&id).and_then(|entry| entry.upgrade())
}

/// Per-session state (§3 "Context"). Owns its tickets' `Arc`s on three
/// per-duration lists; the matching `LockObject` granted/waiting lists hold
/// their own clones of the same `Arc<Ticket>` for as long as the ticket is
/// live there (§3 "Ownership").
#[derive(Debug)]
pub struct Context {
    id: u64,
    self_ref: Weak<Context>,
    owner: Box<dyn MdlContextOwner>,
    statement: std::sync::Mutex<Vec<Arc<Ticket>>>,
    transaction: std::sync::Mutex<Vec<Arc<Ticket>>>,
    explicit: std::sync::Mutex<Vec<Arc<Ticket>>>,
    waiting_for: crate::sync::PreferReaderLock<Option<WaitEdge>>,
    wait_slot: WaitSlot,
    needs_thr_lock_abort: AtomicBool,
    force_dml_deadlock_weight: AtomicBool,
}

impl Context {
    /// Creates a new context for `owner` and registers it for deadlock
    /// traversal (§6.1 `Context::new`).
    #[must_use]
    pub fn new(owner: Box<dyn MdlContextOwner>) -> Arc<Self> {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let ctx = Arc::new_cyclic(|self_ref| Self {
            id,
            self_ref: self_ref.clone(),
            owner,
            statement: std::sync::Mutex::new(Vec::new()),
            transaction: std::sync::Mutex::new(Vec::new()),
            explicit: std::sync::Mutex::new(Vec::new()),
            waiting_for: crate::sync::PreferReaderLock::new(None),
            wait_slot: WaitSlot::new(),
            needs_thr_lock_abort: AtomicBool::new(false),
            force_dml_deadlock_weight: AtomicBool::new(false),
        });
        registry().insert(id, Arc::downgrade(&ctx));
        ctx
    }

    /// This context's process-wide identity.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// An `Arc` to this context, for handing to APIs that outlive `&self`
    /// (e.g. `Ticket::new`, the deadlock visitor).
    #[must_use]
    pub fn arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("context always holds its own strong ref while in scope")
    }

    /// The owner vtable supplied at construction.
    #[must_use]
    pub fn owner(&self) -> &dyn MdlContextOwner {
        self.owner.as_ref()
    }

    /// This context's wait slot (§4.6, C6).
    #[must_use]
    pub const fn wait_slot(&self) -> &WaitSlot {
        &self.wait_slot
    }

    pub(crate) fn duration_list(
        &self,
        duration: crate::ticket::Duration,
    ) -> &std::sync::Mutex<Vec<Arc<Ticket>>> {
        match duration {
            crate::ticket::Duration::Statement => &self.statement,
            crate::ticket::Duration::Transaction => &self.transaction,
            crate::ticket::Duration::Explicit => &self.explicit,
        }
    }

    /// All tickets currently owned by this context, across all three
    /// duration lists, for dedup lookups (§4.5 step 1) and `is_owner`.
    #[must_use]
    pub fn all_tickets(&self) -> Vec<Arc<Ticket>> {
        let lock = |m: &std::sync::Mutex<Vec<Arc<Ticket>>>| {
            m.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
        };
        let mut all = lock(&self.statement);
        all.extend(lock(&self.transaction));
        all.extend(lock(&self.explicit));
        all
    }

    /// Whether `needs_thr_lock_abort` is set, forcing all new requests by
    /// this context onto the slow path (§4.5 step 3).
    #[must_use]
    pub fn needs_thr_lock_abort(&self) -> bool {
        self.needs_thr_lock_abort.load(Ordering::Acquire)
    }

    /// Sets the `needs_thr_lock_abort` flag (host-driven; set when a
    /// foreign table-level lock this context holds must be aborted before
    /// any further obtrusive acquire can proceed).
    pub fn set_needs_thr_lock_abort(&self, value: bool) {
        self.needs_thr_lock_abort.store(value, Ordering::Release);
    }

    /// Whether this context's deadlock weight is pinned to the DML weight
    /// regardless of the per-request weight supplied to `acquire` (§3).
    #[must_use]
    pub fn force_dml_deadlock_weight(&self) -> bool {
        self.force_dml_deadlock_weight.load(Ordering::Acquire)
    }

    /// Sets `force_dml_deadlock_weight`.
    pub fn set_force_dml_deadlock_weight(&self, value: bool) {
        self.force_dml_deadlock_weight.store(value, Ordering::Release);
    }

    /// Registers the edge this context is about to wait on (§4.5 step 10).
    pub(crate) fn begin_waiting_for(&self, edge: WaitEdge) {
        let mut guard = self.waiting_for.write();
        *guard = Some(edge);
    }

    /// Clears the waiting edge once the wait resolves (§4.5 step 13).
    pub(crate) fn end_waiting_for(&self) {
        let mut guard = self.waiting_for.write();
        *guard = None;
    }

    /// §4.7 "Traversal" / §4.9: entry point for the deadlock detector.
    /// Dispatches to whichever edge type this context is currently parked
    /// on, or returns `false` if it isn't waiting on anything.
    #[must_use]
    pub fn visit_subgraph(&self, visitor: &mut dyn crate::deadlock::DeadlockVisitor) -> bool {
        let edge = {
            let guard = self.waiting_for.read();
            guard.clone()
        };
        match edge {
            None => false,
            Some(WaitEdge::Ticket(ticket)) => {
                crate::deadlock::visit_ticket_subgraph(&self.arc(), &ticket, visitor)
            }
            Some(WaitEdge::CommitOrder(commit_edge)) => {
                crate::commit_order::visit_commit_order_subgraph(&self.arc(), &commit_edge, visitor)
            }
        }
    }

    /// The deadlock weight of whatever this context is currently parked
    /// on, if anything (§4.7 "Victim selection & weight").
    #[must_use]
    pub fn current_wait_weight(&self) -> Option<i64> {
        match &*self.waiting_for.read() {
            None => None,
            Some(WaitEdge::Ticket(ticket)) => Some(ticket.deadlock_weight()),
            Some(WaitEdge::CommitOrder(_)) => Some(crate::deadlock::weight::COMMIT_ORDER),
        }
    }

    /// Whether this context already holds a ticket on `key` at least as
    /// strong as `min_type` (§6.1 `is_owner`).
    #[must_use]
    pub fn is_owner(&self, key: &MdlKey, min_type: crate::strategy::LockType) -> bool {
        self.all_tickets()
            .iter()
            .any(|t| t.lock().key() == key && t.has_stronger_or_equal(min_type))
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        registry().remove(&self.id);
    }
}
