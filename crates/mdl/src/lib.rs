//! # Metadata Lock Manager
//!
//! A namespaced, deadlock-detecting lock manager for schema-level
//! metadata — tables, views, stored routines, tablespaces, user-level
//! locks, and the handful of related namespaces a query layer needs to
//! serialize DDL against concurrent DML (C1-C9).
//!
//! A session opens a [`Context`], builds [`scheduler::Request`]s against
//! [`MdlKey`]s, and calls [`Context::try_acquire`]/[`Context::acquire`] to
//! obtain [`Ticket`]s. The [`LockTable`] is the process-wide map from key
//! to [`lock_object::LockObject`]; [`deadlock::find`] runs a bounded DFS
//! over the resulting wait-for graph whenever a context parks.

pub mod commit_order;
pub mod config;
pub mod context;
pub mod deadlock;
pub mod error;
pub mod key;
pub mod lock_object;
pub mod lock_table;
pub mod monitoring;
pub mod scheduler;
pub mod strategy;
pub mod sync;
pub mod ticket;
pub mod wait_slot;

pub use commit_order::{CommitOrderManager, WorkerId};
pub use config::MdlConfig;
pub use context::{AcquireDecision, Context, KillStatus, MdlContextOwner};
pub use error::{MdlError, MdlResult};
pub use key::{MdlKey, Namespace};
pub use lock_table::LockTable;
pub use monitoring::{ContentionOutcome, LockContentionEvent, LockContentionTracker};
pub use scheduler::{AcquireOutcome, Request, Savepoint};
pub use strategy::{Family, LockType, ObjectLockType, ScopedLockType};
pub use ticket::{Duration, Ticket, TicketId};

use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Process-wide state created by [`init`] and consulted by every
/// [`Context`] thereafter: the lock table and the contention tracker
/// (§6.4, §9 "Global state").
#[derive(Debug)]
pub struct Manager {
    table: LockTable,
    contention: LockContentionTracker,
}

impl Manager {
    fn new() -> Self {
        Self { table: LockTable::new(), contention: LockContentionTracker::default() }
    }

    /// The process-wide lock table.
    #[must_use]
    pub fn table(&self) -> &LockTable {
        &self.table
    }

    /// The process-wide contention tracker.
    #[must_use]
    pub fn contention(&self) -> &LockContentionTracker {
        &self.contention
    }
}

static MANAGER: OnceLock<Manager> = OnceLock::new();

/// §6.1 `init()`: installs the process-wide configuration and creates the
/// lock table and its singletons. A second call is a no-op; the original
/// likewise creates its global state exactly once per process.
pub fn init(config: MdlConfig) {
    info!("initializing metadata lock manager");
    debug!(?config, "mdl configuration");
    config::init(config);
    let _ = MANAGER.set(Manager::new());
}

/// The process-wide [`Manager`], initializing it with default
/// configuration on first access if [`init`] was never called (e.g. in
/// unit tests that only need the table, not a tuned configuration).
#[must_use]
pub fn manager() -> &'static Manager {
    MANAGER.get_or_init(Manager::new)
}

/// §6.4 `shutdown()`: asserts the lock table holds nothing but its
/// singletons. Logs and returns the failure description instead of
/// panicking, since a host may want to keep running and investigate.
///
/// # Errors
/// The description `assert_empty_for_shutdown` returns if live entries
/// remain.
pub fn shutdown() -> Result<(), String> {
    match MANAGER.get() {
        Some(m) => {
            let result = m.table.assert_empty_for_shutdown();
            if let Err(ref msg) = result {
                warn!(%msg, "metadata lock manager shutdown found leftover entries");
            } else {
                info!("metadata lock manager shut down cleanly");
            }
            result
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_lazily_initializes_with_defaults() {
        let m = manager();
        assert!(m.table().is_empty());
        assert_eq!(m.contention().total_contentions(), 0);
    }

    #[test]
    fn table_acquires_through_a_context_round_trip() {
        let m = manager();
        let ctx = Context::new(Box::new(test_support::NeverKilledOwner));
        let req = Request::new(
            MdlKey::new(Namespace::Table, "db", "round_trip"),
            LockType::Object(ObjectLockType::SharedRead),
            Duration::Transaction,
        );
        let outcome = ctx.try_acquire(m.table(), &req).expect("acquire does not fail");
        assert!(matches!(outcome, AcquireOutcome::Granted(_)));
    }

    mod test_support {
        use crate::context::{AcquireDecision, KillStatus, MdlContextOwner};
        use crate::key::MdlKey;

        pub struct NeverKilledOwner;
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
    }
}
