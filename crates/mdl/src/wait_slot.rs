//! One-shot rendezvous used to unpark a parked waiter with a terminal
//! status (§4.6, C6).
//!
//! A [`WaitSlot`] is reset to [`WaitStatus::Empty`] before a context starts
//! waiting on a [`LockObject`](crate::lock_object::LockObject), then resolved
//! exactly once by whichever of three parties gets there first: the
//! scheduler granting the lock, the deadlock detector choosing a victim, or
//! the timeout/kill path in [`WaitSlot::timed_wait`] itself.

use crate::context::KillStatus;
use serde::{Deserialize, Serialize};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Terminal (or pending) resolution of a parked wait (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitStatus {
    /// No party has resolved the wait yet.
    Empty,
    /// The scheduler granted the waiting ticket.
    Granted,
    /// The deadlock detector chose this context as the victim.
    Victim,
    /// The wait deadline elapsed before a grant arrived.
    Timeout,
    /// The owning connection was killed or disconnected while waiting.
    Killed,
}

impl WaitStatus {
    /// Whether this status is terminal, i.e. not [`WaitStatus::Empty`].
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        !matches!(self, WaitStatus::Empty)
    }
}

/// A `(mutex, condvar, status)` tuple, one per [`Context`](crate::context::Context)
/// (§4.6).
#[derive(Debug)]
pub struct WaitSlot {
    status: Mutex<WaitStatus>,
    condvar: Condvar,
}

impl Default for WaitSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitSlot {
    /// A fresh slot, already `Empty`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: Mutex::new(WaitStatus::Empty),
            condvar: Condvar::new(),
        }
    }

    /// The current status without blocking.
    #[must_use]
    pub fn peek(&self) -> WaitStatus {
        *self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Resets the slot to `Empty` ahead of a new wait (§4.5 step 9).
    pub fn reset(&self) {
        let mut status = self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *status = WaitStatus::Empty;
    }

    /// Atomically transitions `Empty -> status`, waking any waiter.
    /// Returns whether this call performed the transition; a caller racing
    /// another resolver (grant vs. victim selection, say) must treat `false`
    /// as "someone else already resolved this wait" and not act further.
    pub fn set(&self, new_status: WaitStatus) -> bool {
        debug_assert!(new_status.is_resolved(), "set() requires a terminal status");
        let mut status = self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if *status != WaitStatus::Empty {
            return false;
        }
        *status = new_status;
        drop(status);
        self.condvar.notify_all();
        true
    }

    /// Blocks the calling thread until the slot resolves, the owner is
    /// killed, or `deadline` elapses (§4.6 `timed_wait`).
    ///
    /// `set_status_on_timeout` mirrors the original's final short wait
    /// before the caller's true deadline: only that last call is allowed to
    /// stamp `Timeout` itself, so earlier notify-and-rewait iterations
    /// (§4.5 step 12) don't race the scheduler's own `Granted` transition.
    pub fn timed_wait(
        &self,
        owner: &dyn crate::context::MdlContextOwner,
        deadline: Instant,
        set_status_on_timeout: bool,
        wait_state_name: &'static str,
    ) -> WaitStatus {
        owner.enter_cond(wait_state_name);
        let mut status = self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if *status != WaitStatus::Empty {
                break;
            }
            if owner.is_killed() != KillStatus::Alive {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, timeout_result) = self
                .condvar
                .wait_timeout(status, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            status = guard;
            if timeout_result.timed_out() && *status == WaitStatus::Empty {
                break;
            }
        }

        let resolved = if *status == WaitStatus::Empty {
            match owner.is_killed() {
                KillStatus::Alive => {
                    if set_status_on_timeout {
                        *status = WaitStatus::Timeout;
                        WaitStatus::Timeout
                    } else {
                        WaitStatus::Empty
                    }
                }
                KillStatus::Killed | KillStatus::Disconnected => {
                    *status = WaitStatus::Killed;
                    WaitStatus::Killed
                }
            }
        } else {
            *status
        };
        drop(status);
        owner.exit_cond(wait_state_name);
        resolved
    }

    /// A short, fixed interval used by the notify-and-rewait loop of
    /// §4.5 step 12.
    #[must_use]
    pub const fn notification_interval() -> Duration {
        Duration::from_secs(1)
    }
}
