//! Process-wide configuration (§6.3).
//!
//! The original stores these as server system variables, read directly by
//! the scheduler wherever it needs them. This crate has no system-variable
//! layer of its own, so it keeps the same "ambient, process-wide, set once
//! at startup" shape with a single [`OnceLock`]-backed snapshot, the way
//! the lock table and context registry are themselves process-wide
//! (§9 "Global state").

use std::sync::OnceLock;

/// Tunables the scheduler consults on every acquire/release (§6.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MdlConfig {
    /// Maximum number of consecutive hog-type grants on one `LockObject`
    /// before weaker waiters are given priority (§4.4 "Anti-starvation").
    pub max_write_lock_count: u64,
    /// Below this many unused (empty) lock table entries, a reaper does not
    /// bother sweeping (host-side policy; see `SPEC_FULL.md`).
    pub unused_locks_low_water: usize,
    /// Minimum fraction of unused entries, relative to the table's total
    /// size, that triggers a reap once above `unused_locks_low_water`.
    pub unused_locks_min_ratio: f64,
}

impl Default for MdlConfig {
    fn default() -> Self {
        Self {
            max_write_lock_count: 1,
            unused_locks_low_water: 1000,
            unused_locks_min_ratio: 0.25,
        }
    }
}

static CONFIG: OnceLock<MdlConfig> = OnceLock::new();

/// Installs the process-wide configuration. Called once from `init()`
/// (§6.1); a second call is a no-op, matching the "set once at startup"
/// contract the rest of the crate's global state follows.
pub fn init(config: MdlConfig) {
    let _ = CONFIG.set(config);
}

/// The current configuration, or [`MdlConfig::default`] if `init` was
/// never called (e.g. in unit tests that exercise the scheduler directly).
#[must_use]
pub fn current() -> MdlConfig {
    CONFIG.get().copied().unwrap_or_default()
}
