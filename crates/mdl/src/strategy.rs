//! Per-namespace-family strategy tables: compatibility matrices,
//! waiting-priority matrices, fast-path increments, and hog-lock
//! membership (§4.4).
//!
//! The original design dispatches through virtual function tables on a
//! per-namespace strategy object. Rust has no need for that indirection:
//! [`Family`] is a two-variant tag on [`LockType`], and every table below is
//! a `const fn` match over the small, closed set of lock types (§9 "Strategy
//! polymorphism").

// The compatibility matrix below is easiest to transcribe and check against
// the spec's table using its own short column headers (S, SH, SR, ...).
#![allow(clippy::similar_names, clippy::many_single_char_names)]

use crate::key::Namespace;
use serde::{Deserialize, Serialize};

/// Which of the two namespace families a key belongs to, and therefore
/// which lock-type enum and compatibility tables govern it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Family {
    /// Global, Commit, Schema, Tablespace: the restricted three-type family.
    Scoped,
    /// Everything else: the ten-type object family.
    Object,
}

impl Family {
    /// The family governing locks on `namespace`.
    #[must_use]
    pub const fn of(namespace: Namespace) -> Self {
        if namespace.is_scoped() {
            Family::Scoped
        } else {
            Family::Object
        }
    }

    /// Bitmask of hog types for this family (§4.4 "Anti-starvation").
    #[must_use]
    pub const fn hog_types(self) -> u16 {
        match self {
            Family::Scoped => 0,
            Family::Object => {
                ObjectLockType::SharedNoWrite.bit()
                    | ObjectLockType::SharedNoReadWrite.bit()
                    | ObjectLockType::Exclusive.bit()
            }
        }
    }
}

/// The restricted three-type family used by Global, Commit, Schema, and
/// Tablespace keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScopedLockType {
    /// Intention to acquire `Exclusive`; the only unobtrusive scoped type.
    IntentionExclusive = 0,
    /// Shared scoped lock (e.g. a global read lock holder).
    Shared = 1,
    /// Exclusive scoped lock.
    Exclusive = 2,
}

impl ScopedLockType {
    /// This type's single bit in a scoped bitmask.
    #[must_use]
    pub const fn bit(self) -> u16 {
        1 << (self as u8)
    }

    /// Types whose *grant* conflicts with a grant of `self` (§4.4).
    #[must_use]
    pub const fn granted_incompat(self) -> u16 {
        use ScopedLockType::{Exclusive, IntentionExclusive, Shared};
        match self {
            IntentionExclusive => Shared.bit() | Exclusive.bit(),
            Shared => IntentionExclusive.bit() | Exclusive.bit(),
            Exclusive => IntentionExclusive.bit() | Shared.bit() | Exclusive.bit(),
        }
    }

    /// Types of a pending waiter that `self` must not be granted ahead of.
    /// The scoped family has no hog types and no priority waiters, so this
    /// is always empty (§4.4 only defines priority distinctions for the
    /// object family).
    #[must_use]
    pub const fn waiting_incompat(self) -> u16 {
        0
    }

    /// Fast-path counter increment; nonzero only for the sole unobtrusive
    /// scoped type (§4.4 "Fast-path increments").
    #[must_use]
    pub const fn fast_path_increment(self) -> u64 {
        match self {
            ScopedLockType::IntentionExclusive => 1,
            ScopedLockType::Shared | ScopedLockType::Exclusive => 0,
        }
    }
}

/// The ten-type family used by every namespace other than Global, Commit,
/// Schema, and Tablespace. Ordered weakest to strongest; the discriminant
/// doubles as the compatibility-table index and the strength rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectLockType {
    /// Plain shared lock.
    Shared = 0,
    /// Shared lock exempted from priority-based waiting (always jumps the
    /// waiting priority check).
    SharedHighPrio = 1,
    /// Shared lock held for the duration of a read statement.
    SharedRead = 2,
    /// Shared lock held for the duration of a write statement.
    SharedWrite = 3,
    /// Like `SharedWrite`, but yields to pending readers (low priority).
    SharedWriteLowPrio = 4,
    /// Shared lock that may later be upgraded to `Exclusive` without
    /// releasing it first.
    SharedUpgradable = 5,
    /// Shared lock asserting the object will only ever be read for its
    /// remaining lifetime.
    SharedReadOnly = 6,
    /// Shared lock that forbids any concurrent write lock.
    SharedNoWrite = 7,
    /// Shared lock that forbids any concurrent read or write lock.
    SharedNoReadWrite = 8,
    /// Exclusive lock.
    Exclusive = 9,
}

const S: u16 = ObjectLockType::Shared.bit();
const SH: u16 = ObjectLockType::SharedHighPrio.bit();
const SR: u16 = ObjectLockType::SharedRead.bit();
const SW: u16 = ObjectLockType::SharedWrite.bit();
const SWLP: u16 = ObjectLockType::SharedWriteLowPrio.bit();
const SU: u16 = ObjectLockType::SharedUpgradable.bit();
const SRO: u16 = ObjectLockType::SharedReadOnly.bit();
const SNW: u16 = ObjectLockType::SharedNoWrite.bit();
const SNRW: u16 = ObjectLockType::SharedNoReadWrite.bit();
const X: u16 = ObjectLockType::Exclusive.bit();

impl ObjectLockType {
    /// This type's single bit in an object-family bitmask.
    #[must_use]
    pub const fn bit(self) -> u16 {
        1 << (self as u8)
    }

    /// Types whose grant conflicts with a grant of `self`, per the §4.4
    /// compatibility matrix. `SharedWriteLowPrio` mirrors `SharedWrite` and
    /// `SharedReadOnly` mirrors `SharedNoWrite`; the spec's printed matrix
    /// does not carry columns for either, so this crate extends both rows
    /// by analogy with their nearest-strength neighbor (documented in
    /// DESIGN.md).
    #[must_use]
    pub const fn granted_incompat(self) -> u16 {
        match self {
            ObjectLockType::Shared | ObjectLockType::SharedHighPrio => X,
            ObjectLockType::SharedRead => SNRW | X,
            ObjectLockType::SharedWrite | ObjectLockType::SharedWriteLowPrio => SNW | SNRW | X,
            ObjectLockType::SharedUpgradable => SU | SNW | SRO | SNRW | X,
            ObjectLockType::SharedReadOnly | ObjectLockType::SharedNoWrite => {
                SW | SWLP | SU | SRO | SNW | SNRW | X
            }
            ObjectLockType::SharedNoReadWrite => SR | SW | SWLP | SU | SRO | SNW | SNRW | X,
            ObjectLockType::Exclusive => S | SH | SR | SW | SWLP | SU | SRO | SNW | SNRW | X,
        }
    }

    /// Types of a pending waiter that `self` must not jump ahead of
    /// (§4.4 "Priority / waiting compatibility"). Derived from
    /// `granted_incompat` by dropping the `Exclusive` bit — "X starves
    /// nothing" — with `SharedHighPrio` and `Exclusive` themselves further
    /// promoted to "compatible with all pending" (empty), and
    /// `SharedWriteLowPrio` additionally yielding to pending readers, which
    /// is the one behavioral difference from plain `SharedWrite`.
    #[must_use]
    pub const fn waiting_incompat(self) -> u16 {
        match self {
            ObjectLockType::SharedHighPrio | ObjectLockType::Exclusive => 0,
            ObjectLockType::SharedWriteLowPrio => {
                (Self::SharedWrite.granted_incompat() & !X) | SR
            }
            other => other.granted_incompat() & !X,
        }
    }

    /// Fast-path counter increment for this type (§4.4 "Fast-path
    /// increments"). `Shared` and `SharedHighPrio` share the same 20-bit
    /// sub-field because the fast path cannot and need not distinguish
    /// them for compatibility purposes.
    #[must_use]
    pub const fn fast_path_increment(self) -> u64 {
        match self {
            ObjectLockType::Shared | ObjectLockType::SharedHighPrio => 1 << Self::SHIFT_S_SH,
            ObjectLockType::SharedRead => 1 << Self::SHIFT_SR,
            ObjectLockType::SharedWrite => 1 << Self::SHIFT_SW,
            ObjectLockType::SharedWriteLowPrio
            | ObjectLockType::SharedUpgradable
            | ObjectLockType::SharedReadOnly
            | ObjectLockType::SharedNoWrite
            | ObjectLockType::SharedNoReadWrite
            | ObjectLockType::Exclusive => 0,
        }
    }

    const SHIFT_S_SH: u32 = 0;
    const SHIFT_SR: u32 = 20;
    const SHIFT_SW: u32 = 40;
    const FIELD_MASK: u64 = (1 << 20) - 1;

    /// Reconstructs the "which unobtrusive types currently have fast-path
    /// holders" bitmask from the packed 64-bit counter, for use in
    /// `can_grant`'s step 2 (§4.3).
    #[must_use]
    pub const fn fast_path_granted_bitmap(counter: u64) -> u16 {
        let mut bitmap = 0u16;
        if (counter >> Self::SHIFT_S_SH) & Self::FIELD_MASK != 0 {
            bitmap |= S | SH;
        }
        if (counter >> Self::SHIFT_SR) & Self::FIELD_MASK != 0 {
            bitmap |= SR;
        }
        if (counter >> Self::SHIFT_SW) & Self::FIELD_MASK != 0 {
            bitmap |= SW;
        }
        bitmap
    }
}

/// A lock type, tagged by family. Comparisons, compatibility, and priority
/// are only ever evaluated between two types of the same family; crossing
/// families on the same key cannot happen because `Family::of` is a
/// deterministic function of the key's namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockType {
    /// A scoped-family lock type.
    Scoped(ScopedLockType),
    /// An object-family lock type.
    Object(ObjectLockType),
}

impl LockType {
    /// The family this type belongs to.
    #[must_use]
    pub const fn family(self) -> Family {
        match self {
            LockType::Scoped(_) => Family::Scoped,
            LockType::Object(_) => Family::Object,
        }
    }

    /// Strength rank within this type's family; higher is stronger.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            LockType::Scoped(t) => t as u8,
            LockType::Object(t) => t as u8,
        }
    }

    /// Whether `self` is at least as strong as `other`. Only meaningful
    /// when both are in the same family, which dedup (§4.5 step 1) and
    /// upgrade/downgrade always guarantee by construction.
    #[must_use]
    pub fn is_stronger_or_equal(self, other: LockType) -> bool {
        debug_assert_eq!(self.family(), other.family(), "compared across families");
        self.rank() >= other.rank()
    }

    /// Bitmask of types whose grant conflicts with a grant of `self`.
    #[must_use]
    pub const fn granted_incompat(self) -> u16 {
        match self {
            LockType::Scoped(t) => t.granted_incompat(),
            LockType::Object(t) => t.granted_incompat(),
        }
    }

    /// Bitmask of pending-waiter types `self` must not jump ahead of.
    #[must_use]
    pub const fn waiting_incompat(self) -> u16 {
        match self {
            LockType::Scoped(t) => t.waiting_incompat(),
            LockType::Object(t) => t.waiting_incompat(),
        }
    }

    /// Fast-path counter increment for this type; zero means obtrusive.
    #[must_use]
    pub const fn fast_path_increment(self) -> u64 {
        match self {
            LockType::Scoped(t) => t.fast_path_increment(),
            LockType::Object(t) => t.fast_path_increment(),
        }
    }

    /// A type is unobtrusive iff it has a nonzero fast-path increment
    /// (§GLOSSARY "Obtrusive / unobtrusive").
    #[must_use]
    pub const fn is_obtrusive(self) -> bool {
        self.fast_path_increment() == 0
    }

    /// Whether this type is a member of its family's hog-lock set (§4.4).
    #[must_use]
    pub const fn is_hog(self, family: Family) -> bool {
        match self {
            LockType::Scoped(_) => false,
            LockType::Object(t) => t.bit() & family.hog_types() != 0,
        }
    }

    /// This type's bit in its family's bitmask representation.
    #[must_use]
    pub const fn bit(self) -> u16 {
        match self {
            LockType::Scoped(t) => t.bit(),
            LockType::Object(t) => t.bit(),
        }
    }
}
