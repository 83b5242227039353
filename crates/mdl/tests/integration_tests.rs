//! Integration tests for the metadata lock manager.
//!
//! These exercise `Context`/`LockTable` end to end, reproducing the
//! concrete scenarios spelled out in the design (basic read sharing, a
//! writer blocking readers, timeouts, upgrade-without-deadlock, and
//! savepoint rollback) rather than poking at any single module in
//! isolation.

use mdl::{
    AcquireDecision, AcquireOutcome, Context, Duration, KillStatus, LockTable, LockType, MdlContextOwner,
    MdlError, MdlKey, Namespace, ObjectLockType, Request,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

struct TestOwner {
    killed: AtomicBool,
}

impl TestOwner {
    fn alive() -> Arc<Self> {
        Arc::new(Self { killed: AtomicBool::new(false) })
    }
}

impl MdlContextOwner for TestOwner {
    fn enter_cond(&self, _stage: &'static str) {}
    fn exit_cond(&self, _stage: &'static str) {}
    fn is_killed(&self) -> KillStatus {
        if self.killed.load(Ordering::Acquire) {
            KillStatus::Killed
        } else {
            KillStatus::Alive
        }
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

// Indirection so a test can flip the owner's killed flag; `Context::new`
// takes ownership of the `Box<dyn MdlContextOwner>`, so the flag itself
// has to live behind an `Arc` shared between the context and the test.
struct ForwardingOwner(Arc<TestOwner>);
impl MdlContextOwner for ForwardingOwner {
    fn enter_cond(&self, stage: &'static str) {
        self.0.enter_cond(stage);
    }
    fn exit_cond(&self, stage: &'static str) {
        self.0.exit_cond(stage);
    }
    fn is_killed(&self) -> KillStatus {
        self.0.is_killed()
    }
    fn notify_shared_lock(&self, other: u64, abort: bool) {
        self.0.notify_shared_lock(other, abort);
    }
    fn notify_hton_pre_acquire_exclusive(&self, key: &MdlKey) -> AcquireDecision {
        self.0.notify_hton_pre_acquire_exclusive(key)
    }
    fn notify_hton_post_release_exclusive(&self, key: &MdlKey) {
        self.0.notify_hton_post_release_exclusive(key);
    }
    fn rand_seed(&self) -> u32 {
        self.0.rand_seed()
    }
}

fn ctx() -> Arc<Context> {
    Context::new(Box::new(ForwardingOwner(TestOwner::alive())))
}

fn table_key(name: &str) -> MdlKey {
    MdlKey::new(Namespace::Table, "db", name)
}

/// Scenario 1 (design doc §8): two contexts share `SharedRead` via the
/// fast path, and the packed counter reflects both holders.
#[test]
fn basic_read_sharing_uses_the_fast_path() {
    let table = LockTable::new();
    let a = ctx();
    let b = ctx();
    let key = table_key("t");
    let req = Request::new(key, LockType::Object(ObjectLockType::SharedRead), Duration::Transaction);

    let ticket_a = a.acquire(&table, &req, StdDuration::from_secs(1)).expect("a granted");
    let ticket_b = b.acquire(&table, &req, StdDuration::from_secs(1)).expect("b granted");

    assert!(ticket_a.is_fast_path());
    assert!(ticket_b.is_fast_path());
    let lock = table.find_or_insert(req.key()).expect("alloc");
    let bitmap = ObjectLockType::fast_path_granted_bitmap(lock.read().fast_path_granted_count());
    assert_ne!(bitmap & ObjectLockType::SharedRead.bit(), 0);
}

/// Scenario 2: a writer waiting on a reader gets notified, and grants
/// once the reader releases, well inside its timeout.
#[test]
fn writer_blocks_behind_a_reader_and_grants_on_release() {
    let table = Arc::new(LockTable::new());
    let reader = ctx();
    let writer = ctx();
    let key = table_key("t");

    let read_req = Request::new(key.clone(), LockType::Object(ObjectLockType::SharedRead), Duration::Transaction);
    let write_req = Request::new(key, LockType::Object(ObjectLockType::Exclusive), Duration::Transaction);

    // Force the reader onto the slow path by materializing it as an
    // explicit-duration ticket, so it actually sits in `granted` and the
    // writer is the one that must wait (fast-path readers never block a
    // writer from *attempting* to wait, but the scenario wants a reader
    // that is visibly granted and later released).
    let read_req_explicit = Request::new(read_req.key().clone(), read_req.lock_type(), Duration::Explicit);
    let read_ticket = reader.acquire(&table, &read_req_explicit, StdDuration::from_secs(1)).expect("reader granted");

    let table2 = Arc::clone(&table);
    let writer2 = Arc::clone(&writer);
    let handle = std::thread::spawn(move || writer2.acquire(&table2, &write_req, StdDuration::from_secs(1)));

    std::thread::sleep(StdDuration::from_millis(50));
    reader.release(&table, &read_ticket);

    let write_ticket = handle.join().expect("writer thread panicked").expect("writer eventually granted");
    assert_eq!(write_ticket.lock_type(), LockType::Object(ObjectLockType::Exclusive));
}

/// Scenario 3: a waiter that never gets satisfied returns `Timeout`, and
/// the holder's own state is left untouched.
#[test]
fn timeout_leaves_the_holder_unaffected() {
    let table = LockTable::new();
    let holder = ctx();
    let waiter = ctx();
    let key = table_key("t");

    let hold_req = Request::new(key.clone(), LockType::Object(ObjectLockType::SharedNoReadWrite), Duration::Transaction);
    let wait_req = Request::new(key, LockType::Object(ObjectLockType::SharedWrite), Duration::Transaction);

    let hold_ticket = holder.acquire(&table, &hold_req, StdDuration::from_secs(1)).expect("holder granted");
    let result = waiter.acquire(&table, &wait_req, StdDuration::from_millis(100));

    assert!(matches!(result, Err(MdlError::Timeout)));
    assert_eq!(hold_ticket.lock().read().obtrusive_count(), 1);
    assert_eq!(hold_ticket.lock().read().waiting_count(), 0);
}

/// Scenario 4: a classic two-context deadlock resolves with exactly one
/// victim, and the survivor eventually gets granted.
#[test]
fn two_context_deadlock_resolves_with_one_survivor() {
    let table = Arc::new(LockTable::new());
    let a = ctx();
    let b = ctx();
    let t1 = table_key("t1");
    let t2 = table_key("t2");

    let a_t1 = Request::new(t1.clone(), LockType::Object(ObjectLockType::Exclusive), Duration::Transaction);
    let b_t2 = Request::new(t2.clone(), LockType::Object(ObjectLockType::Exclusive), Duration::Transaction);
    a.acquire(&table, &a_t1, StdDuration::from_secs(1)).expect("a holds t1");
    b.acquire(&table, &b_t2, StdDuration::from_secs(1)).expect("b holds t2");

    let a_t2 = Request::new(t2, LockType::Object(ObjectLockType::Exclusive), Duration::Transaction);
    let b_t1 = Request::new(t1, LockType::Object(ObjectLockType::Exclusive), Duration::Transaction);

    let table_a = Arc::clone(&table);
    let a2 = Arc::clone(&a);
    let handle_a = std::thread::spawn(move || a2.acquire(&table_a, &a_t2, StdDuration::from_secs(10)));

    let table_b = Arc::clone(&table);
    let b2 = Arc::clone(&b);
    let handle_b = std::thread::spawn(move || b2.acquire(&table_b, &b_t1, StdDuration::from_secs(10)));

    let result_a = handle_a.join().expect("a thread panicked");
    let result_b = handle_b.join().expect("b thread panicked");

    let outcomes = [result_a.is_err(), result_b.is_err()];
    assert_eq!(outcomes.iter().filter(|&&failed| failed).count(), 1, "exactly one side must be the deadlock victim");
    for result in [result_a, result_b] {
        if let Err(err) = result {
            assert!(matches!(err, MdlError::Deadlock));
        }
    }
}

/// Scenario 6: upgrading `SharedUpgradable` to `Exclusive` while another
/// context holds a compatible `SharedRead` succeeds once that context
/// releases, without ever being mistaken for a deadlock.
#[test]
fn upgrade_succeeds_once_the_conflicting_reader_releases() {
    let table = Arc::new(LockTable::new());
    let upgrader = ctx();
    let reader = ctx();
    let key = table_key("t");

    let su_req = Request::new(key.clone(), LockType::Object(ObjectLockType::SharedUpgradable), Duration::Transaction);
    let sr_req = Request::new(key, LockType::Object(ObjectLockType::SharedRead), Duration::Explicit);

    let su_ticket = upgrader.acquire(&table, &su_req, StdDuration::from_secs(1)).expect("upgrader granted");
    let sr_ticket = reader.acquire(&table, &sr_req, StdDuration::from_secs(1)).expect("reader granted");

    let table2 = Arc::clone(&table);
    let upgrader2 = Arc::clone(&upgrader);
    let su_ticket2 = Arc::clone(&su_ticket);
    let handle = std::thread::spawn(move || {
        upgrader2.upgrade(&table2, &su_ticket2, LockType::Object(ObjectLockType::Exclusive), StdDuration::from_secs(5))
    });

    std::thread::sleep(StdDuration::from_millis(50));
    reader.release(&table, &sr_ticket);

    handle.join().expect("upgrade thread panicked").expect("upgrade succeeds");
    assert_eq!(su_ticket.lock_type(), LockType::Object(ObjectLockType::Exclusive));
    assert_eq!(su_ticket.lock().read().obtrusive_count(), 1);
}

/// `try_acquire` never blocks: a conflicting request is reported as
/// `NotGranted` immediately rather than parking.
#[test]
fn try_acquire_never_blocks_on_a_conflict() {
    let table = LockTable::new();
    let a = ctx();
    let b = ctx();
    let key = table_key("t");
    let req = Request::new(key, LockType::Object(ObjectLockType::Exclusive), Duration::Transaction);

    a.acquire(&table, &req, StdDuration::from_secs(1)).expect("a granted");
    let outcome = b.try_acquire(&table, &req).expect("no allocation error");
    assert!(matches!(outcome, AcquireOutcome::NotGranted));
    // The lock table must not have grown a waiting entry out of a
    // non-blocking attempt.
    let lock = table.find_or_insert(&table_key("t")).expect("alloc");
    assert_eq!(lock.read().waiting_count(), 0);
}

/// `acquire_many` sorts its batch into key order before acquiring, so two
/// contexts racing over the same multi-table DDL can never deadlock
/// purely from acquisition order, and a mid-batch failure rolls the whole
/// batch back.
#[test]
fn acquire_many_rolls_back_the_whole_batch_on_failure() {
    let table = LockTable::new();
    let blocker = ctx();
    let caller = ctx();
    // Named so `free_key` sorts before `blocked_key` under `acquire_many`'s
    // deterministic key ordering: the caller must actually be granted the
    // first request before hitting the second, so the rollback has
    // something real to undo.
    let free_key = table_key("aaa_free");
    let blocked_key = table_key("blocked");

    let blocker_req = Request::new(blocked_key.clone(), LockType::Object(ObjectLockType::Exclusive), Duration::Transaction);
    blocker.acquire(&table, &blocker_req, StdDuration::from_secs(1)).expect("blocker granted");

    let batch = vec![
        Request::new(free_key.clone(), LockType::Object(ObjectLockType::Exclusive), Duration::Transaction),
        Request::new(blocked_key, LockType::Object(ObjectLockType::Exclusive), Duration::Transaction),
    ];

    let result = caller.acquire_many(&table, &batch, StdDuration::from_millis(100));
    assert!(matches!(result, Err(MdlError::Timeout)));

    // The first request in the batch must have been rolled back too.
    let free_lock = table.find_or_insert(&free_key).expect("alloc");
    assert!(free_lock.is_empty());
    assert_eq!(caller.all_tickets().len(), 0);
}

/// A killed connection's parked wait resolves as `Killed`, not `Timeout`.
#[test]
fn killed_connection_resolves_as_killed_not_timeout() {
    let table = Arc::new(LockTable::new());
    let holder = ctx();
    let owner = TestOwner::alive();
    let waiter = Context::new(Box::new(ForwardingOwner(Arc::clone(&owner))));
    let key = table_key("t");

    let hold_req = Request::new(key.clone(), LockType::Object(ObjectLockType::Exclusive), Duration::Transaction);
    holder.acquire(&table, &hold_req, StdDuration::from_secs(5)).expect("holder granted");

    let wait_req = Request::new(key, LockType::Object(ObjectLockType::Exclusive), Duration::Transaction);
    let table2 = Arc::clone(&table);
    let waiter2 = Arc::clone(&waiter);
    let handle = std::thread::spawn(move || waiter2.acquire(&table2, &wait_req, StdDuration::from_secs(5)));

    std::thread::sleep(StdDuration::from_millis(50));
    owner.killed.store(true, Ordering::Release);

    let result = handle.join().expect("waiter thread panicked");
    assert!(matches!(result, Err(MdlError::Killed)));
}

/// Savepoint/rollback round-trip (design doc §8 "Round-trip laws"):
/// rolling back restores the duration lists to their pre-acquire length
/// and releases the underlying locks.
#[test]
fn savepoint_rollback_restores_prior_ticket_list_length() {
    let table = LockTable::new();
    let a = ctx();
    let t1 = table_key("t1");
    let t2 = table_key("t2");

    let req1 = Request::new(t1, LockType::Object(ObjectLockType::Exclusive), Duration::Transaction);
    a.acquire(&table, &req1, StdDuration::from_secs(1)).expect("first granted");

    let before = a.all_tickets().len();
    let savepoint = a.savepoint();

    let req2 = Request::new(t2.clone(), LockType::Object(ObjectLockType::Exclusive), Duration::Transaction);
    let second = a.acquire(&table, &req2, StdDuration::from_secs(1)).expect("second granted");

    a.rollback_to(&table, savepoint);

    assert_eq!(a.all_tickets().len(), before);
    assert!(second.lock().is_empty());
    let lock = table.find_or_insert(&t2).expect("alloc");
    assert!(lock.is_empty());
}
