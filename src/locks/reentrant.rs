/*!
 * Reentrant Lock
 *
 * Owner-tracked exclusive lock with hold counting, built on the queued
 * synchronizer. State is the hold depth: 0 when free, N when the owner has
 * locked N times.
 *
 * # Fairness
 *
 * The non-fair lock lets an arriving thread take a free lock even when others
 * are queued. The fair lock only takes a free lock when no earlier thread is
 * waiting, and that applies to `try_lock` too.
 */

use super::Lock;
use crate::errors::{SyncError, SyncResult};
use crate::limits::SINGLE_UNIT;
use crate::sync::park::{self, ThreadHandle};
use crate::sync::{Condition, ExclusiveSync, Fairness, SyncConfig, SyncCore, Synchronizer};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Admission and hold-count rules for `ReentrantLock`
#[derive(Debug)]
pub struct ReentrantPolicy {
    fairness: Fairness,
}

impl ReentrantPolicy {
    fn claim(&self, core: &SyncCore, acquires: i32) -> bool {
        if core.compare_and_set_state(0, acquires) {
            core.set_exclusive_owner(Some(&park::current()));
            return true;
        }
        false
    }

    fn reenter(&self, core: &SyncCore, current: i32, acquires: i32) -> SyncResult<bool> {
        match current.checked_add(acquires) {
            Some(next) => {
                // Only the owner writes state while held
                core.set_state(next);
                Ok(true)
            }
            None => {
                warn!(hold_count = current, "reentrant lock hold count overflow");
                Err(SyncError::CountOverflow("lock".into()))
            }
        }
    }
}

impl ExclusiveSync for ReentrantPolicy {
    fn try_acquire(&self, core: &SyncCore, acquires: i32) -> SyncResult<bool> {
        let current = core.state();
        if current == 0 {
            if self.fairness.is_fair() && core.has_queued_predecessors() {
                return Ok(false);
            }
            return Ok(self.claim(core, acquires));
        }
        if core.is_owned_by_current_thread() {
            return self.reenter(core, current, acquires);
        }
        Ok(false)
    }

    fn try_release(&self, core: &SyncCore, releases: i32) -> SyncResult<bool> {
        if !core.is_owned_by_current_thread() {
            warn!("unlock attempted by a thread that does not hold the lock");
            return Err(SyncError::not_owner());
        }
        let remaining = core.state() - releases;
        let free = remaining == 0;
        if free {
            core.set_exclusive_owner(None);
        }
        core.set_state(remaining);
        Ok(free)
    }

    fn is_held_exclusively(&self, core: &SyncCore) -> bool {
        core.is_owned_by_current_thread()
    }
}

/// Condition variable created by `ReentrantLock::new_condition`
pub type ReentrantCondition = Condition<ReentrantPolicy>;

/// Reentrant mutual-exclusion lock
///
/// The thread that locks is the owner until it unlocks as many times as it
/// locked. Unlocking from any other thread fails with `IllegalMonitorState`.
pub struct ReentrantLock {
    sync: Arc<Synchronizer<ReentrantPolicy>>,
}

impl ReentrantLock {
    /// Non-fair lock
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let policy = ReentrantPolicy {
            fairness: config.fairness,
        };
        Self {
            sync: Arc::new(Synchronizer::new(policy)),
        }
    }

    /// Acquire the lock, blocking as long as needed
    ///
    /// An interrupt delivered while blocked does not abort the call; it is
    /// re-asserted once the lock is held.
    pub fn lock(&self) -> SyncResult<()> {
        if !self.is_fair() && self.sync.policy().claim(self.sync.core(), SINGLE_UNIT) {
            return Ok(());
        }
        self.sync.acquire(SINGLE_UNIT)
    }

    /// Acquire the lock unless the thread is interrupted first
    pub fn lock_interruptibly(&self) -> SyncResult<()> {
        self.sync.acquire_interruptibly(SINGLE_UNIT)
    }

    /// Acquire the lock only if it is available now
    ///
    /// A fair lock refuses while other threads are queued.
    pub fn try_lock(&self) -> SyncResult<bool> {
        self.sync.try_acquire(SINGLE_UNIT)
    }

    /// Acquire the lock within `timeout`; `Ok(false)` if it elapses
    pub fn try_lock_for(&self, timeout: Duration) -> SyncResult<bool> {
        self.sync.try_acquire_for(SINGLE_UNIT, timeout)
    }

    /// Release one level of the hold count
    pub fn unlock(&self) -> SyncResult<()> {
        self.sync.release(SINGLE_UNIT).map(|_| ())
    }

    /// Lock and return a guard that unlocks on drop
    pub fn lock_guard(&self) -> SyncResult<ReentrantLockGuard<'_>> {
        self.lock()?;
        Ok(ReentrantLockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// New condition variable bound to this lock
    pub fn new_condition(&self) -> ReentrantCondition {
        Condition::new(self.sync.clone())
    }

    /// Hold depth of the calling thread (0 if it is not the owner)
    pub fn hold_count(&self) -> i32 {
        if self.is_held_by_current_thread() {
            self.sync.state()
        } else {
            0
        }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.sync.is_held_exclusively()
    }

    /// Whether any thread holds the lock
    pub fn is_locked(&self) -> bool {
        self.sync.state() != 0
    }

    pub fn is_fair(&self) -> bool {
        self.sync.policy().fairness.is_fair()
    }

    /// Current owner, if the lock is held
    pub fn owner(&self) -> Option<ThreadHandle> {
        if self.sync.state() == 0 {
            None
        } else {
            self.sync.core().exclusive_owner()
        }
    }

    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }

    pub fn has_queued_thread(&self, thread: &ThreadHandle) -> bool {
        self.sync.is_queued(thread)
    }

    /// Estimated number of threads waiting to lock
    pub fn queue_length(&self) -> usize {
        self.sync.queue_length()
    }

    pub fn queued_threads(&self) -> Vec<ThreadHandle> {
        self.sync.queued_threads()
    }

    fn check_condition(&self, condition: &ReentrantCondition) -> SyncResult<()> {
        if condition.is_owned_by(&self.sync) {
            Ok(())
        } else {
            Err(SyncError::InvalidArgument(
                "condition belongs to another lock".into(),
            ))
        }
    }

    /// Whether any thread waits on `condition`; requires holding the lock
    pub fn has_waiters(&self, condition: &ReentrantCondition) -> SyncResult<bool> {
        self.check_condition(condition)?;
        condition.has_waiters()
    }

    pub fn wait_queue_length(&self, condition: &ReentrantCondition) -> SyncResult<usize> {
        self.check_condition(condition)?;
        condition.wait_queue_length()
    }

    pub fn waiting_threads(&self, condition: &ReentrantCondition) -> SyncResult<Vec<ThreadHandle>> {
        self.check_condition(condition)?;
        condition.waiting_threads()
    }
}

impl Lock for ReentrantLock {
    type Condition = ReentrantCondition;

    fn lock(&self) -> SyncResult<()> {
        ReentrantLock::lock(self)
    }

    fn lock_interruptibly(&self) -> SyncResult<()> {
        ReentrantLock::lock_interruptibly(self)
    }

    fn try_lock(&self) -> SyncResult<bool> {
        ReentrantLock::try_lock(self)
    }

    fn try_lock_for(&self, timeout: Duration) -> SyncResult<bool> {
        ReentrantLock::try_lock_for(self, timeout)
    }

    fn unlock(&self) -> SyncResult<()> {
        ReentrantLock::unlock(self)
    }

    fn new_condition(&self) -> ReentrantCondition {
        ReentrantLock::new_condition(self)
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReentrantLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("fair", &self.is_fair())
            .field("owner", &self.owner().map(|t| t.id()))
            .field("queue_length", &self.queue_length())
            .finish()
    }
}

/// Holds one level of a `ReentrantLock` until dropped
///
/// Not `Send`: the lock must be released by the thread that took it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReentrantLockGuard<'a> {
    lock: &'a ReentrantLock,
    _not_send: PhantomData<*const ()>,
}

impl ReentrantLockGuard<'_> {
    /// The lock this guard holds
    pub fn lock(&self) -> &ReentrantLock {
        self.lock
    }
}

impl Drop for ReentrantLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            warn!(error = %e, "lock guard dropped without holding its lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_reentrant_hold_count() {
        let lock = ReentrantLock::new();
        lock.lock().unwrap();
        lock.lock().unwrap();
        assert_eq!(lock.hold_count(), 2);
        assert!(lock.is_held_by_current_thread());

        lock.unlock().unwrap();
        assert!(lock.is_locked());
        lock.unlock().unwrap();
        assert!(!lock.is_locked());
        assert_eq!(lock.hold_count(), 0);
        assert!(lock.owner().is_none());
    }

    #[test]
    fn test_unlock_without_holding_fails() {
        let lock = ReentrantLock::new();
        assert!(matches!(lock.unlock(), Err(SyncError::IllegalMonitorState(_))));
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_guard_unlocks_on_drop() {
        let lock = ReentrantLock::new();
        {
            let _outer = lock.lock_guard().unwrap();
            let _inner = lock.lock_guard().unwrap();
            assert_eq!(lock.hold_count(), 2);
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_owner_reported() {
        let lock = ReentrantLock::new();
        lock.lock().unwrap();
        assert_eq!(lock.owner(), Some(park::current()));
        lock.unlock().unwrap();
    }

    #[test]
    fn test_hold_count_overflow() {
        let lock = ReentrantLock::new();
        lock.lock().unwrap();
        lock.sync.core().set_state(i32::MAX);

        assert_eq!(lock.lock(), Err(SyncError::CountOverflow("lock".into())));
        assert_eq!(lock.sync.state(), i32::MAX);

        lock.sync.core().set_state(1);
        lock.unlock().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_try_lock_fails_while_held_elsewhere() {
        let lock = Arc::new(ReentrantLock::new());
        let (locked_tx, locked_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let holder = {
            let lock = lock.clone();
            thread::spawn(move || {
                lock.lock().unwrap();
                locked_tx.send(()).unwrap();
                done_rx.recv().unwrap();
                lock.unlock().unwrap();
            })
        };

        locked_rx.recv().unwrap();
        assert!(!lock.try_lock().unwrap());
        assert!(!lock.is_held_by_current_thread());
        done_tx.send(()).unwrap();
        holder.join().unwrap();

        assert!(lock.try_lock().unwrap());
        lock.unlock().unwrap();
    }

    /// Free the lock without waking the queue, so a waiter stays parked
    /// while the state reads 0
    fn free_silently(lock: &ReentrantLock) {
        lock.sync.core().set_exclusive_owner(None);
        lock.sync.core().set_state(0);
    }

    /// Re-take a silently freed lock and hand it to the queue
    fn hand_back(lock: &ReentrantLock) {
        if lock.sync.core().compare_and_set_state(0, 1) {
            lock.sync.core().set_exclusive_owner(Some(&park::current()));
            lock.unlock().unwrap();
        }
    }

    fn queue_one_waiter(lock: &Arc<ReentrantLock>) -> thread::JoinHandle<()> {
        let (tx, rx) = mpsc::channel();
        let waiter = {
            let lock = lock.clone();
            thread::spawn(move || {
                tx.send(park::current()).unwrap();
                lock.lock().unwrap();
                lock.unlock().unwrap();
            })
        };
        let handle = rx.recv().unwrap();
        while !lock.has_queued_thread(&handle) {
            thread::yield_now();
        }
        waiter
    }

    #[test]
    fn test_fair_try_lock_respects_queue() {
        let lock = Arc::new(ReentrantLock::with_config(SyncConfig::fair()));
        lock.lock().unwrap();
        let waiter = queue_one_waiter(&lock);

        free_silently(&lock);
        let lock2 = lock.clone();
        let barged = thread::spawn(move || lock2.try_lock().unwrap()).join().unwrap();
        assert!(!barged);

        hand_back(&lock);
        waiter.join().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_non_fair_try_lock_barges() {
        let lock = Arc::new(ReentrantLock::new());
        lock.lock().unwrap();
        let waiter = queue_one_waiter(&lock);

        free_silently(&lock);
        let lock2 = lock.clone();
        let barged = thread::spawn(move || {
            let acquired = lock2.try_lock().unwrap();
            if acquired {
                lock2.unlock().unwrap();
            }
            acquired
        })
        .join()
        .unwrap();
        assert!(barged);

        hand_back(&lock);
        waiter.join().unwrap();
        assert!(!lock.is_locked());
    }

    /// Drive a lock only through the `Lock` trait
    fn lock_twice_then_release<L: Lock>(lock: &L) -> SyncResult<bool> {
        lock.lock()?;
        let reentered = lock.try_lock_for(Duration::from_millis(10))?;
        lock.unlock()?;
        lock.unlock()?;
        Ok(reentered)
    }

    #[test]
    fn test_lock_trait_delegates() {
        let lock = ReentrantLock::with_config(SyncConfig::fair());
        assert!(lock_twice_then_release(&lock).unwrap());
        assert!(!lock.is_locked());

        let dyn_lock: &dyn Lock<Condition = ReentrantCondition> = &lock;
        dyn_lock.lock_interruptibly().unwrap();
        assert!(dyn_lock.try_lock().unwrap());
        assert_eq!(lock.hold_count(), 2);

        let cond = dyn_lock.new_condition();
        assert!(!lock.has_waiters(&cond).unwrap());
        dyn_lock.unlock().unwrap();
        dyn_lock.unlock().unwrap();
        assert!(matches!(dyn_lock.unlock(), Err(SyncError::IllegalMonitorState(_))));
    }

    #[test]
    fn test_condition_from_other_lock_rejected() {
        let a = ReentrantLock::new();
        let b = ReentrantLock::new();
        let cond = b.new_condition();
        a.lock().unwrap();
        assert!(matches!(a.has_waiters(&cond), Err(SyncError::InvalidArgument(_))));
        a.unlock().unwrap();
    }
}
