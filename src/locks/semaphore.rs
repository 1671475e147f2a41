/*!
 * Counting Semaphore
 *
 * Permit counter on the shared mode of the queued synchronizer. State is
 * the number of available permits and never goes negative.
 */

use crate::errors::{SyncError, SyncResult};
use crate::limits::SINGLE_UNIT;
use crate::sync::park::ThreadHandle;
use crate::sync::{Fairness, SharedSync, SyncConfig, SyncCore, Synchronizer};
use std::time::Duration;
use tracing::warn;

/// Permit accounting for `Semaphore`
#[derive(Debug)]
pub struct PermitPolicy {
    fairness: Fairness,
}

impl PermitPolicy {
    /// Barging decrement; negative result means not enough permits
    fn barge(core: &SyncCore, acquires: i32) -> i32 {
        loop {
            let available = core.state();
            let remaining = available - acquires;
            if remaining < 0 || core.compare_and_set_state(available, remaining) {
                return remaining;
            }
        }
    }
}

impl SharedSync for PermitPolicy {
    fn try_acquire_shared(&self, core: &SyncCore, acquires: i32) -> SyncResult<i32> {
        if !self.fairness.is_fair() {
            return Ok(Self::barge(core, acquires));
        }
        loop {
            if core.has_queued_predecessors() {
                return Ok(-1);
            }
            let available = core.state();
            let remaining = available - acquires;
            if remaining < 0 || core.compare_and_set_state(available, remaining) {
                return Ok(remaining);
            }
        }
    }

    fn try_release_shared(&self, core: &SyncCore, releases: i32) -> SyncResult<bool> {
        loop {
            let current = core.state();
            let Some(next) = current.checked_add(releases) else {
                warn!(available = current, releases, "semaphore permit count overflow");
                return Err(SyncError::CountOverflow("permit".into()));
            };
            if core.compare_and_set_state(current, next) {
                return Ok(true);
            }
        }
    }
}

fn check_permits(permits: i32) -> SyncResult<()> {
    if permits < 0 {
        return Err(SyncError::InvalidArgument(format!(
            "permit count must be non-negative, got {permits}"
        )));
    }
    Ok(())
}

/// Counting semaphore
///
/// Permits are not owned: any thread may release, and releasing more than
/// was acquired raises the available count.
pub struct Semaphore {
    sync: Synchronizer<PermitPolicy>,
}

impl Semaphore {
    /// Non-fair semaphore with `permits` initially available
    pub fn new(permits: i32) -> SyncResult<Self> {
        Self::with_config(permits, SyncConfig::default())
    }

    pub fn with_config(permits: i32, config: SyncConfig) -> SyncResult<Self> {
        check_permits(permits)?;
        let policy = PermitPolicy {
            fairness: config.fairness,
        };
        Ok(Self {
            sync: Synchronizer::with_state(policy, permits),
        })
    }

    /// Take one permit, blocking until available or interrupted
    pub fn acquire(&self) -> SyncResult<()> {
        self.sync.acquire_shared_interruptibly(SINGLE_UNIT)
    }

    /// Take one permit; an interrupt is re-asserted after it is granted
    pub fn acquire_uninterruptibly(&self) -> SyncResult<()> {
        self.sync.acquire_shared(SINGLE_UNIT)
    }

    /// Take one permit only if one is free now
    ///
    /// Barges even on a fair semaphore.
    pub fn try_acquire(&self) -> bool {
        PermitPolicy::barge(self.sync.core(), SINGLE_UNIT) >= 0
    }

    /// Take one permit within `timeout`; `Ok(false)` if it elapses
    pub fn try_acquire_for(&self, timeout: Duration) -> SyncResult<bool> {
        self.sync.try_acquire_shared_for(SINGLE_UNIT, timeout)
    }

    /// Return one permit
    pub fn release(&self) -> SyncResult<()> {
        self.sync.release_shared(SINGLE_UNIT).map(|_| ())
    }

    pub fn acquire_many(&self, permits: i32) -> SyncResult<()> {
        check_permits(permits)?;
        self.sync.acquire_shared_interruptibly(permits)
    }

    pub fn acquire_many_uninterruptibly(&self, permits: i32) -> SyncResult<()> {
        check_permits(permits)?;
        self.sync.acquire_shared(permits)
    }

    pub fn try_acquire_many(&self, permits: i32) -> SyncResult<bool> {
        check_permits(permits)?;
        Ok(PermitPolicy::barge(self.sync.core(), permits) >= 0)
    }

    pub fn try_acquire_many_for(&self, permits: i32, timeout: Duration) -> SyncResult<bool> {
        check_permits(permits)?;
        self.sync.try_acquire_shared_for(permits, timeout)
    }

    pub fn release_many(&self, permits: i32) -> SyncResult<()> {
        check_permits(permits)?;
        self.sync.release_shared(permits).map(|_| ())
    }

    pub fn available_permits(&self) -> i32 {
        self.sync.state()
    }

    /// Take every available permit, returning how many were taken
    pub fn drain_permits(&self) -> i32 {
        let core = self.sync.core();
        loop {
            let current = core.state();
            if current == 0 || core.compare_and_set_state(current, 0) {
                return current;
            }
        }
    }

    pub fn is_fair(&self) -> bool {
        self.sync.policy().fairness.is_fair()
    }

    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }

    /// Estimated number of threads waiting for permits
    pub fn queue_length(&self) -> usize {
        self.sync.queue_length()
    }

    pub fn queued_threads(&self) -> Vec<ThreadHandle> {
        self.sync.queued_threads()
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("permits", &self.available_permits())
            .field("fair", &self.is_fair())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_negative_permits_rejected() {
        assert!(matches!(Semaphore::new(-1), Err(SyncError::InvalidArgument(_))));
        let sem = Semaphore::new(0).unwrap();
        assert!(matches!(sem.release_many(-2), Err(SyncError::InvalidArgument(_))));
        assert!(matches!(sem.try_acquire_many(-1), Err(SyncError::InvalidArgument(_))));
        assert_eq!(sem.available_permits(), 0);
    }

    #[test]
    fn test_try_acquire_counts_down() {
        let sem = Semaphore::new(2).unwrap();
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        assert_eq!(sem.available_permits(), 0);

        sem.release().unwrap();
        assert_eq!(sem.available_permits(), 1);
    }

    #[test]
    fn test_try_acquire_many_is_all_or_nothing() {
        let sem = Semaphore::new(3).unwrap();
        assert!(!sem.try_acquire_many(4).unwrap());
        assert_eq!(sem.available_permits(), 3);
        assert!(sem.try_acquire_many(3).unwrap());
        assert_eq!(sem.available_permits(), 0);
    }

    #[test]
    fn test_drain_permits() {
        let sem = Semaphore::new(5).unwrap();
        sem.acquire_many(2).unwrap();
        assert_eq!(sem.drain_permits(), 3);
        assert_eq!(sem.drain_permits(), 0);
        assert_eq!(sem.available_permits(), 0);
    }

    #[test]
    fn test_release_overflow() {
        let sem = Semaphore::new(i32::MAX).unwrap();
        assert_eq!(sem.release(), Err(SyncError::CountOverflow("permit".into())));
        assert_eq!(sem.available_permits(), i32::MAX);
    }

    #[test]
    fn test_timed_acquire_times_out() {
        let sem = Semaphore::new(0).unwrap();
        assert!(!sem.try_acquire_for(Duration::from_millis(10)).unwrap());
        assert!(!sem.has_queued_threads());
    }

    #[test]
    fn test_release_wakes_blocked_acquirer() {
        let sem = Arc::new(Semaphore::new(0).unwrap());
        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.acquire())
        };
        while !sem.has_queued_threads() {
            thread::yield_now();
        }
        sem.release().unwrap();
        waiter.join().unwrap().unwrap();
        assert_eq!(sem.available_permits(), 0);
    }
}
