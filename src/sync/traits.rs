/*!
 * Synchronizer Policy Traits
 *
 * The capability set a lock author implements on top of the kernel.
 *
 * # Design: Capabilities Instead of Unsupported Hooks
 *
 * A policy implements only the mode it supports. The exclusive entry points
 * exist on `Synchronizer<P>` only when `P: ExclusiveSync`, the shared ones
 * only when `P: SharedSync`, so calling an unimplemented hook does not
 * compile.
 *
 * Hooks must not block. They report failure through their return value and
 * reserve `Err` for misuse, which aborts the surrounding acquire after its
 * queue node is cancelled.
 */

use super::synchronizer::SyncCore;
use crate::errors::SyncResult;

/// Exclusive-mode policy (locks)
pub trait ExclusiveSync: Send + Sync {
    /// Try to take `amount` units of state for the calling thread
    fn try_acquire(&self, core: &SyncCore, amount: i32) -> SyncResult<bool>;

    /// Give back `amount` units; `Ok(true)` means the state is now fully free
    fn try_release(&self, core: &SyncCore, amount: i32) -> SyncResult<bool>;

    /// Whether the calling thread holds the state exclusively
    ///
    /// Conditions rely on this to detect use without the lock.
    fn is_held_exclusively(&self, core: &SyncCore) -> bool;
}

/// Shared-mode policy (semaphores, latches)
pub trait SharedSync: Send + Sync {
    /// Try to take `amount` units
    ///
    /// Negative on failure; otherwise the remainder, where any value `>= 0`
    /// is success and a positive one hints that later waiters may succeed too.
    fn try_acquire_shared(&self, core: &SyncCore, amount: i32) -> SyncResult<i32>;

    /// Give back `amount` units; `Ok(true)` if waiters may now be satisfiable
    fn try_release_shared(&self, core: &SyncCore, amount: i32) -> SyncResult<bool>;
}
