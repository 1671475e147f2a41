/*!
 * Lock Primitives
 *
 * Concrete synchronizers built from kernel policies:
 * - `ReentrantLock`: owner-tracked exclusive lock with conditions
 * - `Semaphore`: counting semaphore over shared mode
 *
 * Both come in fair and non-fair flavours selected through `SyncConfig`.
 * Exclusive locks share the `Lock` trait so callers can stay generic over
 * the lock they are handed.
 */

mod reentrant;
mod semaphore;

pub use reentrant::{ReentrantCondition, ReentrantLock, ReentrantLockGuard, ReentrantPolicy};
pub use semaphore::{PermitPolicy, Semaphore};

use crate::errors::SyncResult;
use std::time::Duration;

/// Exclusive lock with interruptible, timed and condition support
pub trait Lock: Send + Sync {
    /// Condition variable type handed out by `new_condition`
    type Condition;

    /// Acquire, blocking as long as needed; interrupts are re-asserted
    fn lock(&self) -> SyncResult<()>;

    /// Acquire unless the thread is interrupted first
    fn lock_interruptibly(&self) -> SyncResult<()>;

    /// Acquire only if the lock is available now
    fn try_lock(&self) -> SyncResult<bool>;

    /// Acquire within `timeout`; `Ok(false)` if it elapses
    fn try_lock_for(&self, timeout: Duration) -> SyncResult<bool>;

    fn unlock(&self) -> SyncResult<()>;

    /// New condition variable bound to this lock
    fn new_condition(&self) -> Self::Condition;
}
