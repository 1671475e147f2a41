/*!
 * Queued Sync Library
 * FIFO-queue synchronizer kernel with reentrant locks, semaphores and conditions
 */

pub mod errors;
pub mod limits;
pub mod locks;
pub mod monitoring;
pub mod sync;

// Re-exports
pub use errors::{SyncError, SyncResult};
pub use locks::{Lock, ReentrantCondition, ReentrantLock, ReentrantLockGuard, Semaphore};
pub use monitoring::init_tracing;
pub use sync::park;
pub use sync::{Condition, ExclusiveSync, Fairness, SharedSync, SyncConfig, SyncCore, Synchronizer, ThreadHandle};
