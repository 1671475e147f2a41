/*!
 * Queued Synchronizer Kernel
 *
 * Blocking-synchronizer framework for building locks and semaphores:
 * - Atomic state word with policy-defined meaning
 * - Lock-free FIFO wait queue with cancellation
 * - Exclusive and shared acquisition with release propagation
 * - Condition queues over exclusive synchronizers
 *
 * # Architecture
 *
 * A `Synchronizer<P>` owns the state and queue and runs every blocking
 * algorithm. The policy `P` decides what the state means by implementing
 * `ExclusiveSync`, `SharedSync` or both. Threads block through the `park`
 * module, which also carries the per-thread interrupt flag.
 */

mod condition;
mod config;
mod node;
pub mod park;
mod queue;
mod synchronizer;
mod traits;

pub use condition::Condition;
pub use config::{Fairness, SyncConfig};
pub use park::ThreadHandle;
pub use synchronizer::{SyncCore, Synchronizer};
pub use traits::{ExclusiveSync, SharedSync};
