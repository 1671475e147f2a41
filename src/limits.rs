/*!
 * Synchronizer Limits and Constants
 *
 * Centralized location for the queue status codes and timing thresholds
 * shared by the kernel, the condition queue and the lock policies.
 *
 * ## Conventions
 * - Performance-critical constants are marked with [PERF]
 * - Values that encode queue protocol state are marked with [PROTOCOL]
 */

use std::time::Duration;

// =============================================================================
// NODE STATUS CODES
// =============================================================================

/// Neutral status of a freshly enqueued node
/// [PROTOCOL] Tail nodes always carry this value until a successor arrives
pub const STATUS_NEUTRAL: i32 = 0;

/// Node gave up waiting (timeout, interrupt or failed hook)
/// [PROTOCOL] Terminal: the only positive status
pub const STATUS_CANCELLED: i32 = 1;

/// Successor is (or will be) blocked and must be woken on release
pub const STATUS_SIGNAL: i32 = -1;

/// Node is parked on a condition queue, not on the sync queue
pub const STATUS_CONDITION: i32 = -2;

/// Next shared acquire should propagate unconditionally
pub const STATUS_PROPAGATE: i32 = -3;

// =============================================================================
// TIMING
// =============================================================================

/// Remaining time below which timed waits spin instead of parking
/// [PERF] Timed parks cannot honour sub-microsecond precision
pub const SPIN_FOR_TIMEOUT_THRESHOLD: Duration = Duration::from_nanos(1000);

// =============================================================================
// LOCK ACCOUNTING
// =============================================================================

/// Amount taken by a single `lock()` / `acquire()`
pub const SINGLE_UNIT: i32 = 1;
