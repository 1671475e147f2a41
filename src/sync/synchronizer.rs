/*!
 * Queued Synchronizer
 *
 * The state machine every lock in this crate is built on: a single atomic
 * `i32` of policy-defined state plus a FIFO queue of blocked threads.
 *
 * # Acquire
 *
 * ```text
 * TRY -> ACQUIRED
 *     -> QUEUED -> [parked <-> runnable] -> TRY at queue front -> ACQUIRED
 *              \-> CANCELLED (interrupt / timeout / hook error)
 * ```
 *
 * A thread only retries the policy once its predecessor is the head, and
 * only parks after making sure that predecessor will signal it.
 *
 * # Shared mode
 *
 * A shared acquirer that takes the head wakes the next shared waiter right
 * away when capacity may remain, so a burst of releases fans out through
 * the queue without each waiter needing its own release event.
 */

use super::node::{same, Mode, NodeRef};
use super::park::{self, ThreadHandle, ThreadInner};
use super::queue::{CancelGuard, SyncQueue};
use super::traits::{ExclusiveSync, SharedSync};
use crate::errors::{SyncError, SyncResult};
use crate::limits::{SPIN_FOR_TIMEOUT_THRESHOLD, STATUS_NEUTRAL, STATUS_PROPAGATE, STATUS_SIGNAL};
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// State shared between the kernel and its policy
///
/// This is what policy hooks see: the state word, the exclusive owner slot
/// and read-only queue queries needed for fairness.
pub struct SyncCore {
    state: AtomicI32,
    owner: ArcSwapOption<ThreadInner>,
    pub(crate) queue: SyncQueue,
}

impl SyncCore {
    fn new(initial: i32) -> Self {
        Self {
            state: AtomicI32::new(initial),
            owner: ArcSwapOption::empty(),
            queue: SyncQueue::new(),
        }
    }

    /// Current state (acquire load)
    #[inline]
    pub fn state(&self) -> i32 {
        self.state.load(Ordering::Acquire)
    }

    /// Plain state write, for the thread that owns the state
    #[inline]
    pub fn set_state(&self, state: i32) {
        self.state.store(state, Ordering::Release);
    }

    /// Atomically replace `expect` with `update`
    #[inline]
    pub fn compare_and_set_state(&self, expect: i32, update: i32) -> bool {
        self.state
            .compare_exchange(expect, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// True if some other thread has been queued longer than the caller
    ///
    /// Fair policies refuse to acquire while this holds. Reads head and tail
    /// only; never mutates the queue.
    #[inline]
    pub fn has_queued_predecessors(&self) -> bool {
        self.queue.has_queued_predecessors()
    }

    pub fn exclusive_owner(&self) -> Option<ThreadHandle> {
        self.owner.load_full().map(ThreadHandle::from_inner)
    }

    pub fn set_exclusive_owner(&self, owner: Option<&ThreadHandle>) {
        self.owner.store(owner.map(|t| t.inner().clone()));
    }

    /// Whether the calling thread is the recorded exclusive owner
    pub fn is_owned_by_current_thread(&self) -> bool {
        let guard = self.owner.load();
        (*guard)
            .as_ref()
            .is_some_and(|owner| owner.id() == park::current_id())
    }
}

impl std::fmt::Debug for SyncCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCore")
            .field("state", &self.state())
            .field("owner", &self.exclusive_owner().map(|t| t.id()))
            .field("queued", &self.queue.queue_length())
            .finish()
    }
}

/// How a queued thread behaves while parked
#[derive(Debug, Clone, Copy)]
enum Blocking {
    /// Interrupts are remembered and replayed after acquiring
    Uninterruptible,
    /// An interrupt cancels the wait
    Interruptible,
    /// An interrupt or the deadline cancels the wait
    Until(Instant),
}

enum Queued {
    Acquired { interrupted: bool },
    TimedOut,
}

/// Queue-based synchronizer parameterised by its admission policy
pub struct Synchronizer<P> {
    core: SyncCore,
    policy: P,
}

impl<P> Synchronizer<P> {
    /// Synchronizer with state 0
    pub fn new(policy: P) -> Self {
        Self::with_state(policy, 0)
    }

    pub fn with_state(policy: P, initial: i32) -> Self {
        Self {
            core: SyncCore::new(initial),
            policy,
        }
    }

    #[inline]
    pub fn core(&self) -> &SyncCore {
        &self.core
    }

    #[inline]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    #[inline]
    pub fn state(&self) -> i32 {
        self.core.state()
    }

    #[inline]
    pub fn has_queued_predecessors(&self) -> bool {
        self.core.has_queued_predecessors()
    }

    /// Whether any thread is waiting (racy, diagnostic)
    pub fn has_queued_threads(&self) -> bool {
        self.core.queue.has_queued_threads()
    }

    /// Whether any thread has ever had to queue
    pub fn has_contended(&self) -> bool {
        self.core.queue.has_contended()
    }

    /// Longest-waiting thread, if any
    pub fn first_queued_thread(&self) -> Option<ThreadHandle> {
        self.core.queue.first_queued_thread()
    }

    pub fn is_queued(&self, thread: &ThreadHandle) -> bool {
        self.core.queue.is_queued(thread)
    }

    /// Estimate of the number of waiting threads
    pub fn queue_length(&self) -> usize {
        self.core.queue.queue_length()
    }

    pub fn queued_threads(&self) -> Vec<ThreadHandle> {
        self.core.queue.queued_threads(None)
    }

    pub fn exclusive_queued_threads(&self) -> Vec<ThreadHandle> {
        self.core.queue.queued_threads(Some(Mode::Exclusive))
    }

    pub fn shared_queued_threads(&self) -> Vec<ThreadHandle> {
        self.core.queue.queued_threads(Some(Mode::Shared))
    }

    /// Shared acquire/release propagation
    ///
    /// Wakes the head's successor if it asked for a signal, otherwise marks
    /// the head PROPAGATE so the next shared acquirer keeps the cascade
    /// going. Loops until the head is stable across one pass.
    fn propagate_release(&self) {
        let queue = &self.core.queue;
        loop {
            let head = queue.head();
            if let Some(h) = &head {
                if !same(&head, &queue.tail()) {
                    let ws = h.status();
                    if ws == STATUS_SIGNAL {
                        if !h.cas_status(STATUS_SIGNAL, STATUS_NEUTRAL) {
                            continue;
                        }
                        queue.unpark_successor(h);
                    } else if ws == STATUS_NEUTRAL
                        && !h.cas_status(STATUS_NEUTRAL, STATUS_PROPAGATE)
                    {
                        continue;
                    }
                }
            }
            if same(&head, &queue.head()) {
                break;
            }
        }
    }

    fn set_head_and_propagate(&self, node: &NodeRef, remainder: i32) {
        let queue = &self.core.queue;
        let old_head = queue.head();
        queue.set_head(node);

        let wants_signal = |head: Option<NodeRef>| head.map_or(true, |h| h.status() < 0);
        if remainder > 0 || wants_signal(old_head) || wants_signal(queue.head()) {
            let next = node.next.load_full();
            if next.map_or(true, |s| s.is_shared()) {
                self.propagate_release();
            }
        }
    }

    /// Park-and-retry loop shared by every queued acquire
    ///
    /// `try_at_front` runs only while `node`'s predecessor is the head and
    /// must promote `node` to head when it succeeds.
    fn park_in_queue<F>(&self, node: &NodeRef, blocking: Blocking, mut try_at_front: F) -> SyncResult<Queued>
    where
        F: FnMut(&NodeRef) -> SyncResult<bool>,
    {
        let queue = &self.core.queue;
        let guard = CancelGuard::new(queue, node);
        let mut interrupted = false;

        loop {
            let pred = node.predecessor();
            if queue.is_head(&pred) && try_at_front(node)? {
                // Old head leaves the queue; drop its forward link
                pred.next.store(None);
                guard.disarm();
                return Ok(Queued::Acquired { interrupted });
            }

            match blocking {
                Blocking::Uninterruptible => {
                    if queue.should_park_after_failed_acquire(&pred, node) {
                        park::park();
                        interrupted |= park::interrupted();
                    }
                }
                Blocking::Interruptible => {
                    if queue.should_park_after_failed_acquire(&pred, node) {
                        park::park();
                        if park::interrupted() {
                            debug!("interruptible acquire aborted");
                            return Err(SyncError::Interrupted);
                        }
                    }
                }
                Blocking::Until(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(Queued::TimedOut);
                    }
                    if queue.should_park_after_failed_acquire(&pred, node)
                        && remaining > SPIN_FOR_TIMEOUT_THRESHOLD
                    {
                        park::park_timeout(remaining);
                    } else {
                        std::hint::spin_loop();
                    }
                    if park::interrupted() {
                        debug!("timed acquire interrupted");
                        return Err(SyncError::Interrupted);
                    }
                }
            }
        }
    }
}

/// Absolute deadline for a relative timeout, `None` if it does not fit
#[inline]
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Re-assert an interrupt that an uninterruptible wait swallowed
#[inline]
fn self_interrupt() {
    park::current().set_interrupted();
}

// =============================================================================
// EXCLUSIVE MODE
// =============================================================================

impl<P: ExclusiveSync> Synchronizer<P> {
    /// Single policy attempt, never queues
    #[inline]
    pub fn try_acquire(&self, amount: i32) -> SyncResult<bool> {
        self.policy.try_acquire(&self.core, amount)
    }

    #[inline]
    pub fn is_held_exclusively(&self) -> bool {
        self.policy.is_held_exclusively(&self.core)
    }

    fn try_exclusive_at_front(&self, node: &NodeRef, amount: i32) -> SyncResult<bool> {
        if self.policy.try_acquire(&self.core, amount)? {
            self.core.queue.set_head(node);
            return Ok(true);
        }
        Ok(false)
    }

    /// Acquire for an already-enqueued node; returns whether an interrupt was swallowed
    pub(crate) fn acquire_queued(&self, node: &NodeRef, amount: i32) -> SyncResult<bool> {
        match self.park_in_queue(node, Blocking::Uninterruptible, |n| {
            self.try_exclusive_at_front(n, amount)
        })? {
            Queued::Acquired { interrupted } => Ok(interrupted),
            Queued::TimedOut => unreachable!("untimed wait cannot time out"),
        }
    }

    /// Acquire `amount`, blocking as long as needed
    ///
    /// Not interruptible: an interrupt seen while parked is re-asserted on
    /// the thread once the acquire succeeds.
    pub fn acquire(&self, amount: i32) -> SyncResult<()> {
        if !self.try_acquire(amount)? {
            let node = self.core.queue.add_waiter(Mode::Exclusive);
            if self.acquire_queued(&node, amount)? {
                self_interrupt();
            }
        }
        Ok(())
    }

    /// Acquire `amount`, failing with `Interrupted` if the thread is interrupted
    pub fn acquire_interruptibly(&self, amount: i32) -> SyncResult<()> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        if !self.try_acquire(amount)? {
            let node = self.core.queue.add_waiter(Mode::Exclusive);
            self.park_in_queue(&node, Blocking::Interruptible, |n| {
                self.try_exclusive_at_front(n, amount)
            })?;
        }
        Ok(())
    }

    /// Acquire `amount` within `timeout`; `Ok(false)` when it elapses
    pub fn try_acquire_for(&self, amount: i32, timeout: Duration) -> SyncResult<bool> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        if self.try_acquire(amount)? {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        let Some(deadline) = deadline_after(timeout) else {
            self.acquire_interruptibly(amount)?;
            return Ok(true);
        };

        let node = self.core.queue.add_waiter(Mode::Exclusive);
        let outcome = self.park_in_queue(&node, Blocking::Until(deadline), |n| {
            self.try_exclusive_at_front(n, amount)
        })?;
        Ok(matches!(outcome, Queued::Acquired { .. }))
    }

    /// Release `amount`; wakes the first waiter once the state is fully free
    ///
    /// Returns whether the state became free.
    pub fn release(&self, amount: i32) -> SyncResult<bool> {
        if self.policy.try_release(&self.core, amount)? {
            if let Some(head) = self.core.queue.head() {
                if head.status() != STATUS_NEUTRAL {
                    self.core.queue.unpark_successor(&head);
                }
            }
            return Ok(true);
        }
        Ok(false)
    }
}

// =============================================================================
// SHARED MODE
// =============================================================================

impl<P: SharedSync> Synchronizer<P> {
    /// Single policy attempt, never queues; negative on failure
    #[inline]
    pub fn try_acquire_shared(&self, amount: i32) -> SyncResult<i32> {
        self.policy.try_acquire_shared(&self.core, amount)
    }

    fn try_shared_at_front(&self, node: &NodeRef, amount: i32) -> SyncResult<bool> {
        let remainder = self.policy.try_acquire_shared(&self.core, amount)?;
        if remainder >= 0 {
            self.set_head_and_propagate(node, remainder);
            return Ok(true);
        }
        Ok(false)
    }

    /// Acquire `amount` in shared mode, not interruptible
    pub fn acquire_shared(&self, amount: i32) -> SyncResult<()> {
        if self.try_acquire_shared(amount)? < 0 {
            let node = self.core.queue.add_waiter(Mode::Shared);
            let outcome = self.park_in_queue(&node, Blocking::Uninterruptible, |n| {
                self.try_shared_at_front(n, amount)
            })?;
            if matches!(outcome, Queued::Acquired { interrupted: true }) {
                self_interrupt();
            }
        }
        Ok(())
    }

    /// Acquire `amount` in shared mode, failing with `Interrupted` on interrupt
    pub fn acquire_shared_interruptibly(&self, amount: i32) -> SyncResult<()> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        if self.try_acquire_shared(amount)? < 0 {
            let node = self.core.queue.add_waiter(Mode::Shared);
            self.park_in_queue(&node, Blocking::Interruptible, |n| {
                self.try_shared_at_front(n, amount)
            })?;
        }
        Ok(())
    }

    /// Acquire `amount` in shared mode within `timeout`; `Ok(false)` when it elapses
    pub fn try_acquire_shared_for(&self, amount: i32, timeout: Duration) -> SyncResult<bool> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        if self.try_acquire_shared(amount)? >= 0 {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        let Some(deadline) = deadline_after(timeout) else {
            self.acquire_shared_interruptibly(amount)?;
            return Ok(true);
        };

        let node = self.core.queue.add_waiter(Mode::Shared);
        let outcome = self.park_in_queue(&node, Blocking::Until(deadline), |n| {
            self.try_shared_at_front(n, amount)
        })?;
        Ok(matches!(outcome, Queued::Acquired { .. }))
    }

    /// Release `amount` in shared mode and always run a wake pass
    pub fn release_shared(&self, amount: i32) -> SyncResult<bool> {
        if self.policy.try_release_shared(&self.core, amount)? {
            self.propagate_release();
            return Ok(true);
        }
        Ok(false)
    }
}

impl<P> std::fmt::Debug for Synchronizer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer").field("core", &self.core).finish()
    }
}
