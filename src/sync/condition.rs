/*!
 * Condition Queue
 *
 * Condition variables over an exclusive synchronizer.
 *
 * # Design
 *
 * Each condition keeps its own FIFO chain of waiter nodes, linked through
 * `next_waiter` from `first_waiter` to `last_waiter`. `wait` parks a node
 * on that chain and fully releases the lock; `signal` moves the oldest live
 * node onto the synchronizer's sync queue, where it competes for the lock
 * like any other waiter. Queue membership, not a flag, is the source of
 * truth for "was I signalled": a waiter keeps parking until its node shows
 * up on the sync queue.
 *
 * Every operation requires the caller to hold the lock, so the chain is
 * never contended. Its `ArcSwapOption` slots only provide safe interior
 * mutability.
 */

use super::node::{NodeRef, WaitNode};
use super::park;
use super::park::ThreadHandle;
use super::synchronizer::Synchronizer;
use super::traits::ExclusiveSync;
use crate::errors::{SyncError, SyncResult};
use crate::limits::{SPIN_FOR_TIMEOUT_THRESHOLD, STATUS_CANCELLED, STATUS_CONDITION};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// How an interrupt observed during a wait is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptMode {
    None,
    /// Interrupted after being signalled: re-assert on the thread
    Reinterrupt,
    /// Interrupted before being signalled: fail with `Interrupted`
    Throw,
}

/// Condition variable bound to one exclusive synchronizer
pub struct Condition<P: ExclusiveSync> {
    sync: Arc<Synchronizer<P>>,
    first_waiter: ArcSwapOption<WaitNode>,
    last_waiter: ArcSwapOption<WaitNode>,
}

impl<P: ExclusiveSync> Condition<P> {
    pub(crate) fn new(sync: Arc<Synchronizer<P>>) -> Self {
        Self {
            sync,
            first_waiter: ArcSwapOption::empty(),
            last_waiter: ArcSwapOption::empty(),
        }
    }

    /// Whether this condition was created by `sync`
    pub(crate) fn is_owned_by(&self, sync: &Arc<Synchronizer<P>>) -> bool {
        Arc::ptr_eq(&self.sync, sync)
    }

    fn check_held(&self) -> SyncResult<()> {
        if self.sync.is_held_exclusively() {
            return Ok(());
        }
        warn!("condition used without holding its lock");
        Err(SyncError::IllegalMonitorState(
            "condition used without holding its lock".into(),
        ))
    }

    /// Walk the chain from the oldest waiter
    fn chain(&self) -> impl Iterator<Item = NodeRef> {
        std::iter::successors(self.first_waiter.load_full(), |node| {
            node.next_waiter.load_full()
        })
    }

    /// Append a node for the calling thread
    fn add_waiter(&self) -> NodeRef {
        if self
            .last_waiter
            .load_full()
            .is_some_and(|last| last.status() != STATUS_CONDITION)
        {
            self.unlink_cancelled_waiters();
        }
        let node = Arc::new(WaitNode::for_condition(&park::current()));
        match self.last_waiter.load_full() {
            Some(last) => last.next_waiter.store(Some(node.clone())),
            None => self.first_waiter.store(Some(node.clone())),
        }
        self.last_waiter.store(Some(node.clone()));
        node
    }

    /// Splice every node that left the condition state out of the chain
    fn unlink_cancelled_waiters(&self) {
        let mut trail: Option<NodeRef> = None;
        let mut cursor = self.first_waiter.load_full();
        while let Some(node) = cursor {
            let next = node.next_waiter.load_full();
            if node.status() == STATUS_CONDITION {
                trail = Some(node);
            } else {
                node.next_waiter.store(None);
                match &trail {
                    Some(kept) => kept.next_waiter.store(next.clone()),
                    None => self.first_waiter.store(next.clone()),
                }
                if next.is_none() {
                    self.last_waiter.store(trail.clone());
                }
            }
            cursor = next;
        }
    }

    /// Release the lock completely, returning the depth to restore
    fn full_release(&self, node: &NodeRef) -> SyncResult<i32> {
        let saved = self.sync.state();
        match self.sync.release(saved) {
            Ok(true) => Ok(saved),
            Ok(false) => {
                node.set_status(STATUS_CANCELLED);
                Err(SyncError::not_owner())
            }
            Err(e) => {
                node.set_status(STATUS_CANCELLED);
                Err(e)
            }
        }
    }

    fn is_on_sync_queue(&self, node: &NodeRef) -> bool {
        self.sync.core().queue.is_on_sync_queue(node)
    }

    fn check_interrupt_while_waiting(&self, node: &NodeRef) -> InterruptMode {
        if !park::interrupted() {
            return InterruptMode::None;
        }
        if self.sync.core().queue.transfer_after_cancelled_wait(node) {
            InterruptMode::Throw
        } else {
            InterruptMode::Reinterrupt
        }
    }

    /// Re-acquire at the saved depth and report the interrupt, if any
    ///
    /// `cancelled` is set when the node left this condition through
    /// cancellation, which means it is still linked on the chain.
    fn finish_wait(
        &self,
        node: &NodeRef,
        saved: i32,
        mut mode: InterruptMode,
        cancelled: bool,
    ) -> SyncResult<()> {
        if self.sync.acquire_queued(node, saved)? && mode != InterruptMode::Throw {
            mode = InterruptMode::Reinterrupt;
        }
        if cancelled {
            self.unlink_cancelled_waiters();
        }
        match mode {
            InterruptMode::None => Ok(()),
            InterruptMode::Reinterrupt => {
                park::current().set_interrupted();
                Ok(())
            }
            InterruptMode::Throw => Err(SyncError::Interrupted),
        }
    }

    /// Release the lock and block until signalled or interrupted
    ///
    /// The lock is re-acquired at its previous hold depth before this
    /// returns, whatever the outcome. An interrupt that arrives before a
    /// signal fails with `Interrupted`; one that arrives after is re-asserted
    /// on the thread.
    pub fn wait(&self) -> SyncResult<()> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        self.check_held()?;
        let node = self.add_waiter();
        let saved = self.full_release(&node)?;

        let mut mode = InterruptMode::None;
        while !self.is_on_sync_queue(&node) {
            park::park();
            mode = self.check_interrupt_while_waiting(&node);
            if mode != InterruptMode::None {
                break;
            }
        }
        self.finish_wait(&node, saved, mode, mode == InterruptMode::Throw)
    }

    /// Release the lock and block until signalled; interrupts are re-asserted
    pub fn wait_uninterruptibly(&self) -> SyncResult<()> {
        self.check_held()?;
        let node = self.add_waiter();
        let saved = self.full_release(&node)?;

        let mut interrupted = false;
        while !self.is_on_sync_queue(&node) {
            park::park();
            interrupted |= park::interrupted();
        }
        if self.sync.acquire_queued(&node, saved)? || interrupted {
            park::current().set_interrupted();
        }
        Ok(())
    }

    /// Like `wait`, but gives up at `deadline`
    ///
    /// Returns `Ok(false)` if the deadline passed before a signal arrived.
    pub fn wait_until(&self, deadline: Instant) -> SyncResult<bool> {
        if park::interrupted() {
            return Err(SyncError::Interrupted);
        }
        self.check_held()?;
        let node = self.add_waiter();
        let saved = self.full_release(&node)?;

        let mut timed_out = false;
        let mut mode = InterruptMode::None;
        while !self.is_on_sync_queue(&node) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                timed_out = self.sync.core().queue.transfer_after_cancelled_wait(&node);
                break;
            }
            if remaining > SPIN_FOR_TIMEOUT_THRESHOLD {
                park::park_timeout(remaining);
            } else {
                std::hint::spin_loop();
            }
            mode = self.check_interrupt_while_waiting(&node);
            if mode != InterruptMode::None {
                break;
            }
        }

        let cancelled = timed_out || mode == InterruptMode::Throw;
        self.finish_wait(&node, saved, mode, cancelled)?;
        Ok(!timed_out)
    }

    /// Like `wait`, but gives up after `timeout`
    pub fn wait_for(&self, timeout: Duration) -> SyncResult<bool> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(deadline),
            None => self.wait().map(|()| true),
        }
    }

    /// Move the longest-waiting thread to the lock's queue
    pub fn signal(&self) -> SyncResult<()> {
        self.check_held()?;
        let queue = &self.sync.core().queue;
        // Cancelled waiters are dropped on the way
        let mut cursor = self.first_waiter.load_full();
        while let Some(first) = cursor {
            let next = first.next_waiter.swap(None);
            if next.is_none() {
                self.last_waiter.store(None);
            }
            self.first_waiter.store(next.clone());
            if queue.transfer_for_signal(&first) {
                break;
            }
            cursor = next;
        }
        Ok(())
    }

    /// Move every waiting thread to the lock's queue
    pub fn signal_all(&self) -> SyncResult<()> {
        self.check_held()?;
        let queue = &self.sync.core().queue;
        self.last_waiter.store(None);
        let mut cursor = self.first_waiter.swap(None);
        let mut transferred = 0usize;
        while let Some(node) = cursor {
            cursor = node.next_waiter.swap(None);
            if queue.transfer_for_signal(&node) {
                transferred += 1;
            }
        }
        trace!(transferred, "signal_all");
        Ok(())
    }

    /// Whether any thread is waiting on this condition
    pub fn has_waiters(&self) -> SyncResult<bool> {
        self.check_held()?;
        Ok(self.chain().any(|node| node.status() == STATUS_CONDITION))
    }

    /// Number of threads waiting on this condition
    pub fn wait_queue_length(&self) -> SyncResult<usize> {
        self.check_held()?;
        Ok(self
            .chain()
            .filter(|node| node.status() == STATUS_CONDITION)
            .count())
    }

    /// Threads waiting on this condition, oldest first
    pub fn waiting_threads(&self) -> SyncResult<Vec<ThreadHandle>> {
        self.check_held()?;
        Ok(self
            .chain()
            .filter(|node| node.status() == STATUS_CONDITION)
            .filter_map(|node| node.thread())
            .collect())
    }
}

impl<P: ExclusiveSync> std::fmt::Debug for Condition<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition")
            .field("waiters", &self.chain().count())
            .finish()
    }
}
