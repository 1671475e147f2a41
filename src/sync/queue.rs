/*!
 * Sync Queue
 *
 * Intrusive FIFO of blocked threads with lock-free enqueue and cooperative
 * best-effort cleanup.
 *
 * # Design
 *
 * - The queue is created lazily: `head`/`tail` stay empty until the first
 *   contended acquire installs a dummy head.
 * - `prev` links are authoritative. `next` links are hints that may lag, so
 *   every correctness-critical search walks backward from `tail`.
 * - Only `tail`/`head` installation and links owned by another thread are
 *   written with CAS; a node's owner writes its own `prev` with a plain store.
 * - Cancelled nodes are spliced out lazily by themselves or by the next
 *   thread that walks past them. No external cleanup pass is needed.
 */

use super::node::{is, same, Mode, NodeRef, WaitNode};
use super::park::{self, ThreadHandle};
use crate::limits::{STATUS_CANCELLED, STATUS_CONDITION, STATUS_NEUTRAL, STATUS_SIGNAL};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tracing::{debug, trace};

pub(crate) struct SyncQueue {
    head: ArcSwapOption<WaitNode>,
    tail: ArcSwapOption<WaitNode>,
}

impl SyncQueue {
    pub(crate) fn new() -> Self {
        Self {
            head: ArcSwapOption::empty(),
            tail: ArcSwapOption::empty(),
        }
    }

    #[inline]
    pub(crate) fn head(&self) -> Option<NodeRef> {
        self.head.load_full()
    }

    #[inline]
    pub(crate) fn tail(&self) -> Option<NodeRef> {
        self.tail.load_full()
    }

    #[inline]
    pub(crate) fn is_head(&self, node: &NodeRef) -> bool {
        is(&self.head.load_full(), node)
    }

    fn cas_tail(&self, expect: &Option<NodeRef>, update: Option<NodeRef>) -> bool {
        let previous = self.tail.compare_and_swap(expect, update);
        same(&*previous, expect)
    }

    fn cas_head(&self, expect: &Option<NodeRef>, update: Option<NodeRef>) -> bool {
        let previous = self.head.compare_and_swap(expect, update);
        same(&*previous, expect)
    }

    /// Link `node` in as the new tail and return its predecessor
    ///
    /// After return the node is reachable backward from `tail`; the
    /// predecessor's `next` hint is set afterwards and may not be visible yet.
    pub(crate) fn enqueue(&self, node: &NodeRef) -> NodeRef {
        loop {
            let tail = self.tail.load_full();
            match &tail {
                None => {
                    // Install the dummy head, then retry against it
                    let dummy = Arc::new(WaitNode::dummy());
                    if self.cas_head(&None, Some(dummy.clone())) {
                        trace!("sync queue initialized");
                        self.tail.store(Some(dummy));
                    }
                }
                Some(pred) => {
                    node.prev.store(Some(pred.clone()));
                    if self.cas_tail(&tail, Some(node.clone())) {
                        pred.next.store(Some(node.clone()));
                        return pred.clone();
                    }
                }
            }
        }
    }

    /// Create a node for the calling thread in `mode` and enqueue it
    pub(crate) fn add_waiter(&self, mode: Mode) -> NodeRef {
        let node = Arc::new(WaitNode::new(&park::current(), mode));
        self.enqueue(&node);
        node
    }

    /// Promote `node` to dummy head
    ///
    /// Only the thread that just acquired reaches this, so a plain store is
    /// enough.
    pub(crate) fn set_head(&self, node: &NodeRef) {
        self.head.store(Some(node.clone()));
        node.clear_thread();
        node.prev.store(None);
    }

    /// Make sure `pred` will signal `node`; returns whether `node` may park
    ///
    /// Cancelled predecessors are skipped and unlinked on the way. A `false`
    /// return means the caller must retry its acquire before parking.
    pub(crate) fn should_park_after_failed_acquire(&self, pred: &NodeRef, node: &NodeRef) -> bool {
        let ws = pred.status();
        if ws == STATUS_SIGNAL {
            return true;
        }
        if ws > 0 {
            let mut pred = pred.clone();
            loop {
                pred = pred.predecessor();
                node.prev.store(Some(pred.clone()));
                if pred.status() <= 0 {
                    break;
                }
            }
            pred.next.store(Some(node.clone()));
        } else {
            // Neutral or PROPAGATE: ask for a signal, then re-check before parking
            pred.cas_status(ws, STATUS_SIGNAL);
        }
        false
    }

    /// Wake the nearest live successor of `node`
    pub(crate) fn unpark_successor(&self, node: &NodeRef) {
        let ws = node.status();
        if ws < 0 {
            node.cas_status(ws, STATUS_NEUTRAL);
        }

        let mut successor = node.next.load_full();
        if successor.as_ref().map_or(true, |s| s.status() > 0) {
            // Stale or cancelled hint: walk back from tail, keep the frontmost live node
            successor = None;
            let mut cursor = self.tail.load_full();
            while let Some(current) = cursor {
                if Arc::ptr_eq(&current, node) {
                    break;
                }
                if current.status() <= 0 {
                    successor = Some(current.clone());
                }
                cursor = current.prev.load_full();
            }
        }

        if let Some(successor) = successor {
            successor.unpark();
        }
    }

    /// Abandon a queued acquire
    pub(crate) fn cancel_acquire(&self, node: &NodeRef) {
        node.clear_thread();

        // Skip cancelled predecessors
        let mut pred = node.predecessor();
        while pred.status() > 0 {
            pred = pred.predecessor();
            node.prev.store(Some(pred.clone()));
        }

        // Any CAS on this below fails if someone else already relinked pred
        let pred_next = pred.next.load_full();

        // After this store other threads skip past node
        node.set_status(STATUS_CANCELLED);

        let tail = self.tail.load_full();
        if is(&tail, node) && self.cas_tail(&tail, Some(pred.clone())) {
            pred.cas_next(&pred_next, None);
        } else {
            let head = self.head.load_full();
            let pred_will_signal = !is(&head, &pred) && {
                let ws = pred.status();
                ws == STATUS_SIGNAL || (ws <= 0 && pred.cas_status(ws, STATUS_SIGNAL))
            } && pred.has_thread();

            if pred_will_signal {
                // Bypass node; the successor fixes its own prev when it next runs
                let next = node.next.load_full();
                if next.as_ref().is_some_and(|n| n.status() <= 0) {
                    pred.cas_next(&pred_next, next);
                }
            } else {
                // Node was effectively at the front: hand the wakeup on
                self.unpark_successor(node);
            }
            node.next.store(None);
        }
        debug!("queued acquire cancelled");
    }

    /// True if some thread other than the caller is queued ahead of it
    pub(crate) fn has_queued_predecessors(&self) -> bool {
        // Tail is read first so a half-initialized queue reports predecessors
        let tail = self.tail.load_full();
        let head = self.head.load_full();
        match &head {
            Some(h) if !same(&head, &tail) => match h.next.load_full() {
                None => true,
                Some(first) => first.thread_id() != Some(park::current_id()),
            },
            Some(_) => false,
            None => tail.is_some(),
        }
    }

    /// True if a node is (or was) on the sync queue
    ///
    /// A node still carrying CONDITION status, or one without a `prev`, has
    /// not been transferred yet.
    pub(crate) fn is_on_sync_queue(&self, node: &NodeRef) -> bool {
        if node.status() == STATUS_CONDITION || node.prev.load().is_none() {
            return false;
        }
        if node.next.load().is_some() {
            return true;
        }
        // prev can be set while the tail CAS is still failing; confirm from tail
        self.find_node_from_tail(node)
    }

    fn find_node_from_tail(&self, node: &NodeRef) -> bool {
        let mut cursor = self.tail.load_full();
        while let Some(current) = cursor {
            if Arc::ptr_eq(&current, node) {
                return true;
            }
            cursor = current.prev.load_full();
        }
        false
    }

    /// Move a condition node onto the sync queue after a signal
    ///
    /// Returns `false` if the node was cancelled before the signal landed.
    pub(crate) fn transfer_for_signal(&self, node: &NodeRef) -> bool {
        if !node.cas_status(STATUS_CONDITION, STATUS_NEUTRAL) {
            return false;
        }

        let pred = self.enqueue(node);
        let ws = pred.status();
        if ws > 0 || !pred.cas_status(ws, STATUS_SIGNAL) {
            // Nobody will signal it: wake it so it resyncs on its own
            node.unpark();
        }
        trace!("condition waiter transferred to sync queue");
        true
    }

    /// Move a condition node onto the sync queue after its wait was abandoned
    ///
    /// Returns `true` if the cancellation happened before any signal.
    pub(crate) fn transfer_after_cancelled_wait(&self, node: &NodeRef) -> bool {
        if node.cas_status(STATUS_CONDITION, STATUS_NEUTRAL) {
            self.enqueue(node);
            return true;
        }
        // A signal won the race; wait until its enqueue is visible
        while !self.is_on_sync_queue(node) {
            std::thread::yield_now();
        }
        false
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub(crate) fn has_queued_threads(&self) -> bool {
        !same(&self.head.load_full(), &self.tail.load_full())
    }

    pub(crate) fn has_contended(&self) -> bool {
        self.head.load().is_some()
    }

    /// Nodes from tail to head that still own a thread
    fn live_nodes(&self) -> impl Iterator<Item = NodeRef> {
        let mut cursor = self.tail.load_full();
        std::iter::from_fn(move || {
            let current = cursor.take()?;
            cursor = current.prev.load_full();
            Some(current)
        })
        .filter(|node| node.has_thread())
    }

    pub(crate) fn first_queued_thread(&self) -> Option<ThreadHandle> {
        // Fast path through the head hint, then the authoritative backward walk
        if let Some(head) = self.head.load_full() {
            if let Some(first) = head.next.load_full() {
                if is(&first.prev.load_full(), &head) {
                    if let Some(thread) = first.thread() {
                        return Some(thread);
                    }
                }
            }
        }
        self.live_nodes().filter_map(|node| node.thread()).last()
    }

    pub(crate) fn is_queued(&self, thread: &ThreadHandle) -> bool {
        self.live_nodes()
            .any(|node| node.thread_id() == Some(thread.id()))
    }

    pub(crate) fn queue_length(&self) -> usize {
        self.live_nodes().count()
    }

    /// Queued threads, most recently enqueued first
    pub(crate) fn queued_threads(&self, mode: Option<Mode>) -> Vec<ThreadHandle> {
        self.live_nodes()
            .filter(|node| mode.map_or(true, |m| node.mode() == m))
            .filter_map(|node| node.thread())
            .collect()
    }
}

impl Drop for SyncQueue {
    fn drop(&mut self) {
        // Break prev/next cycles left by cancelled nodes
        self.head.store(None);
        let mut cursor = self.tail.swap(None);
        while let Some(node) = cursor {
            node.next.store(None);
            cursor = node.prev.swap(None);
        }
    }
}

/// Cancels a queued node unless disarmed
///
/// Covers every non-success exit from an acquire loop: interrupts, timeouts,
/// hook errors and unwinding.
pub(crate) struct CancelGuard<'a> {
    queue: &'a SyncQueue,
    node: &'a NodeRef,
    armed: bool,
}

impl<'a> CancelGuard<'a> {
    pub(crate) fn new(queue: &'a SyncQueue, node: &'a NodeRef) -> Self {
        Self {
            queue,
            node,
            armed: true,
        }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.cancel_acquire(self.node);
        }
    }
}
