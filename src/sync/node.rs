/*!
 * Wait Node
 *
 * One queue element per blocked acquire: the waiting thread, its status
 * and the links that place it in the sync queue or a condition's chain.
 *
 * # Design: Reference-Counted Links
 *
 * Links are `ArcSwapOption` slots. A node stays alive for as long as any
 * `prev` chain, `next` hint or in-flight traversal still holds it, which is
 * the reclamation rule cancelled nodes need under concurrent backward scans.
 * Reference cycles (`a.next -> b`, `b.prev -> a`) are broken when a node
 * leaves the head slot or is cancelled, and by `SyncQueue::drop`. A node
 * loses its `next_waiter` link when it is signalled or unlinked, so the
 * condition chain never closes a cycle through `prev`.
 */

use super::park::{ThreadHandle, ThreadInner};
use crate::limits::{STATUS_CONDITION, STATUS_NEUTRAL};
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Acquisition mode recorded on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Exclusive,
    Shared,
}

pub(crate) type NodeRef = Arc<WaitNode>;

pub(crate) struct WaitNode {
    status: AtomicI32,
    /// Authoritative backward link
    pub(crate) prev: ArcSwapOption<WaitNode>,
    /// Forward hint; may lag behind `prev`
    pub(crate) next: ArcSwapOption<WaitNode>,
    /// Condition chain link, only touched while the lock is held
    pub(crate) next_waiter: ArcSwapOption<WaitNode>,
    /// Cleared once the node becomes head or is cancelled
    thread: ArcSwapOption<ThreadInner>,
    mode: Mode,
}

impl WaitNode {
    /// Sentinel installed as the first head
    pub(crate) fn dummy() -> Self {
        Self {
            status: AtomicI32::new(STATUS_NEUTRAL),
            prev: ArcSwapOption::empty(),
            next: ArcSwapOption::empty(),
            next_waiter: ArcSwapOption::empty(),
            thread: ArcSwapOption::empty(),
            mode: Mode::Exclusive,
        }
    }

    /// Node for the sync queue
    pub(crate) fn new(thread: &ThreadHandle, mode: Mode) -> Self {
        Self {
            status: AtomicI32::new(STATUS_NEUTRAL),
            prev: ArcSwapOption::empty(),
            next: ArcSwapOption::empty(),
            next_waiter: ArcSwapOption::empty(),
            thread: ArcSwapOption::new(Some(thread.inner().clone())),
            mode,
        }
    }

    /// Node for a condition queue
    pub(crate) fn for_condition(thread: &ThreadHandle) -> Self {
        let node = Self::new(thread, Mode::Exclusive);
        node.status.store(STATUS_CONDITION, Ordering::Relaxed);
        node
    }

    #[inline]
    pub(crate) fn status(&self) -> i32 {
        self.status.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_status(&self, status: i32) {
        self.status.store(status, Ordering::Release);
    }

    #[inline]
    pub(crate) fn cas_status(&self, expect: i32, update: i32) -> bool {
        self.status
            .compare_exchange(expect, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub(crate) fn is_shared(&self) -> bool {
        self.mode == Mode::Shared
    }

    #[inline]
    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn thread(&self) -> Option<ThreadHandle> {
        self.thread.load_full().map(ThreadHandle::from_inner)
    }

    #[inline]
    pub(crate) fn has_thread(&self) -> bool {
        self.thread.load().is_some()
    }

    pub(crate) fn thread_id(&self) -> Option<u64> {
        let guard = self.thread.load();
        (*guard).as_ref().map(|inner| inner.id())
    }

    pub(crate) fn clear_thread(&self) {
        self.thread.store(None);
    }

    /// Wake the owning thread, if it still has one
    pub(crate) fn unpark(&self) {
        let guard = self.thread.load();
        if let Some(inner) = &*guard {
            inner.unpark();
        }
    }

    /// Predecessor of a queued node
    ///
    /// Only the dummy head lacks one, and the head is never asked.
    pub(crate) fn predecessor(&self) -> NodeRef {
        let Some(prev) = self.prev.load_full() else {
            unreachable!("queued node has no predecessor");
        };
        prev
    }

    /// CAS on the forward hint, comparing by identity
    pub(crate) fn cas_next(&self, expect: &Option<NodeRef>, update: Option<NodeRef>) -> bool {
        let previous = self.next.compare_and_swap(expect, update);
        same(&*previous, expect)
    }
}

/// Identity comparison for optional node references
#[inline]
pub(crate) fn same(a: &Option<NodeRef>, b: &Option<NodeRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Identity of `node` against an optional reference
#[inline]
pub(crate) fn is(slot: &Option<NodeRef>, node: &NodeRef) -> bool {
    slot.as_ref().is_some_and(|n| Arc::ptr_eq(n, node))
}
