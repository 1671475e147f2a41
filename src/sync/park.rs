/*!
 * Thread Parking and Interruption
 *
 * The narrow thread-runtime surface the synchronizer consumes: block the
 * current thread, wake a specific thread, and a per-thread interrupt flag.
 *
 * # Design
 *
 * Built on `std::thread::park`, whose token semantics are exactly what the
 * queue protocol needs: a wake delivered before the target blocks is
 * remembered and consumed by its next park, so a release racing a waiter's
 * decision to block is never lost. Spurious returns are allowed and every
 * caller re-checks its condition in a loop.
 */

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::Duration;

/// Next id handed to a thread on its first use of the runtime (0 means "no thread")
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: ThreadHandle = ThreadHandle::for_current();
}

pub(crate) struct ThreadInner {
    id: u64,
    thread: Thread,
    interrupted: AtomicBool,
}

/// Handle to a thread that may block inside a synchronizer
///
/// Cheap to clone; equality is identity of the underlying thread.
#[derive(Clone)]
pub struct ThreadHandle {
    inner: Arc<ThreadInner>,
}

impl ThreadHandle {
    fn for_current() -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
                thread: thread::current(),
                interrupted: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ThreadInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<ThreadInner> {
        &self.inner
    }

    /// Process-unique, never-zero identifier
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Name of the underlying OS thread, if any
    pub fn name(&self) -> Option<&str> {
        self.inner.thread.name()
    }

    /// Set the thread's interrupt flag and wake it if blocked
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::Release);
        self.inner.thread.unpark();
    }

    /// Check the interrupt flag without clearing it
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::Acquire)
    }

    /// Set the flag without waking; used to replay a swallowed interrupt on self
    pub(crate) fn set_interrupted(&self) {
        self.inner.interrupted.store(true, Ordering::Release);
    }
}

impl ThreadInner {
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn unpark(&self) {
        self.thread.unpark();
    }
}

impl PartialEq for ThreadHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ThreadHandle {}

impl std::fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.thread.name())
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Handle for the calling thread
#[inline]
pub fn current() -> ThreadHandle {
    CURRENT.with(|handle| handle.clone())
}

/// Id of the calling thread without cloning its handle
#[inline]
pub(crate) fn current_id() -> u64 {
    CURRENT.with(|handle| handle.inner.id)
}

/// Query and clear the calling thread's interrupt flag
#[inline]
pub fn interrupted() -> bool {
    CURRENT.with(|handle| handle.inner.interrupted.swap(false, Ordering::AcqRel))
}

/// Block the calling thread until woken, interrupted, or spuriously
pub fn park() {
    if CURRENT.with(|handle| handle.is_interrupted()) {
        return;
    }
    thread::park();
}

/// Block the calling thread for at most `timeout`
pub fn park_timeout(timeout: Duration) {
    if CURRENT.with(|handle| handle.is_interrupted()) {
        return;
    }
    thread::park_timeout(timeout);
}
