//! Short-section mutual exclusion.
//!
//! The spinlock here is only correct for critical sections bounded in the
//! tens of nanoseconds (counter bookkeeping, free-list pops). It must
//! never be held across OS allocation, frame processing or I/O.

use core::sync::atomic::{AtomicBool, Ordering};

/// A test-and-set spinlock.
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    #[allow(missing_docs)]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Try to take the lock once. Returns true iff this call transitioned
    /// it from unlocked to locked.
    pub fn attempt(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Spin until the lock is taken.
    pub fn acquire(&self) {
        while !self.attempt() {
            core::hint::spin_loop();
        }
    }

    /// Release the lock.
    pub fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SpinLock {
    fn drop(&mut self) {
        // Fence against a late `attempt` on another thread.
        self.acquire();
    }
}

/// Scoped holder for a [`SpinLock`]: acquires on construction, releases
/// on any exit path. Supports early manual release.
pub struct SpinLockHolder<'a> {
    lock: Option<&'a SpinLock>,
}

impl<'a> SpinLockHolder<'a> {
    #[allow(missing_docs)]
    pub fn new(lock: &'a SpinLock) -> Self {
        lock.acquire();
        Self { lock: Some(lock) }
    }

    /// Release before the end of scope.
    pub fn destroy(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.release();
        }
    }
}

impl Drop for SpinLockHolder<'_> {
    fn drop(&mut self) {
        self.destroy();
    }
}
