//! Lock-free and blocking coordination primitives for the scheduler.
//!
//! The counted index pair is the ABA-safe head of the ready queue's
//! intrusive LIFO. Node storage is an arena, so a 32-bit index addresses
//! any node and the (index, count) pair always fits one natively
//! CAS-able word.

use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

pub use takt_core::sync::{SpinLock, SpinLockHolder};

/// Index value meaning "no node".
pub const NIL_INDEX: u32 = u32::MAX;

/// An (index, count) pair compared as a whole. The count makes a
/// compare-exchange fail when the same index has been popped and pushed
/// back in between.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CountedIndex {
    #[allow(missing_docs)]
    pub index: u32,
    /// Incremented on every successful swap of the holding
    /// [`LockFreeHead`].
    pub count: u32,
}

impl CountedIndex {
    /// An empty head that has never been swapped.
    pub const EMPTY: Self = Self {
        index: NIL_INDEX,
        count: 0,
    };

    const fn pack(self) -> u64 {
        (self.index as u64) << 32 | self.count as u64
    }
    fn unpack(packed: u64) -> Self {
        Self {
            index: (packed >> 32) as u32,
            count: packed as u32,
        }
    }
}

/// An atomically swappable [`CountedIndex`].
pub struct LockFreeHead {
    inner: AtomicU64,
}

impl LockFreeHead {
    #[allow(missing_docs)]
    pub const fn new() -> Self {
        Self {
            inner: AtomicU64::new(CountedIndex::EMPTY.pack()),
        }
    }

    /// The current pair.
    pub fn load(&self) -> CountedIndex {
        CountedIndex::unpack(self.inner.load(Ordering::Acquire))
    }

    /// Install `new_index` if the head still equals `expected`, bumping
    /// the count. Returns true on success.
    pub fn try_swap(&self, new_index: u32, expected: CountedIndex) -> bool {
        let new = CountedIndex {
            index: new_index,
            count: expected.count.wrapping_add(1),
        };
        self.inner
            .compare_exchange(
                expected.pack(),
                new.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for LockFreeHead {
    fn default() -> Self {
        Self::new()
    }
}

/// A counting semaphore with clean shutdown.
///
/// `wait` returns false once [`Semaphore::close`] has been called; close
/// before dropping a semaphore that threads may still be waiting on.
pub struct Semaphore {
    state: Mutex<SemState>,
    cond: Condvar,
    max_count: usize,
}

struct SemState {
    count: usize,
    closed: bool,
}

impl Semaphore {
    /// A semaphore that will hold at most `max_count` pending posts.
    pub fn new(max_count: usize) -> Self {
        Self {
            state: Mutex::new(SemState {
                count: 0,
                closed: false,
            }),
            cond: Condvar::new(),
            max_count: max_count.max(1),
        }
    }

    /// Post `n`, clamped to the maximum count.
    pub fn signal(&self, n: usize) {
        let mut state = self.state.lock().expect("semaphore mutex poisoned");
        state.count = (state.count + n).min(self.max_count);
        drop(state);
        if n == 1 {
            self.cond.notify_one();
        } else {
            self.cond.notify_all();
        }
    }

    /// Block until a post is available (true) or the semaphore is closed
    /// (false, permanently).
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock().expect("semaphore mutex poisoned");
        loop {
            if state.closed {
                return false;
            }
            if state.count > 0 {
                state.count -= 1;
                return true;
            }
            state = self.cond.wait(state).expect("semaphore mutex poisoned");
        }
    }

    /// Permanently unblock all waiters.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("semaphore mutex poisoned");
        state.closed = true;
        drop(state);
        self.cond.notify_all();
    }

    /// Whether [`Semaphore::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .expect("semaphore mutex poisoned")
            .closed
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        let state = self.state.get_mut().expect("semaphore mutex poisoned");
        if !state.closed {
            log::error!("semaphore dropped without close(); waiters would deadlock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counted_swap_bumps_count() {
        let head = LockFreeHead::new();
        let empty = head.load();
        assert_eq!(empty, CountedIndex::EMPTY);
        assert!(head.try_swap(7, empty));
        let h = head.load();
        assert_eq!(h.index, 7);
        assert_eq!(h.count, 1);
        // Stale expectation fails even with a matching index.
        assert!(!head.try_swap(9, empty));
        assert!(head.try_swap(9, h));
        assert_eq!(head.load().count, 2);
    }

    #[test]
    fn semaphore_counts_posts() {
        let sem = Semaphore::new(4);
        sem.signal(2);
        assert!(sem.wait());
        assert!(sem.wait());
        sem.close();
        assert!(!sem.wait());
        assert!(!sem.wait());
    }

    #[test]
    fn close_unblocks_waiters() {
        let sem = Arc::new(Semaphore::new(1));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let sem = sem.clone();
                std::thread::spawn(move || sem.wait())
            })
            .collect();
        // Give the waiters time to block, then release them all.
        std::thread::sleep(std::time::Duration::from_millis(20));
        sem.close();
        for h in handles {
            assert!(!h.join().unwrap());
        }
    }

    #[test]
    fn signal_clamps_to_max() {
        let sem = Semaphore::new(2);
        sem.signal(10);
        assert!(sem.wait());
        assert!(sem.wait());
        sem.close();
        assert!(!sem.wait());
    }
}
