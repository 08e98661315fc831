//! The ready queue: a lock-free multi-producer LIFO of node indices.
//!
//! Intrusive Treiber stack over [`LockFreeHead`]: each slot has a `next`
//! cell, and the counted head defeats ABA when an index is popped and
//! pushed back between another thread's load and compare-exchange.

#[cfg(test)]
use crate::sync::CountedIndex;
use crate::sync::{LockFreeHead, NIL_INDEX};
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

pub(crate) struct ReadyQueue {
    head: LockFreeHead,
    next: UnsafeCell<Vec<AtomicU32>>,
}

// Safety: `next` cells are only accessed atomically through shared
// references; the Vec itself is only resized through `resize`, whose
// contract requires all workers to be quiescent.
unsafe impl Send for ReadyQueue {}
unsafe impl Sync for ReadyQueue {}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            head: LockFreeHead::new(),
            next: UnsafeCell::new(Vec::new()),
        }
    }

    /// Make room for `n` slots.
    ///
    /// # Safety
    ///
    /// No concurrent `push`/`pop` may be in flight, and the queue must be
    /// empty.
    pub unsafe fn resize(&self, n: usize) {
        debug_assert_eq!(self.head.load().index, NIL_INDEX);
        let next = unsafe { &mut *self.next.get() };
        next.clear();
        next.resize_with(n, || AtomicU32::new(NIL_INDEX));
    }

    /// Push a slot index. The index must be in range and not currently
    /// queued.
    pub fn push(&self, index: u32) {
        // Safety: only `resize` takes a unique reference, and it requires
        // quiescence.
        let next = unsafe { &*self.next.get() };
        loop {
            let head = self.head.load();
            next[index as usize].store(head.index, Ordering::Relaxed);
            // The AcqRel swap publishes the `next` store above.
            if self.head.try_swap(index, head) {
                return;
            }
        }
    }

    /// Pop the most recently pushed index, if any.
    pub fn pop(&self) -> Option<u32> {
        // Safety: as in `push`.
        let next = unsafe { &*self.next.get() };
        loop {
            let head = self.head.load();
            if head.index == NIL_INDEX {
                return None;
            }
            let new_head = next[head.index as usize].load(Ordering::Relaxed);
            if self.head.try_swap(new_head, head) {
                return Some(head.index);
            }
        }
    }

    /// The current counted head, for instrumentation.
    #[cfg(test)]
    pub fn head(&self) -> CountedIndex {
        self.head.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn lifo_order_single_threaded() {
        let queue = ReadyQueue::new();
        unsafe { queue.resize(8) };
        queue.push(3);
        queue.push(5);
        queue.push(1);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(5));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn concurrent_push_pop_loses_nothing() {
        const SLOTS: u32 = 8;
        const THREADS: usize = 4;
        const ITERS: usize = 25_000;

        let queue = Arc::new(ReadyQueue::new());
        unsafe { queue.resize(SLOTS as usize) };
        for i in 0..SLOTS {
            queue.push(i);
        }

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for _ in 0..ITERS {
                        // The queue starts full, so a pop can only
                        // transiently fail while other threads hold
                        // indices between their pop and push.
                        let index = loop {
                            if let Some(i) = queue.pop() {
                                break i;
                            }
                            core::hint::spin_loop();
                        };
                        queue.push(index);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Every index is still present exactly once: no ABA-induced loss
        // or duplication.
        let mut drained = Vec::new();
        while let Some(i) = queue.pop() {
            drained.push(i);
        }
        drained.sort_unstable();
        assert_eq!(drained, (0..SLOTS).collect::<Vec<_>>());

        // The head count equals the total number of successful swaps.
        let expected = SLOTS as usize + 2 * THREADS * ITERS + SLOTS as usize;
        assert_eq!(queue.head().count, expected as u32);
    }
}
