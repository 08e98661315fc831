//! OS threads with priority levels, plus the triggerable variants the
//! block driver dispatches work through.

use crate::sync::Semaphore;
use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Scheduling priority of a [`Thread`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Priority {
    #[allow(missing_docs)]
    Low,
    #[allow(missing_docs)]
    Medium,
    #[allow(missing_docs)]
    High,
    /// Realtime priority matching the host audio callback.
    Audio,
}

/// A joinable OS thread running at a given priority. Join before drop; a
/// dropped unjoined thread is detached and logged as an error.
pub struct Thread {
    handle: Option<JoinHandle<()>>,
}

impl Thread {
    /// Spawn `f` on a new thread at `priority`.
    pub fn spawn<F>(priority: Priority, name: &str, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                apply_priority(priority);
                f();
            })
            .unwrap_or_else(|e| panic!("failed to spawn thread `{name}`: {e}"));
        Self {
            handle: Some(handle),
        }
    }

    /// Number of hardware threads, at least 1.
    pub fn max_threads() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Wait for the thread to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("joined thread panicked");
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            log::error!("thread dropped without join(); detaching");
        }
    }
}

/// Raise the calling thread to the requested priority. Low and Medium
/// keep the OS default; High and Audio request realtime scheduling where
/// the platform allows it.
fn apply_priority(priority: Priority) {
    let rt_priority: i32 = match priority {
        Priority::Low | Priority::Medium => return,
        Priority::High => 60,
        Priority::Audio => 80,
    };
    #[cfg(target_os = "linux")]
    {
        let param = libc::sched_param {
            sched_priority: rt_priority,
        };
        let ret = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
        if ret != 0 {
            log::warn!(
                "failed to set SCHED_FIFO priority {rt_priority} (errno {ret}); running at normal priority"
            );
        }
    }
    #[cfg(target_os = "macos")]
    {
        unsafe {
            let thread = libc::pthread_self();
            let mut policy: libc::c_int = 0;
            let mut param = libc::sched_param { sched_priority: 0 };
            if libc::pthread_getschedparam(thread, &mut policy, &mut param) == 0 {
                param.sched_priority = rt_priority.min(63);
                if libc::pthread_setschedparam(thread, policy, &param) != 0 {
                    log::warn!("failed to raise thread priority; running at normal priority");
                }
            }
        }
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        log::warn!("realtime thread priority not implemented for this platform");
        let _ = rt_priority;
    }
}

/// A thread woken by an external signal to run its task once per post.
pub struct TriggerableThread {
    thread: Thread,
    shared: Arc<TriggerShared>,
}

struct TriggerShared {
    sem: Semaphore,
    task: Box<dyn Fn() + Send + Sync>,
}

impl TriggerableThread {
    #[allow(missing_docs)]
    pub fn new<F>(priority: Priority, task: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let shared = Arc::new(TriggerShared {
            sem: Semaphore::new(1),
            task: Box::new(task),
        });
        let entry = shared.clone();
        let thread = Thread::spawn(priority, "takt-trigger", move || {
            while entry.sem.wait() {
                (entry.task)();
            }
        });
        Self { thread, shared }
    }

    /// Wake the thread to run its task.
    pub fn signal(&self) {
        self.shared.sem.signal(1);
    }

    /// Shut down and wait for the thread to exit.
    pub fn join(&mut self) {
        self.shared.sem.close();
        self.thread.join();
    }
}

impl Drop for TriggerableThread {
    fn drop(&mut self) {
        self.join();
    }
}

const DELEGATE_IDLE: u8 = 0;
const DELEGATE_RUNNING: u8 = 1;
const DELEGATE_DONE: u8 = 2;

/// A thread tasks are delegated to one at a time, with completion
/// tracking.
pub struct DelegateThread {
    thread: Thread,
    shared: Arc<DelegateShared>,
}

struct DelegateShared {
    sem: Semaphore,
    task: Box<dyn Fn() + Send + Sync>,
    state: AtomicU8,
}

impl DelegateThread {
    #[allow(missing_docs)]
    pub fn new<F>(priority: Priority, task: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let shared = Arc::new(DelegateShared {
            sem: Semaphore::new(1),
            task: Box::new(task),
            state: AtomicU8::new(DELEGATE_IDLE),
        });
        let entry = shared.clone();
        let thread = Thread::spawn(priority, "takt-delegate", move || {
            while entry.sem.wait() {
                (entry.task)();
                entry.state.store(DELEGATE_DONE, Ordering::Release);
            }
        });
        Self { thread, shared }
    }

    /// Hand the thread its task. Returns false if a task is still in
    /// flight or its completion has not been collected.
    pub fn signal(&self) -> bool {
        if self
            .shared
            .state
            .compare_exchange(
                DELEGATE_IDLE,
                DELEGATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }
        self.shared.sem.signal(1);
        true
    }

    /// Whether the delegated task has completed. Does not block and does
    /// not collect the completion.
    pub fn completed(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == DELEGATE_DONE
    }

    /// Block until the delegated task completes. Returns true exactly
    /// once per signal; false when nothing was signalled.
    pub fn wait_for_completion(&self) -> bool {
        loop {
            match self.shared.state.load(Ordering::Acquire) {
                DELEGATE_IDLE => return false,
                DELEGATE_DONE => {
                    if self
                        .shared
                        .state
                        .compare_exchange(
                            DELEGATE_DONE,
                            DELEGATE_IDLE,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return true;
                    }
                }
                _ => std::thread::yield_now(),
            }
        }
    }

    /// Shut down and wait for the thread to exit.
    pub fn join(&mut self) {
        self.shared.sem.close();
        self.thread.join();
    }
}

impl Drop for DelegateThread {
    fn drop(&mut self) {
        self.join();
    }
}

/// N indexed threads sharing one counting semaphore, used as the block
/// driver's worker pool.
pub struct TriggerableThreadSet {
    threads: Vec<Thread>,
    shared: Arc<SetShared>,
}

struct SetShared {
    sem: Semaphore,
    task: Box<dyn Fn(usize) + Send + Sync>,
}

impl TriggerableThreadSet {
    /// Spawn `size` threads running `task(index)` once per wakeup.
    pub fn new<F>(priority: Priority, size: usize, task: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let shared = Arc::new(SetShared {
            sem: Semaphore::new(size.max(1)),
            task: Box::new(task),
        });
        let threads = (0..size)
            .map(|index| {
                let entry = shared.clone();
                Thread::spawn(priority, &format!("takt-worker-{index}"), move || {
                    while entry.sem.wait() {
                        (entry.task)(index);
                    }
                })
            })
            .collect();
        Self { threads, shared }
    }

    /// Wake up to `n` of the threads.
    pub fn signal(&self, n: usize) {
        self.shared.sem.signal(n);
    }

    /// Number of threads in the set.
    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Shut down and wait for every thread to exit.
    pub fn join(&mut self) {
        self.shared.sem.close();
        for thread in &mut self.threads {
            thread.join();
        }
    }
}

impl Drop for TriggerableThreadSet {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn triggerable_runs_once_per_signal() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut t = TriggerableThread::new(Priority::Medium, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        t.signal();
        while count.load(Ordering::SeqCst) < 1 {
            std::thread::yield_now();
        }
        t.signal();
        while count.load(Ordering::SeqCst) < 2 {
            std::thread::yield_now();
        }
        t.join();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn delegate_completion_protocol() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut t = DelegateThread::new(Priority::Medium, move || {
            std::thread::sleep(Duration::from_millis(5));
            c.fetch_add(1, Ordering::SeqCst);
        });
        // Nothing signalled yet.
        assert!(!t.wait_for_completion());
        assert!(t.signal());
        // Busy until completion is collected.
        assert!(!t.signal());
        assert!(t.wait_for_completion());
        // Exactly once per signal.
        assert!(!t.wait_for_completion());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(t.signal());
        assert!(t.wait_for_completion());
        t.join();
    }

    #[test]
    fn thread_set_fans_out() {
        let seen = Arc::new(std::sync::Mutex::new(std::collections::HashSet::new()));
        // The barrier forces all three indexed threads to run
        // concurrently, one per post.
        let barrier = Arc::new(std::sync::Barrier::new(3));
        let (s, b) = (seen.clone(), barrier.clone());
        let mut set = TriggerableThreadSet::new(Priority::Medium, 3, move |index| {
            b.wait();
            s.lock().unwrap().insert(index);
        });
        assert_eq!(set.size(), 3);
        set.signal(3);
        while seen.lock().unwrap().len() < 3 {
            std::thread::yield_now();
        }
        set.join();
        let expected: std::collections::HashSet<usize> = (0..3).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
    }
}
