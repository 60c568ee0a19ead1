//! Work-stealing thread pool
//!
//! The concurrency substrate for every parallel operation in the crate:
//! directory scans, index pruning, and mount/unmount batches all run as
//! tasks on this pool.
//!
//! Every worker owns an unbounded lock-free queue. Submissions are spread
//! round-robin across the worker queues; a worker that finds its own queue
//! empty tries one steal per peer queue before parking on a condition
//! variable. Stealing balances uneven task cost (large vs. small
//! directories, slow vs. fast mounts) without a contended global queue.
//!
//! ```text
//! spawn() ──round-robin──► [queue 0] [queue 1] ... [queue N-1]
//!                              │         │             │
//!                          worker 0   worker 1  ... worker N-1
//!                              └──── steal on empty ────┘
//! ```
//!
//! A task panic is caught and surfaces only through that task's handle;
//! workers never die from a payload panic.

use crossbeam::queue::SegQueue;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use thiserror::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// The submitted task panicked; its payload is carried as text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("task panicked: {0}")]
pub struct TaskPanicked(pub String);

struct HandleState<T> {
    slot: Mutex<Option<thread::Result<T>>>,
    ready: Condvar,
}

/// Handle for awaiting a task's completion and retrieving its result.
pub struct TaskHandle<T> {
    state: Arc<HandleState<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task has run, yielding its result.
    ///
    /// A panic inside the task is returned as [`TaskPanicked`] rather than
    /// propagating into the caller.
    pub fn join(self) -> Result<T, TaskPanicked> {
        let mut slot = self.state.slot.lock().unwrap();
        while slot.is_none() {
            slot = self.state.ready.wait(slot).unwrap();
        }
        match slot.take().unwrap() {
            Ok(value) => Ok(value),
            Err(payload) => Err(TaskPanicked(panic_message(payload.as_ref()))),
        }
    }

    /// Whether the task has finished (successfully or by panicking).
    pub fn is_finished(&self) -> bool {
        self.state.slot.lock().unwrap().is_some()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

struct PoolShared {
    queues: Vec<SegQueue<Job>>,
    stop: AtomicBool,
    // The mutex guards nothing by itself; it sequences the workers'
    // empty-check against submitter notifications so wakeups are not lost.
    park: Mutex<()>,
    work_signal: Condvar,
}

impl PoolShared {
    fn has_work(&self) -> bool {
        self.queues.iter().any(|q| !q.is_empty())
    }
}

/// Work-stealing executor with one lock-free queue per worker thread.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
    next_queue: AtomicUsize,
}

impl ThreadPool {
    /// Create a pool with an explicit worker count (minimum 1).
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let shared = Arc::new(PoolShared {
            queues: (0..threads).map(|_| SegQueue::new()).collect(),
            stop: AtomicBool::new(false),
            park: Mutex::new(()),
            work_signal: Condvar::new(),
        });

        let workers = (0..threads)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("loopdock-worker-{index}"))
                    .spawn(move || worker_main(&shared, index))
                    .expect("failed to spawn pool worker thread")
            })
            .collect();

        Self {
            shared,
            workers,
            next_queue: AtomicUsize::new(0),
        }
    }

    /// Create a pool sized to the detected hardware parallelism.
    pub fn with_default_parallelism() -> Self {
        Self::new(detected_parallelism())
    }

    pub fn worker_count(&self) -> usize {
        self.shared.queues.len()
    }

    /// Submit a task, returning a handle for awaiting its result.
    ///
    /// Panics if called after the pool has begun shutting down.
    pub fn spawn<T, F>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        assert!(
            !self.shared.stop.load(Ordering::Acquire),
            "spawn on a stopped ThreadPool"
        );

        let state = Arc::new(HandleState {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        });
        let task_state = Arc::clone(&state);
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(task));
            *task_state.slot.lock().unwrap() = Some(result);
            task_state.ready.notify_all();
        });

        let index = self.next_queue.fetch_add(1, Ordering::Relaxed) % self.shared.queues.len();
        self.shared.queues[index].push(job);

        // Taking the park mutex orders the push before any worker's
        // empty-check, so the notification cannot be lost.
        drop(self.shared.park.lock().unwrap());
        self.shared.work_signal.notify_one();

        TaskHandle { state }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        {
            let _guard = self.shared.park.lock().unwrap();
        }
        self.shared.work_signal.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_main(shared: &PoolShared, index: usize) {
    let peers = shared.queues.len();
    loop {
        if let Some(job) = shared.queues[index].pop() {
            job();
            continue;
        }

        // Own queue is dry; try one steal per peer in turn.
        let mut stolen = None;
        for offset in 1..peers {
            if let Some(job) = shared.queues[(index + offset) % peers].pop() {
                stolen = Some(job);
                break;
            }
        }
        if let Some(job) = stolen {
            job();
            continue;
        }

        // Nothing anywhere: park until new work arrives or shutdown is
        // requested. Remaining items are drained before exit.
        let mut guard = shared.park.lock().unwrap();
        loop {
            if shared.has_work() {
                break;
            }
            if shared.stop.load(Ordering::Acquire) {
                return;
            }
            guard = shared.work_signal.wait(guard).unwrap();
        }
    }
}

/// Detected hardware parallelism, falling back to 4 when unknown.
pub fn detected_parallelism() -> usize {
    thread::available_parallelism().map_or(4, |n| n.get())
}
