//! Per-collection asynchronous job queue.
//!
//! A single background worker drains an unbounded FIFO of collection-tagged
//! tasks. Tasks of different collections are serialized through the same
//! worker; the collection tag only labels log lines. A task that panics is
//! caught and logged, never killing the worker. On shutdown any unstarted
//! task is discarded.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

struct Job {
    collection: String,
    work: Box<dyn FnOnce() + Send>,
}

struct SchedulerInner {
    queue: Mutex<VecDeque<Job>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    active_tasks: AtomicUsize,
}

/// Single-consumer asynchronous task queue.
///
/// Tasks run to completion in enqueue order on one worker thread; a task
/// may block on I/O.
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Start the scheduler and its worker thread.
    pub fn new() -> Self {
        let inner = Arc::new(SchedulerInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active_tasks: AtomicUsize::new(0),
        });

        let inner_clone = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("vireo-jobs".to_string())
            .spawn(move || worker_loop(&inner_clone))
            .expect("failed to spawn job scheduler worker thread");

        Self {
            inner,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue a task tagged with its collection. Never blocks.
    ///
    /// Tasks enqueued after shutdown are dropped silently.
    pub fn add(&self, collection: impl Into<String>, work: impl FnOnce() + Send + 'static) {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return;
        }
        let job = Job {
            collection: collection.into(),
            work: Box::new(work),
        };
        {
            let mut queue = self.inner.queue.lock();
            queue.push_back(job);
        }
        self.inner.work_ready.notify_one();
    }

    /// Block until the queue is empty and no task is running.
    ///
    /// The worker stays alive; this does not signal shutdown.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while !queue.is_empty() || self.inner.active_tasks.load(Ordering::Acquire) > 0 {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Shut down: discard unstarted tasks, wake the worker, and join it.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);

        // Lock the queue before notifying to prevent lost-wakeup: the worker
        // holds this lock between its shutdown check and condvar wait.
        {
            let mut queue = self.inner.queue.lock();
            let discarded = queue.len();
            queue.clear();
            if discarded > 0 {
                debug!(
                    target: "vireo::scheduler",
                    discarded, "discarding unstarted tasks on shutdown"
                );
            }
            self.inner.work_ready.notify_all();
        }

        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `active_tasks` and notifies drain waiters on drop, so the
/// bookkeeping survives a panicking task.
struct ActiveTaskGuard<'a> {
    inner: &'a SchedulerInner,
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        let prev_active = self.inner.active_tasks.fetch_sub(1, Ordering::Release);
        if prev_active == 1 {
            let queue = self.inner.queue.lock();
            if queue.is_empty() {
                self.inner.drain_cond.notify_all();
            }
        }
    }
}

fn worker_loop(inner: &SchedulerInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if let Some(job) = queue.pop_front() {
                    inner.active_tasks.fetch_add(1, Ordering::Release);
                    break job;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };

        // Execute outside the lock. catch_unwind keeps a panicking task
        // from killing the worker; the guard handles bookkeeping either way.
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job.work)) {
            error!(
                target: "vireo::scheduler",
                collection = %job.collection,
                "task panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}
