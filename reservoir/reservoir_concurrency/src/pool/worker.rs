//! Worker pool for running tasks on a fixed set of threads.
//!
//! Tasks travel through a [`BoundedBuffer`], so a full queue applies
//! back-pressure to `execute` instead of growing without limit. Shutdown
//! enqueues one stop marker per worker behind the pending tasks, which means
//! everything submitted before shutdown still runs.

use crate::buffer::BoundedBuffer;
use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use reservoir_core::error::WorkerPoolError;
use reservoir_core::utils::config::WorkerPoolConfig;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often an idle worker wakes to check for abandonment
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Longest a submitter blocked on a full queue can hold off shutdown
const SUBMIT_SLICE: Duration = Duration::from_millis(10);

/// Statistics about the worker pool
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolStats {
    /// Number of worker threads
    pub workers: usize,

    /// Number of tasks accepted
    pub tasks_queued: u64,

    /// Number of tasks completed
    pub tasks_completed: u64,

    /// Number of tasks that panicked
    pub tasks_panicked: u64,

    /// Number of tasks dropped unrun after a shutdown timeout
    pub tasks_discarded: u64,

    /// Total task execution time (microseconds)
    pub total_execution_time_us: u64,

    /// Total queue wait time (microseconds)
    pub total_queue_time_us: u64,

    /// Maximum task execution time (microseconds)
    pub max_execution_time_us: u64,
}

/// Task with metadata for tracking
struct Task {
    func: Box<dyn FnOnce() + Send + 'static>,
    enqueued_at: Instant,
}

impl Task {
    fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            func: Box::new(f),
            enqueued_at: Instant::now(),
        }
    }
}

enum Job {
    Run(Task),
    Stop,
}

/// State shared between the pool handle and its workers
struct Shared {
    queue: BoundedBuffer<Job>,

    /// Set when a shutdown deadline passed; workers drop remaining tasks
    abandon: AtomicBool,

    tasks_queued: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_panicked: AtomicU64,
    tasks_discarded: AtomicU64,
    total_execution_time_us: AtomicU64,
    total_queue_time_us: AtomicU64,
    max_execution_time_us: AtomicU64,

    /// Number of workers that have left their loop
    finished: Mutex<usize>,
    all_finished: Condvar,
}

/// A fixed-size pool of worker threads
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,

    /// False once shutdown has begun. Held for reading during each enqueue
    /// attempt so no task lands behind the stop markers, but never across a
    /// full-queue wait longer than `SUBMIT_SLICE`.
    accepting: RwLock<bool>,

    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Create a pool with `threads` workers and default settings otherwise
    pub fn new(threads: usize) -> reservoir_core::Result<Self> {
        let config = WorkerPoolConfig {
            threads: Some(threads),
            ..Default::default()
        };
        Self::with_config(config)
    }

    /// Create a pool with the specified configuration
    pub fn with_config(config: WorkerPoolConfig) -> reservoir_core::Result<Self> {
        config.validate()?;
        let threads = config.threads.unwrap_or_else(num_cpus::get).max(1);

        let shared = Arc::new(Shared {
            queue: BoundedBuffer::new(config.queue_capacity),
            abandon: AtomicBool::new(false),
            tasks_queued: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_panicked: AtomicU64::new(0),
            tasks_discarded: AtomicU64::new(0),
            total_execution_time_us: AtomicU64::new(0),
            total_queue_time_us: AtomicU64::new(0),
            max_execution_time_us: AtomicU64::new(0),
            finished: Mutex::new(0),
            all_finished: Condvar::new(),
        });

        info!(
            "Creating worker pool with {} workers and queue capacity {}",
            threads, config.queue_capacity
        );

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, id))
                .spawn(move || worker_loop(id, &worker_shared));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Stop the workers that did start before reporting
                    for _ in 0..workers.len() {
                        shared.queue.put(Job::Stop);
                    }
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(WorkerPoolError::Spawn(e.to_string()).into());
                }
            }
        }

        Ok(Self {
            shared,
            workers,
            accepting: RwLock::new(true),
            config,
        })
    }

    /// Submit a task, blocking while the queue is full
    ///
    /// Returns [`WorkerPoolError::ShuttingDown`] if shutdown begins while
    /// waiting for room; the task is then dropped unrun.
    pub fn execute<F>(&self, f: F) -> Result<(), WorkerPoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut job = Job::Run(Task::new(f));
        loop {
            let accepting = self.accepting.read();
            if !*accepting {
                return Err(WorkerPoolError::ShuttingDown);
            }

            match self.shared.queue.put_timeout(job, SUBMIT_SLICE) {
                Ok(()) => {
                    self.shared.tasks_queued.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(rejected) => job = rejected.into_inner(),
            }

            // Let a pending shutdown take the write lock between attempts
            drop(accepting);
        }
    }

    /// Submit a task only if the queue has room right now
    pub fn try_execute<F>(&self, f: F) -> Result<(), WorkerPoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let accepting = self.accepting.read();
        if !*accepting {
            return Err(WorkerPoolError::ShuttingDown);
        }

        self.shared
            .queue
            .try_put(Job::Run(Task::new(f)))
            .map_err(|_| WorkerPoolError::QueueFull)?;
        self.shared.tasks_queued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stop accepting tasks and tell every worker to exit once the queue drains.
    ///
    /// Blocks while the queue is full. Calling it again has no effect.
    pub fn shutdown(&self) {
        if !self.begin_shutdown() {
            return;
        }

        for _ in 0..self.workers.len() {
            self.shared.queue.put(Job::Stop);
        }
    }

    /// Like [`shutdown`](Self::shutdown), but waits at most `grace` for the
    /// workers to finish.
    ///
    /// When the grace period runs out, tasks still queued are dropped unrun
    /// and [`WorkerPoolError::ShutdownTimeout`] is returned. Tasks already
    /// running are not interrupted.
    pub fn shutdown_timeout(&self, grace: Duration) -> Result<(), WorkerPoolError> {
        let deadline = Instant::now().checked_add(grace);

        if self.begin_shutdown() {
            for _ in 0..self.workers.len() {
                let sent = match deadline {
                    Some(deadline) => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        self.shared.queue.put_timeout(Job::Stop, remaining).is_ok()
                    }
                    None => {
                        self.shared.queue.put(Job::Stop);
                        true
                    }
                };
                if !sent {
                    break;
                }
            }
        }

        let mut finished = self.shared.finished.lock();
        while *finished < self.workers.len() {
            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    drop(finished);
                    self.shared.abandon.store(true, Ordering::SeqCst);
                    warn!(
                        "Worker pool did not stop within {:?}, abandoning queued tasks",
                        grace
                    );
                    return Err(WorkerPoolError::ShutdownTimeout(grace));
                }
                Some(deadline) => {
                    self.shared.all_finished.wait_until(&mut finished, deadline);
                }
                None => self.shared.all_finished.wait(&mut finished),
            }
        }

        Ok(())
    }

    /// Shut down using the configured grace period
    pub fn shutdown_graceful(&self) -> Result<(), WorkerPoolError> {
        self.shutdown_timeout(self.config.shutdown_grace())
    }

    fn begin_shutdown(&self) -> bool {
        let mut accepting = self.accepting.write();
        if !*accepting {
            return false;
        }
        *accepting = false;
        info!("Shutting down worker pool");
        true
    }

    /// Shut down and wait for every worker thread to exit
    pub fn join(mut self) {
        self.shutdown();
        self.join_workers();
        info!("Worker pool shutdown complete");
    }

    fn join_workers(&mut self) {
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.join() {
                error!("Worker thread panicked during shutdown: {:?}", e);
            }
        }
    }

    /// Get current statistics for the pool
    pub fn stats(&self) -> WorkerPoolStats {
        let s = &self.shared;
        WorkerPoolStats {
            workers: self.workers.len(),
            tasks_queued: s.tasks_queued.load(Ordering::Relaxed),
            tasks_completed: s.tasks_completed.load(Ordering::Relaxed),
            tasks_panicked: s.tasks_panicked.load(Ordering::Relaxed),
            tasks_discarded: s.tasks_discarded.load(Ordering::Relaxed),
            total_execution_time_us: s.total_execution_time_us.load(Ordering::Relaxed),
            total_queue_time_us: s.total_queue_time_us.load(Ordering::Relaxed),
            max_execution_time_us: s.max_execution_time_us.load(Ordering::Relaxed),
        }
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        !*self.accepting.read()
    }

    /// Tasks (and stop markers) waiting in the queue
    pub fn queued_len(&self) -> usize {
        self.shared.queue.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.shared.abandon.load(Ordering::SeqCst) {
            // Workers exit on their own at the next poll.
            return;
        }
        self.shutdown();
        self.join_workers();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("shutting_down", &self.is_shutting_down())
            .field("queued", &self.queued_len())
            .finish()
    }
}

fn worker_loop(id: usize, shared: &Shared) {
    debug!("Worker {}: Starting", id);

    loop {
        match shared.queue.take_timeout(POLL_INTERVAL) {
            Ok(Job::Stop) => break,
            Ok(Job::Run(task)) => {
                if shared.abandon.load(Ordering::SeqCst) {
                    shared.tasks_discarded.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                run_task(id, shared, task);
            }
            Err(_) => {
                if shared.abandon.load(Ordering::SeqCst) {
                    break;
                }
            }
        }
    }

    debug!("Worker {}: Shutting down", id);

    let mut finished = shared.finished.lock();
    *finished += 1;
    drop(finished);
    shared.all_finished.notify_all();
}

fn run_task(id: usize, shared: &Shared, task: Task) {
    let queue_time = task.enqueued_at.elapsed();
    shared
        .total_queue_time_us
        .fetch_add(saturating_micros(queue_time), Ordering::Relaxed);

    trace!(
        "Worker {}: Executing task (queue time: {:.2}ms)",
        id,
        queue_time.as_micros() as f64 / 1000.0
    );

    let exec_start = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(task.func));
    let exec_time = exec_start.elapsed();

    let exec_time_us = saturating_micros(exec_time);
    shared
        .total_execution_time_us
        .fetch_add(exec_time_us, Ordering::Relaxed);
    shared
        .max_execution_time_us
        .fetch_max(exec_time_us, Ordering::Relaxed);

    match result {
        Ok(()) => {
            shared.tasks_completed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            let message = e
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| e.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "<unknown panic>".to_string());
            error!("Worker {}: Task panicked: {}", id, message);
            shared.tasks_panicked.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn saturating_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn test_basic_execution() {
        let pool = WorkerPool::new(2).unwrap();
        let (tx, rx) = mpsc::channel();

        pool.execute(move || tx.send(42).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn test_many_tasks_all_run() {
        let pool = WorkerPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.join();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_panic_isolation() {
        let pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = mpsc::channel();

        pool.execute(|| panic!("task failure")).unwrap();
        pool.execute(move || tx.send("still alive").unwrap()).unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "still alive"
        );
        let stats = pool.stats();
        assert_eq!(stats.tasks_panicked, 1);
    }

    #[test]
    fn test_try_execute_queue_full() {
        let config = WorkerPoolConfig {
            threads: Some(1),
            queue_capacity: 1,
            ..Default::default()
        };
        let pool = WorkerPool::with_config(config).unwrap();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        pool.execute(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // The single worker is busy: one task fits in the queue, the next does not
        pool.try_execute(|| {}).unwrap();
        assert!(matches!(
            pool.try_execute(|| {}),
            Err(WorkerPoolError::QueueFull)
        ));

        release_tx.send(()).unwrap();
        pool.join();
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let pool = WorkerPool::new(1).unwrap();
        pool.shutdown();

        assert!(pool.is_shutting_down());
        assert!(matches!(
            pool.execute(|| {}),
            Err(WorkerPoolError::ShuttingDown)
        ));
        assert!(matches!(
            pool.try_execute(|| {}),
            Err(WorkerPoolError::ShuttingDown)
        ));
    }

    #[test]
    fn test_shutdown_timeout_drains_in_time() {
        let pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.stats().tasks_completed, 10);
    }

    #[test]
    fn test_shutdown_timeout_expires() {
        let pool = WorkerPool::new(1).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        pool.execute(|| thread::sleep(Duration::from_millis(300)))
            .unwrap();
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            pool.execute(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        let result = pool.shutdown_timeout(Duration::from_millis(50));
        assert!(matches!(result, Err(WorkerPoolError::ShutdownTimeout(_))));

        // Give the worker time to finish the slow task and drain the rest
        thread::sleep(Duration::from_millis(600));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.stats().tasks_discarded, 3);
    }

    #[test]
    fn test_shutdown_timeout_not_held_up_by_blocked_submitter() {
        let config = WorkerPoolConfig {
            threads: Some(1),
            queue_capacity: 1,
            ..Default::default()
        };
        let pool = WorkerPool::with_config(config).unwrap();
        let (started_tx, started_rx) = mpsc::channel();

        pool.execute(move || {
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(1000));
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Fill the queue behind the running task
        pool.execute(|| {}).unwrap();

        thread::scope(|scope| {
            let submitter = scope.spawn(|| pool.execute(|| {}));
            thread::sleep(Duration::from_millis(50));

            let start = Instant::now();
            let result = pool.shutdown_timeout(Duration::from_millis(50));
            let elapsed = start.elapsed();

            assert!(matches!(result, Err(WorkerPoolError::ShutdownTimeout(_))));
            assert!(elapsed < Duration::from_millis(500), "took {:?}", elapsed);
            assert!(matches!(
                submitter.join().unwrap(),
                Err(WorkerPoolError::ShuttingDown)
            ));
        });
        assert_eq!(pool.stats().tasks_queued, 2);
    }

    #[test]
    fn test_execute_waits_for_room() {
        let config = WorkerPoolConfig {
            threads: Some(1),
            queue_capacity: 1,
            ..Default::default()
        };
        let pool = WorkerPool::with_config(config).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        // Several submissions outlast a slice each while the queue is full
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                thread::sleep(Duration::from_millis(30));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.join();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_saturating_micros() {
        assert_eq!(saturating_micros(Duration::from_millis(2)), 2000);
        assert_eq!(saturating_micros(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_stats() {
        let pool = WorkerPool::new(2).unwrap();
        for _ in 0..5 {
            pool.execute(|| thread::sleep(Duration::from_millis(1)))
                .unwrap();
        }
        pool.shutdown_timeout(Duration::from_secs(5)).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.workers, 2);
        assert_eq!(stats.tasks_queued, 5);
        assert_eq!(stats.tasks_completed, 5);
        assert_eq!(stats.tasks_panicked, 0);
        assert!(stats.max_execution_time_us >= 1000);
        assert!(stats.total_execution_time_us >= stats.max_execution_time_us);
    }

    #[test]
    fn test_thread_names() {
        let config = WorkerPoolConfig {
            threads: Some(1),
            thread_name_prefix: "probe".to_string(),
            ..Default::default()
        };
        let pool = WorkerPool::with_config(config).unwrap();
        let (tx, rx) = mpsc::channel();

        pool.execute(move || {
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        })
        .unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap().as_deref(),
            Some("probe-0")
        );
    }

    #[test]
    fn test_invalid_config() {
        let config = WorkerPoolConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            WorkerPool::with_config(config),
            Err(reservoir_core::Error::Config(_))
        ));
    }
}
