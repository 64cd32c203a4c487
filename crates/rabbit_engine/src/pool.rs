/* 📖 # Why a fixed pool of worker threads in front of the engine?

Every analysis is CPU bound. The HTTP server runs each request on its own thread, so
letting handlers call the engine directly would run as many searches at once as there
are clients and oversubscribe the machine. Instead handlers submit work to a single
FIFO queue served by a fixed number of workers (by default one per hardware thread)
and block until their own result comes back.

The queue and the terminating flag live behind one mutex, paired with a condition
variable that idle workers sleep on. The mutex is only held for queue bookkeeping,
never while work runs. Each submission gets a one-shot channel as its result slot:
the worker sends exactly once, the handler receives exactly once.
*/

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use rabbit_base::{ErrorKind, RabbitError, RabbitResult, ResultExt};
use tracing::{debug, error, info};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for a [`WorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads, at least 1.
    pub workers: usize,
    /// Maximum number of queued (not yet running) items. `None` means unbounded.
    pub queue_capacity: Option<usize>,
}

impl PoolConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            queue_capacity: None,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// The hardware concurrency reported by the OS, or 1 if unknown.
    pub fn default_workers() -> usize {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(Self::default_workers())
    }
}

struct Queue {
    jobs: VecDeque<Job>,
    terminating: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
    capacity: Option<usize>,
}

/// Fixed-size pool of worker threads fed by one FIFO queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl WorkerPool {
    /// Start a pool with `config.workers` threads (at least one).
    pub fn new(config: PoolConfig) -> RabbitResult<Self> {
        let worker_count = config.workers.max(1);
        let pool = Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    jobs: VecDeque::new(),
                    terminating: false,
                }),
                available: Condvar::new(),
                capacity: config.queue_capacity,
            }),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            worker_count,
        };

        for index in 0..worker_count {
            let shared = pool.shared.clone();
            // On failure, dropping `pool` stops the workers spawned so far.
            let handle = thread::Builder::new()
                .name(format!("rabbit-worker-{}", index))
                .spawn(move || worker_loop(&shared, index))
                .with_context(|| format!("spawning worker thread {}", index))?;
            pool.workers.lock().push(handle);
        }

        info!(
            workers = worker_count,
            queue_capacity = ?config.queue_capacity,
            "worker pool started"
        );
        Ok(pool)
    }

    /// Queue `work` and return a handle to its eventual result.
    ///
    /// Fails with `PoolStopped` once shutdown has begun, and with `QueueFull`
    /// when a queue capacity is configured and reached.
    pub fn submit<F, T>(&self, work: F) -> RabbitResult<ResultHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (slot, receiver) = mpsc::sync_channel(1);
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(work)).map_err(panic_message);
            // The handle may already be gone; the result is then discarded.
            let _ = slot.send(outcome);
        });

        {
            let mut queue = self.shared.queue.lock();
            if queue.terminating {
                return Err(ErrorKind::PoolStopped.into());
            }
            if let Some(capacity) = self.shared.capacity {
                if queue.jobs.len() >= capacity {
                    return Err(ErrorKind::QueueFull.into());
                }
            }
            queue.jobs.push_back(job);
        }
        self.shared.available.notify_one();
        Ok(ResultHandle { receiver })
    }

    /// Stop accepting work, let workers drain the queue, and wait for them to exit.
    ///
    /// Safe to call more than once; also called on drop.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if !queue.terminating {
                queue.terminating = true;
                info!(pending = queue.jobs.len(), "worker pool shutting down");
            }
        }
        self.shared.available.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Number of items waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    pub fn is_terminating(&self) -> bool {
        self.shared.queue.lock().terminating
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

fn worker_loop(shared: &Shared, index: usize) {
    debug!(worker = index, "worker started");
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break Some(job);
                }
                if queue.terminating {
                    break None;
                }
                shared.available.wait(&mut queue);
            }
        };
        match job {
            Some(job) => job(),
            None => break,
        }
    }
    debug!(worker = index, "worker exited");
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to the result of one submitted work item.
///
/// Waiting consumes the handle, so each result is read at most once.
#[derive(Debug)]
pub struct ResultHandle<T> {
    receiver: Receiver<Result<T, String>>,
}

impl<T> ResultHandle<T> {
    /// Block until the work item has run and return its result.
    ///
    /// A panic inside the work item surfaces as `EngineFailure`; a slot that was
    /// dropped without ever running surfaces as `PoolStopped`.
    pub fn wait(self) -> RabbitResult<T> {
        match self.receiver.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(panic)) => Err(Box::new(RabbitError::new(ErrorKind::EngineFailure {
                message: format!("work item panicked: {}", panic),
            }))),
            Err(_) => Err(ErrorKind::PoolStopped.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[test]
    fn test_submit_and_wait() {
        let pool = WorkerPool::new(PoolConfig::new(2)).unwrap();
        let handle = pool.submit(|| 6 * 7).unwrap();
        assert_eq!(handle.wait().unwrap(), 42);
        assert_eq!(pool.worker_count(), 2);
    }

    #[test]
    fn test_zero_workers_rounds_up_to_one() {
        let pool = WorkerPool::new(PoolConfig::new(0)).unwrap();
        assert_eq!(pool.worker_count(), 1);
        assert_eq!(pool.submit(|| "done").unwrap().wait().unwrap(), "done");
    }

    #[test]
    fn test_default_workers_matches_hardware() {
        assert!(PoolConfig::default_workers() >= 1);
        assert_eq!(PoolConfig::default().workers, PoolConfig::default_workers());
        assert_eq!(PoolConfig::default().queue_capacity, None);
    }

    #[test]
    fn test_fifo_order_with_single_worker() {
        let pool = WorkerPool::new(PoolConfig::new(1)).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..20)
            .map(|i| {
                let order = order.clone();
                pool.submit(move || order.lock().push(i)).unwrap()
            })
            .collect();
        for handle in handles {
            handle.wait().unwrap();
        }
        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_never_more_than_worker_count_running() {
        const WORKERS: usize = 3;
        let pool = WorkerPool::new(PoolConfig::new(WORKERS)).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let executed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4 * WORKERS)
            .map(|i| {
                let (running, peak, executed) = (running.clone(), peak.clone(), executed.clone());
                pool.submit(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    executed.fetch_add(1, Ordering::SeqCst);
                    i
                })
                .unwrap()
            })
            .collect();

        let results: Vec<usize> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
        assert_eq!(results, (0..4 * WORKERS).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= WORKERS);
        assert_eq!(executed.load(Ordering::SeqCst), 4 * WORKERS);
    }

    #[test]
    fn test_every_worker_runs_at_once() {
        const WORKERS: usize = 4;
        let pool = WorkerPool::new(PoolConfig::new(WORKERS)).unwrap();
        let arrived = Arc::new((Mutex::new(0usize), Condvar::new()));

        // Each item waits until all of them are running; with fewer live workers
        // the first ones give up at the deadline and report a short count.
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let arrived = arrived.clone();
                pool.submit(move || {
                    let (count, all_in) = &*arrived;
                    let mut count = count.lock();
                    *count += 1;
                    all_in.notify_all();
                    let deadline = Instant::now() + Duration::from_secs(5);
                    while *count < WORKERS {
                        if all_in.wait_until(&mut count, deadline).timed_out() {
                            break;
                        }
                    }
                    *count
                })
                .unwrap()
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.wait().unwrap(), WORKERS);
        }
    }

    #[test]
    fn test_parallel_wall_clock() {
        const DELAY: Duration = Duration::from_millis(100);
        let pool = WorkerPool::new(PoolConfig::new(2)).unwrap();
        let started = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| pool.submit(|| thread::sleep(DELAY)).unwrap())
            .collect();
        for handle in handles {
            handle.wait().unwrap();
        }
        let elapsed = started.elapsed();
        // Eight items on two workers take four rounds; one worker would take eight.
        assert!(elapsed >= 4 * DELAY, "{:?}", elapsed);
        assert!(elapsed < 8 * DELAY, "{:?}", elapsed);
    }

    #[test]
    fn test_panic_is_reported_and_worker_survives() {
        let pool = WorkerPool::new(PoolConfig::new(1)).unwrap();
        let err = pool
            .submit(|| -> u32 { panic!("engine exploded") })
            .unwrap()
            .wait()
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::EngineFailure { .. }));
        assert_eq!(err.to_string(), "Engine failure: work item panicked: engine exploded");

        assert_eq!(pool.submit(|| 1).unwrap().wait().unwrap(), 1);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new(PoolConfig::new(2)).unwrap();
        pool.shutdown();
        assert!(pool.is_terminating());
        let err = pool.submit(|| ()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::PoolStopped));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pool = WorkerPool::new(PoolConfig::new(2)).unwrap();
        pool.shutdown();
        pool.shutdown();
        drop(pool);
    }

    #[test]
    fn test_shutdown_drains_queued_items() {
        let pool = WorkerPool::new(PoolConfig::new(1)).unwrap();
        let (release, gate) = mpsc::channel::<()>();
        let blocker = pool
            .submit(move || {
                let _ = gate.recv();
            })
            .unwrap();
        let queued: Vec<_> = (0..3).map(|i| pool.submit(move || i).unwrap()).collect();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            release.send(()).unwrap();
        });
        pool.shutdown();
        releaser.join().unwrap();

        blocker.wait().unwrap();
        let results: Vec<i32> = queued.into_iter().map(|h| h.wait().unwrap()).collect();
        assert_eq!(results, vec![0, 1, 2]);
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn test_queue_capacity() {
        let pool = WorkerPool::new(PoolConfig::new(1).with_queue_capacity(1)).unwrap();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release, gate) = mpsc::channel::<()>();
        let running = pool
            .submit(move || {
                started_tx.send(()).unwrap();
                let _ = gate.recv();
            })
            .unwrap();
        started_rx.recv().unwrap();

        let waiting = pool.submit(|| "queued").unwrap();
        assert_eq!(pool.queued(), 1);
        let err = pool.submit(|| "rejected").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::QueueFull));

        release.send(()).unwrap();
        running.wait().unwrap();
        assert_eq!(waiting.wait().unwrap(), "queued");
    }

    #[test]
    fn test_dropped_handle_discards_result() {
        let pool = WorkerPool::new(PoolConfig::new(1)).unwrap();
        let executed = Arc::new(AtomicUsize::new(0));
        {
            let executed = executed.clone();
            drop(pool.submit(move || executed.fetch_add(1, Ordering::SeqCst)).unwrap());
        }
        assert_eq!(pool.submit(|| "next").unwrap().wait().unwrap(), "next");
        assert_eq!(executed.load(Ordering::SeqCst), 1);
    }
}
