use std::cell::Cell;
use std::cmp;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::error::EngineError;
use crate::execution::RenderRunnable;

/// How long teardown waits for known worker threads to drain before
/// declaring them leaked. Leaked threads are reported, never interrupted:
/// they are most likely stuck in a long kernel that cannot be aborted.
pub const THREAD_TEARDOWN_TIMEOUT: Duration = Duration::from_millis(5000);

thread_local! {
    static IN_WORKER_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// True when the calling thread belongs to a [`WorkerPool`]. Completion
/// notifications carry this so the queue manager can avoid re-entrant
/// dispatch from its own workers.
pub fn is_running_in_worker_thread() -> bool {
    IN_WORKER_THREAD.with(|flag| flag.get())
}

struct PoolShared {
    alive: Mutex<usize>,
    drained: Condvar,
}

/// Fixed set of OS threads consuming render runnables from a channel. One
/// pool is shared across every concurrent tree render.
pub struct WorkerPool {
    tx: Mutex<Option<mpsc::Sender<Arc<RenderRunnable>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<PoolShared>,
    worker_count: usize,
}

impl WorkerPool {
    pub fn new(worker_count: Option<usize>) -> Self {
        let logical = thread::available_parallelism()
            .map(|v| v.get())
            .unwrap_or(1);
        let worker_count = cmp::max(1, worker_count.unwrap_or(logical));

        let (tx, rx) = mpsc::channel::<Arc<RenderRunnable>>();
        let rx = Arc::new(Mutex::new(rx));
        let shared = Arc::new(PoolShared {
            alive: Mutex::new(worker_count),
            drained: Condvar::new(),
        });

        info!("worker pool starting {} thread(s)", worker_count);

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rx = Arc::clone(&rx);
            let shared = Arc::clone(&shared);
            let handle = thread::spawn(move || {
                IN_WORKER_THREAD.with(|flag| flag.set(true));
                loop {
                    let job = {
                        let receiver = rx.lock().expect("worker pool receiver poisoned");
                        receiver.recv()
                    };
                    let job = match job {
                        Ok(job) => job,
                        Err(_) => break,
                    };
                    debug!(
                        "worker {} running {}",
                        worker_id,
                        job.request().effect().label()
                    );
                    job.run();
                }
                *shared.alive.lock().unwrap() -= 1;
                shared.drained.notify_all();
            });
            workers.push(handle);
        }

        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            shared,
            worker_count,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn start(&self, runnable: Arc<RenderRunnable>) -> Result<(), EngineError> {
        let tx = self.tx.lock().unwrap();
        let sender = tx.as_ref().ok_or(EngineError::QueueClosed)?;
        sender.send(runnable).map_err(|_| EngineError::QueueClosed)
    }

    /// Stop accepting work and wait up to `timeout` for the workers to
    /// drain. Returns the number of threads still running past the deadline;
    /// those are reported as leaked and left to finish on their own.
    pub fn shutdown(&self, timeout: Duration) -> usize {
        if let Some(sender) = self.tx.lock().unwrap().take() {
            drop(sender);
        }

        let deadline = Instant::now() + timeout;
        let mut alive = self.shared.alive.lock().unwrap();
        while *alive > 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (next, _) = self
                .shared
                .drained
                .wait_timeout(alive, deadline - now)
                .unwrap();
            alive = next;
        }
        let leaked = *alive;
        drop(alive);

        if leaked > 0 {
            warn!(
                "{} worker thread(s) still running after {} ms; they may waste resources until their kernel returns",
                leaked,
                timeout.as_millis()
            );
            // Leave the handles in place; the threads own themselves now.
            return leaked;
        }

        for handle in self.workers.lock().unwrap().drain(..) {
            if handle.join().is_err() {
                error!("{}", EngineError::WorkerPanicked);
            }
        }
        0
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown(THREAD_TEARDOWN_TIMEOUT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_threads_are_flagged() {
        assert!(!is_running_in_worker_thread());
        let seen = thread::spawn(|| {
            IN_WORKER_THREAD.with(|flag| flag.set(true));
            is_running_in_worker_thread()
        })
        .join()
        .unwrap();
        assert!(seen);
    }

    #[test]
    fn shutdown_of_idle_pool_reports_no_leaks() {
        let pool = WorkerPool::new(Some(2));
        assert_eq!(pool.worker_count(), 2);
        assert_eq!(pool.shutdown(Duration::from_millis(500)), 0);
    }

    #[test]
    fn double_shutdown_is_a_noop() {
        let pool = WorkerPool::new(Some(1));
        pool.shutdown(Duration::from_millis(500));
        assert_eq!(pool.shutdown(Duration::from_millis(10)), 0);
    }
}
