use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::execution::{RenderExecution, RenderRunnable};
use crate::pool::{WorkerPool, THREAD_TEARDOWN_TIMEOUT};
use crate::tree::TreeRender;
use crate::types::RenderStatus;
use crate::util::timing::{measure_info, ScopedTimer};

/// Contract between executions and the global task queue that owns the
/// worker threads. Executions hand ready runnables to `start_task` and
/// report every completion through `notify_task_finished`.
pub trait TaskQueue: Send + Sync {
    fn start_task(&self, runnable: Arc<RenderRunnable>);

    /// One task of `execution` finished. `in_worker_thread` tells the
    /// manager whether the notifying thread belongs to its own pool, so it
    /// can avoid re-entrant dispatch from a worker.
    fn notify_task_finished(&self, execution: &Arc<RenderExecution>, in_worker_thread: bool);
}

/// Reference queue manager: owns the worker pool, sequences the main
/// execution before the extra-results sub-executions of a tree render, and
/// decides how many ready slots to release per scheduling tick.
pub struct TaskQueueManager {
    pool: WorkerPool,
    /// Ready slots released per tick; `-1` releases everything available.
    tasks_per_tick: i32,
    notifications: AtomicU64,
}

impl TaskQueueManager {
    pub fn new() -> Arc<Self> {
        Self::with_worker_count(None)
    }

    pub fn with_worker_count(worker_count: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            pool: WorkerPool::new(worker_count),
            tasks_per_tick: -1,
            notifications: AtomicU64::new(0),
        })
    }

    /// Drive one tree render to completion: plan and execute the main
    /// execution, then the sub-executions for extra results the main pass
    /// did not satisfy, then drop the render clones.
    pub fn launch(self: &Arc<Self>, render: &Arc<TreeRender>) -> RenderStatus {
        measure_info("tree render", || {
            let main = render.create_main_execution_data();
            self.drive(&main);

            for sub_execution in render.get_extra_requested_results_execution_data() {
                self.drive(&sub_execution);
            }

            render.cleanup_render_clones();
            render.status()
        })
    }

    /// Release ready tasks until the execution drains. A failed execution
    /// still drains: its leftover ready tasks short-circuit inline and
    /// nothing new gets promoted.
    fn drive(&self, execution: &Arc<RenderExecution>) {
        let _timer = ScopedTimer::debug_lazy(|| format!("execution {}", execution.id()));
        let mut reported_stall = false;
        loop {
            execution.execute_available_tasks(self.tasks_per_tick);
            if execution.is_quiescent() {
                break;
            }
            if !execution.wait_for_task_completion(THREAD_TEARDOWN_TIMEOUT) && !reported_stall {
                warn!(
                    "execution {}: {} task(s) in flight and {} pending after {} ms; their threads cannot be controlled anymore",
                    execution.id(),
                    execution.live_task_count(),
                    execution.pending_task_count(),
                    THREAD_TEARDOWN_TIMEOUT.as_millis()
                );
                reported_stall = true;
            }
        }
    }

    pub fn notifications_received(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Tear the worker pool down, reporting any leaked thread. Safe to call
    /// more than once.
    pub fn shutdown(&self) -> usize {
        self.pool.shutdown(THREAD_TEARDOWN_TIMEOUT)
    }
}

impl TaskQueue for TaskQueueManager {
    fn start_task(&self, runnable: Arc<RenderRunnable>) {
        if self.pool.start(runnable.clone()).is_err() {
            // Pool already torn down; run on the caller so the task is not
            // lost. The dispatching execution released its lock first.
            warn!("worker pool closed, running task inline");
            runnable.run();
        }
    }

    fn notify_task_finished(&self, execution: &Arc<RenderExecution>, in_worker_thread: bool) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
        // Dispatching from a worker would re-enter the pool; the drive loop
        // waiting on the execution picks the wake-up instead.
        debug!(
            "execution {}: task finished (worker thread: {})",
            execution.id(),
            in_worker_thread
        );
    }
}
