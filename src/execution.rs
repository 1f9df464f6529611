use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use log::debug;
use once_cell::sync::OnceCell;
use uuid::Uuid;

use crate::geometry::RectD;
use crate::pool::is_running_in_worker_thread;
use crate::request::{FrameViewRequest, RequestStatus};
use crate::tree::TreeRender;
use crate::types::{ImagePlaneDesc, RenderStatus};

/// Entry of the ready set. Requests with more pending listeners are released
/// first: finishing them frees more downstream work. The insertion sequence
/// breaks ties so the ordering stays total and stable.
struct ReadyEntry {
    priority: usize,
    seq: u64,
    request: Arc<FrameViewRequest>,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.seq.cmp(&other.seq))
    }
}

struct ExecutionState {
    /// Every request left to process, running ones included.
    all_tasks: HashMap<Uuid, Arc<FrameViewRequest>>,
    /// Requests whose dependencies have all finished, release-ordered.
    ready: BTreeSet<ReadyEntry>,
    /// Guard against double insertion into `ready`.
    ready_ids: HashSet<Uuid>,
    next_seq: u64,
    /// Aggregated status. The first failure wins and sticks.
    status: RenderStatus,
    /// Strong references to in-flight runnables so the worker pool never has
    /// to manage their lifetime.
    live_runnables: HashMap<Uuid, Arc<RenderRunnable>>,
    completed: usize,
}

impl ExecutionState {
    fn promote(&mut self, request: &Arc<FrameViewRequest>, execution_id: Uuid) {
        if !self.ready_ids.insert(request.id()) {
            return;
        }
        let entry = ReadyEntry {
            priority: request.listener_count(execution_id),
            seq: self.next_seq,
            request: request.clone(),
        };
        self.next_seq += 1;
        self.ready.insert(entry);
    }

    fn is_quiescent(&self) -> bool {
        self.live_runnables.is_empty()
            && (self.all_tasks.is_empty() || (self.status.is_failure() && self.ready.is_empty()))
    }
}

/// One scheduling frontier of a tree render: the full task set discovered by
/// planning, the dependency-free subset ready to launch, and the aggregated
/// status. A tree render owns one main execution and zero or more
/// sub-executions (color-picker samples, plane fetches); they share the
/// parent render's clones and identity.
pub struct RenderExecution {
    id: Uuid,
    is_main: bool,
    tree_render: Weak<TreeRender>,
    plane: ImagePlaneDesc,
    canonical_roi: RectD,
    output_request: OnceCell<Arc<FrameViewRequest>>,
    inner: Mutex<ExecutionState>,
    task_done: Condvar,
}

impl RenderExecution {
    pub(crate) fn new(
        tree_render: &Arc<TreeRender>,
        is_main: bool,
        plane: ImagePlaneDesc,
        canonical_roi: RectD,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            is_main,
            tree_render: Arc::downgrade(tree_render),
            plane,
            canonical_roi,
            output_request: OnceCell::new(),
            inner: Mutex::new(ExecutionState {
                all_tasks: HashMap::new(),
                ready: BTreeSet::new(),
                ready_ids: HashSet::new(),
                next_seq: 0,
                status: RenderStatus::Ok,
                live_runnables: HashMap::new(),
                completed: 0,
            }),
            task_done: Condvar::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_tree_main_execution(&self) -> bool {
        self.is_main
    }

    pub fn tree_render(&self) -> Option<Arc<TreeRender>> {
        self.tree_render.upgrade()
    }

    pub fn plane(&self) -> &ImagePlaneDesc {
        &self.plane
    }

    pub fn canonical_roi(&self) -> RectD {
        self.canonical_roi
    }

    pub fn status(&self) -> RenderStatus {
        self.inner.lock().unwrap().status
    }

    /// Sticky failure: only the first failing code is kept.
    pub(crate) fn fail(&self, status: RenderStatus) {
        debug_assert!(status.is_failure());
        let mut state = self.inner.lock().unwrap();
        if !state.status.is_failure() {
            state.status = status;
        }
    }

    pub fn output_request(&self) -> Option<Arc<FrameViewRequest>> {
        self.output_request.get().cloned()
    }

    pub(crate) fn set_output_request(&self, request: Arc<FrameViewRequest>) {
        let _ = self.output_request.set(request);
    }

    /// Register one planned request. If it has no unfinished dependencies it
    /// is immediately ready. Safe to call concurrently; planning passes of
    /// sub-executions may overlap task completion of the main one.
    pub fn add_task_to_render(&self, request: &Arc<FrameViewRequest>) {
        let mut state = self.inner.lock().unwrap();
        if state
            .all_tasks
            .insert(request.id(), request.clone())
            .is_none()
        {
            debug!(
                "execution {}: task {} added ({} deps)",
                self.id,
                request.effect().label(),
                request.num_dependencies(self.id)
            );
        }
        if request.num_dependencies(self.id) == 0 && !state.status.is_failure() {
            state.promote(request, self.id);
        }
    }

    pub fn has_tasks_to_execute(&self) -> bool {
        !self.inner.lock().unwrap().all_tasks.is_empty()
    }

    pub fn ready_task_count(&self) -> usize {
        self.inner.lock().unwrap().ready.len()
    }

    pub fn live_task_count(&self) -> usize {
        self.inner.lock().unwrap().live_runnables.len()
    }

    pub fn pending_task_count(&self) -> usize {
        self.inner.lock().unwrap().all_tasks.len()
    }

    pub fn completed_task_count(&self) -> usize {
        self.inner.lock().unwrap().completed
    }

    /// True once nothing can make progress anymore: no in-flight runnable,
    /// and either every task completed or the execution failed and the ready
    /// set drained its short-circuiting leftovers.
    pub fn is_quiescent(&self) -> bool {
        self.inner.lock().unwrap().is_quiescent()
    }

    /// Release up to `n_tasks` ready requests (all of them when `n_tasks` is
    /// `-1`) into the worker pool. Returns the number of asynchronous tasks
    /// started. Requests that are already resolved, or whose execution has
    /// failed, have no pixels to produce: their runnable is executed inline
    /// with the lock released instead of being dispatched.
    pub fn execute_available_tasks(self: &Arc<Self>, n_tasks: i32) -> usize {
        debug_assert!(n_tasks != 0);
        let mut slots = if n_tasks < 0 {
            usize::MAX
        } else {
            n_tasks as usize
        };
        let mut started = 0;
        let queue = self.tree_render.upgrade().map(|render| render.queue());

        let mut state = self.inner.lock().unwrap();
        while slots > 0 {
            let entry = match state.ready.pop_first() {
                Some(entry) => entry,
                None => break,
            };
            state.ready_ids.remove(&entry.request.id());
            let request = entry.request;
            let runnable = Arc::new(RenderRunnable {
                execution: Arc::downgrade(self),
                request: request.clone(),
            });

            let dispatch = cfg!(not(feature = "single-threaded"))
                && queue.is_some()
                && request.status() == RequestStatus::NotRendered
                && !state.status.is_failure();

            if dispatch {
                state.live_runnables.insert(request.id(), runnable.clone());
                drop(state);
                queue
                    .as_ref()
                    .expect("dispatch implies a queue")
                    .start_task(runnable);
                started += 1;
                slots -= 1;
            } else {
                drop(state);
                runnable.run();
            }
            state = self.inner.lock().unwrap();
        }
        started
    }

    /// Completion hook, invoked by the runnable whether the task produced an
    /// image, failed, or was skipped.
    pub(crate) fn on_task_finished(
        self: &Arc<Self>,
        request: &Arc<FrameViewRequest>,
        status: RenderStatus,
    ) {
        // Release the retained upstream images before anything else so
        // retained memory stays bounded.
        request.clear_rendered_dependencies(self.id);

        let execution_status;
        {
            let mut state = self.inner.lock().unwrap();
            if status.is_failure() && !state.status.is_failure() {
                state.status = status;
            }
            state.live_runnables.remove(&request.id());
            if state.all_tasks.remove(&request.id()).is_some() {
                state.completed += 1;
            }
            if !state.status.is_failure() {
                for listener in request.listeners(self.id) {
                    let remaining = listener.mark_dependency_rendered(self.id, request);
                    if remaining == 0 && state.all_tasks.contains_key(&listener.id()) {
                        state.promote(&listener, self.id);
                    }
                }
            }
            execution_status = state.status;
        }
        self.task_done.notify_all();

        if let Some(render) = self.tree_render.upgrade() {
            render.set_results(Some(request), execution_status);
            render
                .queue()
                .notify_task_finished(self, is_running_in_worker_thread());
        }
    }

    /// Block until a task completes, work becomes dispatchable, or `timeout`
    /// elapses. Returns `false` on timeout.
    pub fn wait_for_task_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock().unwrap();
        loop {
            if !state.ready.is_empty() || state.is_quiescent() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, wait) = self
                .task_done
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = next;
            if wait.timed_out() {
                return !state.ready.is_empty() || state.is_quiescent();
            }
        }
    }
}

/// A thin task object: runs one request's render entry point and reports
/// completion back to the execution. Runnables hold a weak reference to the
/// execution and must not extend the tree render's lifetime; the execution
/// retains them in `live_runnables` until they complete.
pub struct RenderRunnable {
    execution: Weak<RenderExecution>,
    request: Arc<FrameViewRequest>,
}

impl RenderRunnable {
    pub fn request(&self) -> &Arc<FrameViewRequest> {
        &self.request
    }

    pub fn run(&self) {
        let execution = match self.execution.upgrade() {
            Some(execution) => execution,
            None => return,
        };
        let start = Instant::now();

        // Another task of this execution may have failed since dispatch.
        let mut status = execution.status();
        if !status.is_failure() {
            status = self
                .request
                .effect()
                .launch_render(&execution, &self.request);
        }
        if self.request.status() == RequestStatus::NotRendered {
            self.request.set_status(RequestStatus::from(status));
        }

        if let Some(render) = execution.tree_render() {
            if let Some(stats) = render.stats() {
                stats.record_task(status, start.elapsed());
            }
        }

        execution.on_task_finished(&self.request, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(priority: usize, seq: u64) -> ReadyEntry {
        ReadyEntry {
            priority,
            seq,
            request: FrameViewRequest::new(
                crate::effect::test_stubs::StubEffect::new_dyn("stub"),
                crate::types::TimeValue::from(0.0),
                crate::types::ViewIdx(0),
                ImagePlaneDesc::rgba(),
                RectD::new(0.0, 0.0, 1.0, 1.0),
            ),
        }
    }

    #[test]
    fn ready_set_orders_by_listener_count_then_insertion() {
        let mut ready = BTreeSet::new();
        ready.insert(entry(0, 0));
        ready.insert(entry(3, 1));
        ready.insert(entry(1, 2));
        ready.insert(entry(3, 3));

        let order: Vec<(usize, u64)> = ready
            .into_iter()
            .map(|e| (e.priority, e.seq))
            .collect();
        assert_eq!(order, vec![(3, 1), (3, 3), (1, 2), (0, 0)]);
    }
}
