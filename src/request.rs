use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use uuid::Uuid;

use crate::effect::{Effect, Image};
use crate::geometry::RectD;
use crate::types::{ImagePlaneDesc, RenderStatus, TimeValue, ViewIdx};

/// Lifecycle of one frame-view request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    NotRendered,
    Rendered,
    Failed,
    Aborted,
}

impl From<RenderStatus> for RequestStatus {
    fn from(status: RenderStatus) -> Self {
        match status {
            RenderStatus::Ok => RequestStatus::Rendered,
            RenderStatus::Aborted => RequestStatus::Aborted,
            _ => RequestStatus::Failed,
        }
    }
}

/// Dependency bookkeeping of one request within one execution. The same
/// request may take part in several executions with different edge sets, so
/// everything here is keyed by the execution id rather than held globally.
#[derive(Default)]
struct ExecutionBookkeeping {
    /// Upstream requests this one consumes. A multiset: the same upstream
    /// may be needed several times (e.g. two inputs wired to one node).
    dependencies: Vec<Arc<FrameViewRequest>>,
    /// Reverse edges, weak so listener chains never form ownership cycles.
    listeners: Vec<Weak<FrameViewRequest>>,
    /// Dependencies not yet finished.
    remaining: usize,
    /// Upstream images retained until this request runs.
    cached_inputs: Vec<Arc<dyn Image>>,
}

/// One schedulable unit of work: render one (effect, time, view, plane,
/// region) to an image.
pub struct FrameViewRequest {
    id: Uuid,
    effect: Arc<dyn Effect>,
    time: TimeValue,
    view: ViewIdx,
    plane: ImagePlaneDesc,
    canonical_roi: RectD,
    status: Mutex<RequestStatus>,
    produced_image: Mutex<Option<Arc<dyn Image>>>,
    executions: Mutex<HashMap<Uuid, ExecutionBookkeeping>>,
}

impl FrameViewRequest {
    pub fn new(
        effect: Arc<dyn Effect>,
        time: TimeValue,
        view: ViewIdx,
        plane: ImagePlaneDesc,
        canonical_roi: RectD,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            effect,
            time,
            view,
            plane,
            canonical_roi,
            status: Mutex::new(RequestStatus::NotRendered),
            produced_image: Mutex::new(None),
            executions: Mutex::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The render clone this request runs on.
    pub fn effect(&self) -> &Arc<dyn Effect> {
        &self.effect
    }

    pub fn time(&self) -> TimeValue {
        self.time
    }

    pub fn view(&self) -> ViewIdx {
        self.view
    }

    pub fn plane(&self) -> &ImagePlaneDesc {
        &self.plane
    }

    pub fn canonical_roi(&self) -> RectD {
        self.canonical_roi
    }

    pub fn status(&self) -> RequestStatus {
        *self.status.lock().unwrap()
    }

    pub fn set_status(&self, status: RequestStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn produced_image(&self) -> Option<Arc<dyn Image>> {
        self.produced_image.lock().unwrap().clone()
    }

    pub fn set_produced_image(&self, image: Arc<dyn Image>) {
        *self.produced_image.lock().unwrap() = Some(image);
    }

    /// Record that `self` consumes `dependency` within `execution_id`, and
    /// wire the inverse listener edge on the dependency.
    pub fn add_dependency(self: &Arc<Self>, execution_id: Uuid, dependency: &Arc<FrameViewRequest>) {
        {
            let mut executions = self.executions.lock().unwrap();
            let entry = executions.entry(execution_id).or_default();
            entry.dependencies.push(dependency.clone());
            entry.remaining += 1;
        }
        let mut dep_executions = dependency.executions.lock().unwrap();
        let dep_entry = dep_executions.entry(execution_id).or_default();
        dep_entry.listeners.push(Arc::downgrade(self));
    }

    /// Remaining unfinished dependencies within one execution.
    pub fn num_dependencies(&self, execution_id: Uuid) -> usize {
        self.executions
            .lock()
            .unwrap()
            .get(&execution_id)
            .map(|entry| entry.remaining)
            .unwrap_or(0)
    }

    /// Mark one dependency as finished, retaining its produced image until
    /// this request runs. Returns the new remaining count.
    pub fn mark_dependency_rendered(
        &self,
        execution_id: Uuid,
        dependency: &Arc<FrameViewRequest>,
    ) -> usize {
        let mut executions = self.executions.lock().unwrap();
        let entry = executions.entry(execution_id).or_default();
        entry.remaining = entry.remaining.saturating_sub(1);
        if let Some(image) = dependency.produced_image() {
            entry.cached_inputs.push(image);
        }
        entry.remaining
    }

    /// Stable snapshot of the requests depending on this one within one
    /// execution. Dead weak references are skipped.
    pub fn listeners(&self, execution_id: Uuid) -> Vec<Arc<FrameViewRequest>> {
        self.executions
            .lock()
            .unwrap()
            .get(&execution_id)
            .map(|entry| entry.listeners.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    pub fn listener_count(&self, execution_id: Uuid) -> usize {
        self.executions
            .lock()
            .unwrap()
            .get(&execution_id)
            .map(|entry| entry.listeners.len())
            .unwrap_or(0)
    }

    /// Drop the retained upstream images and dependency references. Called
    /// on completion whether the request succeeded or not, so retained
    /// memory stays bounded.
    pub fn clear_rendered_dependencies(&self, execution_id: Uuid) {
        let mut executions = self.executions.lock().unwrap();
        if let Some(entry) = executions.get_mut(&execution_id) {
            entry.cached_inputs.clear();
            entry.dependencies.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::test_stubs::StubEffect;

    fn request(effect: &Arc<dyn Effect>) -> Arc<FrameViewRequest> {
        FrameViewRequest::new(
            effect.clone(),
            TimeValue::from(0.0),
            ViewIdx(0),
            ImagePlaneDesc::rgba(),
            RectD::new(0.0, 0.0, 100.0, 100.0),
        )
    }

    #[test]
    fn dependency_edges_have_exact_inverse_listeners() {
        let effect = StubEffect::new_dyn("stub");
        let exec_id = Uuid::new_v4();
        let downstream = request(&effect);
        let upstream = request(&effect);

        downstream.add_dependency(exec_id, &upstream);

        assert_eq!(downstream.num_dependencies(exec_id), 1);
        let listeners = upstream.listeners(exec_id);
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].id(), downstream.id());
        // Edges are scoped per execution.
        assert_eq!(downstream.num_dependencies(Uuid::new_v4()), 0);
    }

    #[test]
    fn duplicate_dependencies_count_twice() {
        let effect = StubEffect::new_dyn("stub");
        let exec_id = Uuid::new_v4();
        let downstream = request(&effect);
        let upstream = request(&effect);

        downstream.add_dependency(exec_id, &upstream);
        downstream.add_dependency(exec_id, &upstream);

        assert_eq!(downstream.num_dependencies(exec_id), 2);
        assert_eq!(downstream.mark_dependency_rendered(exec_id, &upstream), 1);
        assert_eq!(downstream.mark_dependency_rendered(exec_id, &upstream), 0);
    }

    #[test]
    fn mark_retains_image_until_cleared() {
        let effect = StubEffect::new_dyn("stub");
        let exec_id = Uuid::new_v4();
        let downstream = request(&effect);
        let upstream = request(&effect);
        downstream.add_dependency(exec_id, &upstream);

        upstream.set_produced_image(crate::effect::test_stubs::stub_image());
        let image = upstream.produced_image().unwrap();
        downstream.mark_dependency_rendered(exec_id, &upstream);

        // downstream + the request's own slot + the local binding
        assert_eq!(Arc::strong_count(&image), 3);
        downstream.clear_rendered_dependencies(exec_id);
        assert_eq!(Arc::strong_count(&image), 2);
    }
}
