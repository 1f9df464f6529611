use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::clones::RenderCloneKey;
use crate::execution::RenderExecution;
use crate::geometry::RectD;
use crate::request::FrameViewRequest;
use crate::types::{ImagePlaneDesc, RenderScale, RenderStatus, TimeValue, ViewIdx};

/// Handle to an image produced by an effect. Pixel storage lives in the image
/// cache; the engine only needs to retain and release references.
pub trait Image: Send + Sync {
    fn plane(&self) -> &ImagePlaneDesc;
    fn bounds(&self) -> RectD;
}

/// Outcome of asking an effect whether it is a group-input proxy.
///
/// A group-input node has no inputs of its own; rendering it only makes sense
/// through the input of the enclosing group it stands for.
pub enum GroupInputResolution {
    /// Plain effect, render it directly.
    NotAGroupInput,
    /// Group-input proxy; render the mapped input of the enclosing group
    /// instead.
    Redirect(Arc<dyn Effect>),
    /// Group-input proxy whose enclosing group has no such input. The render
    /// cannot be initialized.
    MissingInput,
}

/// Arguments of one `request_render` planning call.
pub struct RequestRenderArgs {
    pub time: TimeValue,
    pub view: ViewIdx,
    pub proxy_scale: RenderScale,
    pub mipmap_level: u32,
    pub plane: ImagePlaneDesc,
    pub canonical_roi: RectD,
    /// The downstream request this render is planned for, `None` at the tree
    /// root. The callee wires itself as a dependency of the requester.
    pub requester: Option<Arc<FrameViewRequest>>,
    /// Which input slot of the requester is being resolved, `None` at the
    /// tree root.
    pub input_index: Option<usize>,
}

/// A node in the processing graph, producing images.
///
/// Planning contract for [`Effect::request_render`]: the callee must create
/// render clones for itself and every upstream effect it visits (through
/// [`crate::TreeRender::create_render_clone`]), allocate one
/// [`FrameViewRequest`] per distinct (effect, time, view, plane, region) unit
/// (reusing the existing request when asked again), wire dependency edges
/// with [`FrameViewRequest::add_dependency`] using `args.requester`, and
/// register every discovered request with
/// [`RenderExecution::add_task_to_render`] after its own dependencies are
/// wired. On return the execution holds the topologically analyzed task set.
///
/// [`Effect::launch_render`] runs the kernel for one request. It must be a
/// no-op returning `Ok` when the request is already resolved (cache hit
/// during planning, or a concurrent failure), and should poll
/// [`crate::TreeRender::is_render_aborted`] at natural checkpoints.
pub trait Effect: Send + Sync {
    /// Identity of the node this effect instance belongs to. A render clone
    /// reports the same node as its main instance.
    fn node_id(&self) -> Uuid;

    fn label(&self) -> &str;

    fn is_render_clone(&self) -> bool;

    /// Produce the per-render parameter snapshot for `key`. Called at most
    /// once per key and tree render; the registry deduplicates.
    fn create_render_clone(&self, key: &RenderCloneKey) -> Arc<dyn Effect>;

    /// Drop any state the main instance keeps for the clone bound to `key`.
    /// Called once during tree-render teardown.
    fn remove_render_clone(&self, key: &RenderCloneKey);

    fn resolve_group_input(&self) -> GroupInputResolution {
        GroupInputResolution::NotAGroupInput
    }

    fn region_of_definition(
        &self,
        time: TimeValue,
        view: ViewIdx,
        scale: RenderScale,
    ) -> Result<RectD, RenderStatus>;

    fn produced_planes(
        &self,
        time: TimeValue,
        view: ViewIdx,
    ) -> Result<Vec<ImagePlaneDesc>, RenderStatus>;

    fn request_render(
        &self,
        execution: &Arc<RenderExecution>,
        args: &RequestRenderArgs,
    ) -> Result<Arc<FrameViewRequest>, RenderStatus>;

    fn launch_render(
        &self,
        execution: &Arc<RenderExecution>,
        request: &Arc<FrameViewRequest>,
    ) -> RenderStatus;
}

impl fmt::Debug for dyn Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Effect({})", self.label())
    }
}

#[cfg(test)]
pub(crate) mod test_stubs {
    use super::*;

    /// Minimal effect for unit tests: no inputs, renders a stub image.
    pub(crate) struct StubEffect {
        node: Uuid,
        label: String,
        is_clone: bool,
    }

    impl StubEffect {
        pub(crate) fn new_dyn(label: &str) -> Arc<dyn Effect> {
            Arc::new(Self {
                node: Uuid::new_v4(),
                label: label.to_string(),
                is_clone: false,
            })
        }
    }

    impl Effect for StubEffect {
        fn node_id(&self) -> Uuid {
            self.node
        }

        fn label(&self) -> &str {
            &self.label
        }

        fn is_render_clone(&self) -> bool {
            self.is_clone
        }

        fn create_render_clone(&self, _key: &RenderCloneKey) -> Arc<dyn Effect> {
            Arc::new(Self {
                node: self.node,
                label: self.label.clone(),
                is_clone: true,
            })
        }

        fn remove_render_clone(&self, _key: &RenderCloneKey) {}

        fn region_of_definition(
            &self,
            _time: TimeValue,
            _view: ViewIdx,
            _scale: RenderScale,
        ) -> Result<RectD, RenderStatus> {
            Ok(RectD::new(0.0, 0.0, 100.0, 100.0))
        }

        fn produced_planes(
            &self,
            _time: TimeValue,
            _view: ViewIdx,
        ) -> Result<Vec<ImagePlaneDesc>, RenderStatus> {
            Ok(vec![ImagePlaneDesc::rgba()])
        }

        fn request_render(
            &self,
            execution: &Arc<RenderExecution>,
            args: &RequestRenderArgs,
        ) -> Result<Arc<FrameViewRequest>, RenderStatus> {
            let request = FrameViewRequest::new(
                self_arc(self),
                args.time,
                args.view,
                args.plane.clone(),
                args.canonical_roi,
            );
            if let Some(requester) = &args.requester {
                requester.add_dependency(execution.id(), &request);
            }
            execution.add_task_to_render(&request);
            Ok(request)
        }

        fn launch_render(
            &self,
            _execution: &Arc<RenderExecution>,
            request: &Arc<FrameViewRequest>,
        ) -> RenderStatus {
            request.set_produced_image(stub_image());
            request.set_status(crate::request::RequestStatus::Rendered);
            RenderStatus::Ok
        }
    }

    struct StubImage {
        plane: ImagePlaneDesc,
        bounds: RectD,
    }

    impl Image for StubImage {
        fn plane(&self) -> &ImagePlaneDesc {
            &self.plane
        }

        fn bounds(&self) -> RectD {
            self.bounds
        }
    }

    pub(crate) fn stub_image() -> Arc<dyn Image> {
        Arc::new(StubImage {
            plane: ImagePlaneDesc::rgba(),
            bounds: RectD::new(0.0, 0.0, 100.0, 100.0),
        })
    }

    fn self_arc(effect: &StubEffect) -> Arc<dyn Effect> {
        Arc::new(StubEffect {
            node: effect.node,
            label: effect.label.clone(),
            is_clone: effect.is_clone,
        })
    }
}
