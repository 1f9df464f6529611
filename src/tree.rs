use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::debug;
use uuid::Uuid;

use crate::clones::{CloneRegistry, RenderCloneKey};
use crate::context::{ContextPool, DrawableItem, NullContextPool, OpenGlContext};
use crate::effect::{Effect, GroupInputResolution, RequestRenderArgs};
use crate::execution::RenderExecution;
use crate::geometry::{RectD, RectI};
use crate::queue::TaskQueue;
use crate::request::FrameViewRequest;
use crate::settings::{default_settings, SettingsStore};
use crate::stats::RenderStats;
use crate::types::{
    combined_scale, ImagePlaneDesc, RenderScale, RenderStatus, TimeValue, ViewIdx,
};

/// Construction arguments of a tree render.
pub struct CtorArgs {
    pub time: TimeValue,
    pub view: ViewIdx,
    /// Root of the tree to render. Must be a main instance, never a render
    /// clone. A group-input proxy is rewritten to the real input of the
    /// enclosing group before planning.
    pub tree_root: Arc<dyn Effect>,
    /// Nodes upstream of the root whose images the caller wants alongside
    /// the output (e.g. for color picking).
    pub extra_nodes_to_sample: Vec<Arc<dyn Effect>>,
    /// The stroke item being painted, when rendering in paint mode.
    pub active_drawable_item: Option<Arc<DrawableItem>>,
    pub stats: Option<Arc<RenderStats>>,
    /// Region of interest on the root, in canonical coordinates. Resolved
    /// from the root's region of definition when absent.
    pub canonical_roi: Option<RectD>,
    /// Plane to render on the root. Resolved from the root's produced planes
    /// when absent.
    pub plane: Option<ImagePlaneDesc>,
    pub proxy_scale: RenderScale,
    pub mipmap_level: u32,
    pub draft_mode: bool,
    pub playback: bool,
    pub bypass_cache: bool,
    pub prevent_concurrent_renders: bool,
    pub settings: Arc<dyn SettingsStore>,
    pub context_pool: Arc<dyn ContextPool>,
    pub queue: Arc<dyn TaskQueue>,
}

impl CtorArgs {
    pub fn new(tree_root: Arc<dyn Effect>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            time: TimeValue::from(0.0),
            view: ViewIdx(0),
            tree_root,
            extra_nodes_to_sample: Vec::new(),
            active_drawable_item: None,
            stats: None,
            canonical_roi: None,
            plane: None,
            proxy_scale: RenderScale::identity(),
            mipmap_level: 0,
            draft_mode: false,
            playback: false,
            bypass_cache: false,
            prevent_concurrent_renders: false,
            settings: default_settings(),
            context_pool: Arc::new(NullContextPool),
            queue,
        }
    }
}

struct ExtraResults {
    requested: HashMap<Uuid, Option<Arc<FrameViewRequest>>>,
    /// Bounding box of the viewer area to refresh while a stroke is being
    /// painted.
    stroke_update_area: Option<RectI>,
}

/// The outer handle for one user-visible render request: construction
/// arguments, rendering contexts, abort flag, extra results and the
/// executions spawned to satisfy the request.
pub struct TreeRender {
    args: CtorArgs,
    state: Mutex<RenderStatus>,
    extra: Mutex<ExtraResults>,
    output_request: Mutex<Option<Arc<FrameViewRequest>>>,
    clones: Mutex<CloneRegistry>,
    clones_cleaned: AtomicBool,
    main_execution_created: AtomicBool,
    executions: Mutex<Vec<Arc<RenderExecution>>>,
    gl_context: Option<Weak<dyn OpenGlContext>>,
    cpu_gl_context: Option<Weak<dyn OpenGlContext>>,
    aborted: AtomicU32,
    handle_nans: bool,
    use_concatenations: bool,
}

impl TreeRender {
    /// The only sanctioned constructor. Failures (group-input proxy without
    /// a real input, a render clone as root) are captured into a `Failed`
    /// state instead of propagating: every later operation on the returned
    /// handle short-circuits to empty results.
    pub fn create(mut args: CtorArgs) -> Arc<TreeRender> {
        let mut state = RenderStatus::Ok;

        // A group-input node has no inputs of its own; rendering it only
        // makes sense through the input of the enclosing group it stands
        // for.
        match args.tree_root.resolve_group_input() {
            GroupInputResolution::NotAGroupInput => {}
            GroupInputResolution::Redirect(real_input) => {
                debug!(
                    "group-input root {} rewritten to {}",
                    args.tree_root.label(),
                    real_input.label()
                );
                args.tree_root = real_input;
            }
            GroupInputResolution::MissingInput => {
                state = RenderStatus::Failed;
            }
        }

        if !state.is_failure() && args.tree_root.is_render_clone() {
            state = RenderStatus::Failed;
        }

        let handle_nans = args.settings.is_nan_handling_enabled();
        let use_concatenations = args.settings.is_transform_concatenation_enabled();

        let (gl_context, cpu_gl_context) = if state.is_failure() {
            (None, None)
        } else {
            Self::fetch_gl_contexts(&args)
        };

        let requested = args
            .extra_nodes_to_sample
            .iter()
            .map(|effect| (effect.node_id(), None))
            .collect();

        Arc::new(TreeRender {
            args,
            state: Mutex::new(state),
            extra: Mutex::new(ExtraResults {
                requested,
                stroke_update_area: None,
            }),
            output_request: Mutex::new(None),
            clones: Mutex::new(CloneRegistry::default()),
            clones_cleaned: AtomicBool::new(false),
            main_execution_created: AtomicBool::new(false),
            executions: Mutex::new(Vec::new()),
            gl_context,
            cpu_gl_context,
            aborted: AtomicU32::new(0),
            handle_nans,
            use_concatenations,
        })
    }

    /// Acquire one GPU and one CPU context from the pool. In paint mode the
    /// pair is memoized on the stroke item so successive strokes keep the
    /// same contexts. Exhaustion is non-fatal: effects that need GPU fail
    /// individually during render.
    fn fetch_gl_contexts(
        args: &CtorArgs,
    ) -> (
        Option<Weak<dyn OpenGlContext>>,
        Option<Weak<dyn OpenGlContext>>,
    ) {
        let mut pair = None;
        if let Some(item) = &args.active_drawable_item {
            pair = item.drawing_contexts();
            if pair.is_none() {
                match (
                    args.context_pool.gpu_context(true),
                    args.context_pool.cpu_context(true),
                ) {
                    (Ok(gpu), Ok(cpu)) => {
                        item.set_drawing_contexts(gpu.clone(), cpu.clone());
                        pair = Some((gpu, cpu));
                    }
                    (gpu, cpu) => {
                        if let Err(err) = gpu.and(cpu) {
                            debug!("painting without rendering contexts: {}", err);
                        }
                    }
                }
            }
        } else {
            match (
                args.context_pool.gpu_context(false),
                args.context_pool.cpu_context(false),
            ) {
                (Ok(gpu), Ok(cpu)) => pair = Some((gpu, cpu)),
                (gpu, cpu) => {
                    if let Err(err) = gpu.and(cpu) {
                        debug!("rendering without OpenGL contexts: {}", err);
                    }
                }
            }
        }
        match pair {
            Some((gpu, cpu)) => (Some(Arc::downgrade(&gpu)), Some(Arc::downgrade(&cpu))),
            None => (None, None),
        }
    }

    /// Per-tree-render parameter snapshot of `effect`, created on first use
    /// and reused afterwards.
    pub fn create_render_clone(
        self: &Arc<Self>,
        effect: &Arc<dyn Effect>,
        time: TimeValue,
        view: ViewIdx,
    ) -> Arc<dyn Effect> {
        let key = RenderCloneKey {
            node: effect.node_id(),
            time,
            view,
        };
        self.clones.lock().unwrap().get_or_create(effect, key)
    }

    /// Register a clone produced outside [`TreeRender::create_render_clone`]
    /// so teardown reaches it too.
    pub fn register_render_clone(
        &self,
        main: &Arc<dyn Effect>,
        key: RenderCloneKey,
        clone: Arc<dyn Effect>,
    ) {
        self.clones.lock().unwrap().register(main, key, clone);
    }

    /// Drop every clone registered for this render. Runs at most once; later
    /// calls are no-ops.
    pub fn cleanup_render_clones(&self) {
        if self.clones_cleaned.swap(true, Ordering::AcqRel) {
            return;
        }
        self.clones.lock().unwrap().cleanup();
    }

    fn failed_execution(
        self: &Arc<Self>,
        is_main: bool,
        status: RenderStatus,
    ) -> Arc<RenderExecution> {
        let execution =
            RenderExecution::new(self, is_main, ImagePlaneDesc::default(), RectD::default());
        execution.fail(status);
        self.executions.lock().unwrap().push(execution.clone());
        execution
    }

    #[allow(clippy::too_many_arguments)]
    fn create_execution_internal(
        self: &Arc<Self>,
        is_main: bool,
        root: &Arc<dyn Effect>,
        time: TimeValue,
        view: ViewIdx,
        proxy_scale: RenderScale,
        mipmap_level: u32,
        plane: Option<ImagePlaneDesc>,
        canonical_roi: Option<RectD>,
    ) -> Arc<RenderExecution> {
        let state = self.status();
        if state.is_failure() {
            return self.failed_execution(is_main, state);
        }

        let root_clone = self.create_render_clone(root, time, view);

        let plane = match plane {
            Some(plane) => plane,
            None => match root_clone.produced_planes(time, view) {
                Ok(planes) => planes.into_iter().next().unwrap_or_default(),
                Err(status) => return self.failed_execution(is_main, status),
            },
        };

        let canonical_roi = match canonical_roi {
            Some(roi) => roi,
            None => {
                let scale = combined_scale(proxy_scale, mipmap_level);
                match root_clone.region_of_definition(time, view, scale) {
                    Ok(rod) => rod,
                    Err(status) => return self.failed_execution(is_main, status),
                }
            }
        };

        let execution = RenderExecution::new(self, is_main, plane.clone(), canonical_roi);
        self.executions.lock().unwrap().push(execution.clone());

        // Recursive request pass: builds the topologically analyzed task set
        // and its dependency edges into the execution.
        let request_args = RequestRenderArgs {
            time,
            view,
            proxy_scale,
            mipmap_level,
            plane,
            canonical_roi,
            requester: None,
            input_index: None,
        };
        match root_clone.request_render(&execution, &request_args) {
            Ok(output) => execution.set_output_request(output),
            Err(status) => {
                execution.fail(status);
                return execution;
            }
        }

        // The request pass must have produced the first batch of
        // dependency-free renders, otherwise nothing could ever run.
        if execution.ready_task_count() == 0 && !execution.status().is_failure() {
            execution.fail(RenderStatus::Failed);
        }
        execution
    }

    /// Plan the root request of this render. Exactly one main execution
    /// exists per tree render.
    pub fn create_main_execution_data(self: &Arc<Self>) -> Arc<RenderExecution> {
        let already = self.main_execution_created.swap(true, Ordering::AcqRel);
        debug_assert!(!already, "main execution planned twice");
        let root = self.args.tree_root.clone();
        self.create_execution_internal(
            true,
            &root,
            self.args.time,
            self.args.view,
            self.args.proxy_scale,
            self.args.mipmap_level,
            self.args.plane.clone(),
            self.args.canonical_roi,
        )
    }

    /// Plan an auxiliary request sharing this render's identity and clones
    /// (color-picker samples, extra plane fetches). Clones stay registered
    /// until the top-level [`TreeRender::cleanup_render_clones`].
    #[allow(clippy::too_many_arguments)]
    pub fn create_sub_execution_data(
        self: &Arc<Self>,
        root: &Arc<dyn Effect>,
        time: TimeValue,
        view: ViewIdx,
        proxy_scale: RenderScale,
        mipmap_level: u32,
        plane: Option<ImagePlaneDesc>,
        canonical_roi: Option<RectD>,
    ) -> Arc<RenderExecution> {
        self.create_execution_internal(
            false,
            root,
            time,
            view,
            proxy_scale,
            mipmap_level,
            plane,
            canonical_roi,
        )
    }

    /// One sub-execution per extra-requested node whose image the main
    /// execution did not populate opportunistically (a node on the main path
    /// is usually satisfied from cache during the main pass).
    pub fn get_extra_requested_results_execution_data(
        self: &Arc<Self>,
    ) -> Vec<Arc<RenderExecution>> {
        let missing: Vec<Uuid> = {
            let extra = self.extra.lock().unwrap();
            extra
                .requested
                .iter()
                .filter(|(_, slot)| slot.is_none())
                .map(|(node, _)| *node)
                .collect()
        };

        let mut executions = Vec::new();
        for node in missing {
            let effect = self
                .args
                .extra_nodes_to_sample
                .iter()
                .find(|effect| effect.node_id() == node);
            if let Some(effect) = effect.cloned() {
                executions.push(self.create_sub_execution_data(
                    &effect,
                    self.args.time,
                    self.args.view,
                    self.args.proxy_scale,
                    self.args.mipmap_level,
                    self.args.plane.clone(),
                    self.args.canonical_roi,
                ));
            }
        }
        executions
    }

    /// Funnel for per-task completion. Failures stick on the render state;
    /// the root node's request becomes the output, any other request fills
    /// its extra-results slot at most once.
    pub fn set_results(&self, request: Option<&Arc<FrameViewRequest>>, status: RenderStatus) {
        if status.is_failure() {
            let mut state = self.state.lock().unwrap();
            if !state.is_failure() {
                *state = status;
            }
        }
        if let Some(request) = request {
            let node = request.effect().node_id();
            if node == self.args.tree_root.node_id() {
                *self.output_request.lock().unwrap() = Some(request.clone());
            } else {
                let mut extra = self.extra.lock().unwrap();
                if let Some(slot) = extra.requested.get_mut(&node) {
                    if slot.is_none() {
                        *slot = Some(request.clone());
                    }
                }
            }
        }
    }

    pub fn status(&self) -> RenderStatus {
        *self.state.lock().unwrap()
    }

    pub fn output_request(&self) -> Option<Arc<FrameViewRequest>> {
        self.output_request.lock().unwrap().clone()
    }

    pub fn extra_requested_result_for_node(&self, node: Uuid) -> Option<Arc<FrameViewRequest>> {
        self.extra
            .lock()
            .unwrap()
            .requested
            .get(&node)
            .cloned()
            .flatten()
    }

    pub fn is_extra_results_requested_for_node(&self, node: Uuid) -> bool {
        self.extra.lock().unwrap().requested.contains_key(&node)
    }

    pub fn set_active_stroke_update_area(&self, area: RectI) {
        self.extra.lock().unwrap().stroke_update_area = Some(area);
    }

    pub fn active_stroke_update_area(&self) -> Option<RectI> {
        self.extra.lock().unwrap().stroke_update_area
    }

    /// Cooperative cancellation: running kernels are not preempted, they
    /// observe the flag at their next checkpoint.
    pub fn set_render_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_render_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire) > 0
    }

    pub fn time(&self) -> TimeValue {
        self.args.time
    }

    pub fn view(&self) -> ViewIdx {
        self.args.view
    }

    pub fn ctor_roi(&self) -> Option<RectD> {
        self.args.canonical_roi
    }

    pub fn proxy_scale(&self) -> RenderScale {
        self.args.proxy_scale
    }

    pub fn mipmap_level(&self) -> u32 {
        self.args.mipmap_level
    }

    pub fn is_playback(&self) -> bool {
        self.args.playback
    }

    pub fn is_draft_render(&self) -> bool {
        self.args.draft_mode
    }

    pub fn is_bypass_cache_enabled(&self) -> bool {
        self.args.bypass_cache
    }

    pub fn is_concurrent_renders_allowed(&self) -> bool {
        !self.args.prevent_concurrent_renders
    }

    pub fn is_nan_handling_enabled(&self) -> bool {
        self.handle_nans
    }

    pub fn is_concatenation_enabled(&self) -> bool {
        self.use_concatenations
    }

    pub fn original_tree_root(&self) -> &Arc<dyn Effect> {
        &self.args.tree_root
    }

    pub fn current_drawing_item(&self) -> Option<&Arc<DrawableItem>> {
        self.args.active_drawable_item.as_ref()
    }

    pub fn stats(&self) -> Option<Arc<RenderStats>> {
        self.args.stats.clone()
    }

    pub fn queue(&self) -> Arc<dyn TaskQueue> {
        self.args.queue.clone()
    }

    pub fn gpu_context(&self) -> Option<Arc<dyn OpenGlContext>> {
        self.gl_context.as_ref().and_then(Weak::upgrade)
    }

    pub fn cpu_context(&self) -> Option<Arc<dyn OpenGlContext>> {
        self.cpu_gl_context.as_ref().and_then(Weak::upgrade)
    }
}
