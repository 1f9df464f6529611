//! Scheduling core for node-based compositing tree renders.
//!
//! A [`TreeRender`] plans the set of per-(effect, time, view, plane, region)
//! work units needed to produce a root image, then one or more
//! [`RenderExecution`]s release those units to a shared worker pool as their
//! dependencies complete. Effect kernels, the image cache and the OpenGL
//! context pool are external collaborators reached through traits.

pub mod clones;
pub mod context;
pub mod effect;
pub mod error;
pub mod execution;
pub mod geometry;
pub mod pool;
pub mod queue;
pub mod request;
pub mod settings;
pub mod stats;
pub mod tree;
pub mod types;
pub mod util;

pub use clones::RenderCloneKey;
pub use context::{ContextPool, DrawableItem, NullContextPool, OpenGlContext};
pub use effect::{Effect, GroupInputResolution, Image, RequestRenderArgs};
pub use error::EngineError;
pub use execution::{RenderExecution, RenderRunnable};
pub use geometry::{RectD, RectI};
pub use pool::{is_running_in_worker_thread, WorkerPool};
pub use queue::{TaskQueue, TaskQueueManager};
pub use request::{FrameViewRequest, RequestStatus};
pub use settings::{default_settings, SettingsStore, StaticSettings};
pub use stats::RenderStats;
pub use tree::{CtorArgs, TreeRender};
pub use types::{combined_scale, ImagePlaneDesc, RenderScale, RenderStatus, TimeValue, ViewIdx};
