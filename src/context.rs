use std::sync::{Arc, Mutex};

use crate::error::EngineError;

/// An OpenGL rendering context owned by the external context pool. The
/// engine never attaches contexts to a thread; effect runnables attach as
/// needed.
pub trait OpenGlContext: Send + Sync {
    fn is_gpu(&self) -> bool;
}

/// The external pool handing out GPU and CPU rendering contexts. With
/// `reuse_last` set, the pool returns the most recently vended context so
/// successive paint strokes keep drawing over the same texture.
pub trait ContextPool: Send + Sync {
    fn gpu_context(&self, reuse_last: bool) -> Result<Arc<dyn OpenGlContext>, EngineError>;
    fn cpu_context(&self, reuse_last: bool) -> Result<Arc<dyn OpenGlContext>, EngineError>;
}

/// Pool that never has a context to give. Context exhaustion is non-fatal:
/// effects that need GPU fail individually during render.
pub struct NullContextPool;

impl ContextPool for NullContextPool {
    fn gpu_context(&self, _reuse_last: bool) -> Result<Arc<dyn OpenGlContext>, EngineError> {
        Err(EngineError::ContextUnavailable("no GPU pool".to_string()))
    }

    fn cpu_context(&self, _reuse_last: bool) -> Result<Arc<dyn OpenGlContext>, EngineError> {
        Err(EngineError::ContextUnavailable("no CPU pool".to_string()))
    }
}

/// An item being interactively drawn (a paint stroke). Successive strokes of
/// one drawing session reuse the same context pair, memoized here.
pub struct DrawableItem {
    contexts: Mutex<Option<(Arc<dyn OpenGlContext>, Arc<dyn OpenGlContext>)>>,
}

impl DrawableItem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            contexts: Mutex::new(None),
        })
    }

    pub fn drawing_contexts(
        &self,
    ) -> Option<(Arc<dyn OpenGlContext>, Arc<dyn OpenGlContext>)> {
        self.contexts.lock().unwrap().clone()
    }

    pub fn set_drawing_contexts(
        &self,
        gpu: Arc<dyn OpenGlContext>,
        cpu: Arc<dyn OpenGlContext>,
    ) {
        *self.contexts.lock().unwrap() = Some((gpu, cpu));
    }
}
