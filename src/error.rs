use thiserror::Error;

/// Errors on the non-status paths of the engine: acquiring rendering
/// contexts and driving the worker pool. Scheduling outcomes travel as
/// [`crate::RenderStatus`] codes instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no rendering context available: {0}")]
    ContextUnavailable(String),
    #[error("worker pool queue closed")]
    QueueClosed,
    #[error("render worker thread panicked")]
    WorkerPanicked,
}
