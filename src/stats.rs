use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::types::RenderStatus;

/// Sink for per-render statistics, fed by the runnables. One instance is
/// shared by every execution of a tree render.
#[derive(Default)]
pub struct RenderStats {
    tasks_rendered: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_aborted: AtomicU64,
    total_render_time: Mutex<Duration>,
}

impl RenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_task(&self, status: RenderStatus, elapsed: Duration) {
        match status {
            RenderStatus::Ok => self.tasks_rendered.fetch_add(1, Ordering::Relaxed),
            RenderStatus::Aborted => self.tasks_aborted.fetch_add(1, Ordering::Relaxed),
            _ => self.tasks_failed.fetch_add(1, Ordering::Relaxed),
        };
        *self.total_render_time.lock().unwrap() += elapsed;
    }

    pub fn tasks_rendered(&self) -> u64 {
        self.tasks_rendered.load(Ordering::Relaxed)
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    pub fn tasks_aborted(&self) -> u64 {
        self.tasks_aborted.load(Ordering::Relaxed)
    }

    pub fn total_render_time(&self) -> Duration {
        *self.total_render_time.lock().unwrap()
    }
}
