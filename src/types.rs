use ordered_float::OrderedFloat;

/// Frame time on the timeline. Orderable and hashable so it can take part in
/// render clone keys.
pub type TimeValue = OrderedFloat<f64>;

/// Index of a view in a multi-view project (left/right eye, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ViewIdx(pub u32);

/// Spatial scale applied to a render, one factor per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderScale {
    pub x: f64,
    pub y: f64,
}

impl RenderScale {
    pub fn identity() -> Self {
        Self { x: 1.0, y: 1.0 }
    }

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Default for RenderScale {
    fn default() -> Self {
        Self::identity()
    }
}

/// Combine the proxy scale with a mipmap level into the effective scale at
/// which the tree is rendered. Each mipmap level halves the resolution.
pub fn combined_scale(proxy_scale: RenderScale, mipmap_level: u32) -> RenderScale {
    let factor = 1.0 / (1u64 << mipmap_level.min(63)) as f64;
    RenderScale::new(proxy_scale.x * factor, proxy_scale.y * factor)
}

/// An image component layout (e.g. RGBA, alpha, motion vectors) selected for
/// rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImagePlaneDesc {
    pub label: String,
    pub num_components: u32,
}

impl ImagePlaneDesc {
    pub fn new(label: impl Into<String>, num_components: u32) -> Self {
        Self {
            label: label.into(),
            num_components,
        }
    }

    pub fn rgba() -> Self {
        Self::new("Color.RGBA", 4)
    }

    pub fn alpha() -> Self {
        Self::new("Color.Alpha", 1)
    }
}

impl Default for ImagePlaneDesc {
    fn default() -> Self {
        Self::rgba()
    }
}

/// Status code flowing through the scheduling paths. Domain codes returned by
/// effects are passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Ok,
    Failed,
    Aborted,
    OutOfMemory,
    InputDisconnected,
}

impl RenderStatus {
    /// Any non-OK code, including an abort, counts as a failure and is sticky
    /// at execution and tree-render level.
    pub fn is_failure(self) -> bool {
        self != RenderStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_scale_halves_per_mip_level() {
        let scale = combined_scale(RenderScale::identity(), 2);
        assert_eq!(scale.x, 0.25);
        assert_eq!(scale.y, 0.25);

        let proxied = combined_scale(RenderScale::new(0.5, 0.5), 1);
        assert_eq!(proxied.x, 0.25);
    }

    #[test]
    fn abort_is_a_failure_code() {
        assert!(RenderStatus::Aborted.is_failure());
        assert!(RenderStatus::Failed.is_failure());
        assert!(!RenderStatus::Ok.is_failure());
    }
}
