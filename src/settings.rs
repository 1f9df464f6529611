use std::sync::Arc;

use once_cell::sync::Lazy;

/// The external settings store. Only the knobs the scheduling core consumes
/// are surfaced here; everything else stays with the application.
pub trait SettingsStore: Send + Sync {
    fn is_nan_handling_enabled(&self) -> bool;
    fn is_transform_concatenation_enabled(&self) -> bool;
}

/// Fixed settings, useful as a default and in tests.
#[derive(Debug, Clone)]
pub struct StaticSettings {
    pub handle_nans: bool,
    pub concatenate_transforms: bool,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            handle_nans: true,
            concatenate_transforms: true,
        }
    }
}

impl SettingsStore for StaticSettings {
    fn is_nan_handling_enabled(&self) -> bool {
        self.handle_nans
    }

    fn is_transform_concatenation_enabled(&self) -> bool {
        self.concatenate_transforms
    }
}

static DEFAULT_SETTINGS: Lazy<Arc<StaticSettings>> =
    Lazy::new(|| Arc::new(StaticSettings::default()));

pub fn default_settings() -> Arc<StaticSettings> {
    DEFAULT_SETTINGS.clone()
}
