//! Settings for the curly template engine.
//!
//! This module provides the [`Settings`] struct and [`LazySettings`], a
//! globally-accessible, lazily-initialized settings instance.

use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// The complete set of engine settings.
///
/// # Examples
///
/// ```
/// use curly_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(!settings.debug);
/// assert_eq!(settings.log_level, "info");
/// assert!(settings.template_path.as_os_str().is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory that relative template file names are resolved against.
    /// Empty means "relative to the working directory".
    pub template_path: PathBuf,
    /// The tracing filter directive (e.g. "info", "`curly_template=debug`").
    pub log_level: String,
    /// Whether debug mode is enabled. Selects the human-readable log format.
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            template_path: PathBuf::new(),
            log_level: "info".to_string(),
            debug: false,
        }
    }
}

/// A lazily-initialized, globally-accessible settings holder.
///
/// Call [`configure`](LazySettings::configure) once at startup to set the
/// settings, then use [`get`](LazySettings::get) to access them.
pub struct LazySettings {
    inner: OnceLock<Settings>,
}

impl Default for LazySettings {
    fn default() -> Self {
        Self::new()
    }
}

impl LazySettings {
    /// Creates a new, unconfigured `LazySettings`.
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    /// Configures the global settings.
    ///
    /// Returns the rejected settings back if they were already configured.
    pub fn configure(&self, settings: Settings) -> Result<(), Settings> {
        self.inner.set(settings)
    }

    /// Returns the configured settings, or `None` before configuration.
    pub fn get(&self) -> Option<&Settings> {
        self.inner.get()
    }

    /// Returns the configured settings, falling back to a shared default
    /// instance when nothing was configured.
    pub fn get_or_default(&self) -> &Settings {
        self.inner.get_or_init(Settings::default)
    }

    /// Returns `true` if settings have been configured.
    pub fn is_configured(&self) -> bool {
        self.inner.get().is_some()
    }
}

/// The global settings instance.
pub static SETTINGS: LazySettings = LazySettings::new();
