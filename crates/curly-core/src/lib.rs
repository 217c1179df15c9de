//! # curly-core
//!
//! Foundation types shared by the curly crates: the error enum, settings,
//! settings loading, and tracing setup. It has no dependency on the engine.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Engine settings and the global settings holder
//! - [`settings_loader`] - Loading settings from TOML, JSON, and the environment
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{CurlyError, CurlyResult};
pub use settings::{Settings, SETTINGS};
