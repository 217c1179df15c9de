//! # curly-template
//!
//! The curly placeholder engine. Templates are plain text with
//! `{{ name[.attr] [|filter[(arg)]]... [??"default"] }}` placeholders that are
//! filled from bindings: scalars, ordered collections, or other templates.
//!
//! ## Modules
//!
//! - [`lexer`] - Placeholder discovery, normalization, and splitting
//! - [`context`] - The [`Value`] model and the ordered [`Dict`]
//! - [`filters`] - The filter pipeline, built-in filters, user filter registries
//! - [`format`] - printf-style formatting for the `format` filter
//! - [`date`] - Date parsing and formatting for the `date` filter
//! - [`loaders`] - Template loaders, the template path, and saving
//! - [`template`] - The [`Template`] type and the substitution engine
//!
//! ## Example
//!
//! ```
//! use curly_template::Template;
//! use serde_json::json;
//!
//! let tpl: Template = "<a href='?q={{ q|url }}'>{{ q }}</a>".parse().unwrap();
//! let html = tpl.render_with(json!({"q": "fish & chips"})).unwrap();
//! assert_eq!(html, "<a href='?q=fish%20%26%20chips'>fish &amp; chips</a>");
//! ```

pub mod context;
pub mod date;
pub mod filters;
pub mod format;
pub mod lexer;
pub mod loaders;
pub mod template;

pub use context::{Dict, Value};
pub use filters::{register_global_filter, FilterRegistry};
pub use template::{render_from_string, Template};

use curly_core::settings::{Settings, SETTINGS};

/// Applies engine-level settings. Currently sets the template path used to
/// resolve relative file names.
pub fn configure(settings: &Settings) {
    loaders::set_template_path(&settings.template_path.to_string_lossy());
}

/// Applies the global [`SETTINGS`], or the defaults when nothing was
/// configured, and returns them.
pub fn init() -> &'static Settings {
    let settings = SETTINGS.get_or_default();
    configure(settings);
    tracing::debug!(template_path = %settings.template_path.display(), "engine initialized");
    settings
}
