//! # curly
//!
//! A placeholder-substitution template engine with filter pipelines.
//!
//! This is the meta-crate that re-exports the curly sub-crates for convenient
//! access. Depend on `curly` for everything, or on the individual crates for
//! finer-grained control.
//!
//! ```
//! use curly::prelude::*;
//!
//! let mut tpl = Template::from_string("{{ n|format('%03d') }} {{ label ?? 'none' }}").unwrap();
//! tpl.assign(json!({"n": 7})).unwrap();
//! assert_eq!(tpl.render().unwrap(), "007 none");
//! ```

/// Error types, settings, settings loading, and logging setup.
pub use curly_core as core;

/// The template engine: grammar, values, filters, loaders, and templates.
pub use curly_template as template;

/// Third-party re-exports.
pub use serde_json;
pub use tracing;

/// Commonly used types and functions.
pub mod prelude {
    pub use curly_core::error::{CurlyError, CurlyResult};
    pub use curly_core::logging::setup_logging;
    pub use curly_core::settings::{Settings, SETTINGS};
    pub use curly_core::settings_loader;
    pub use curly_template::loaders::{set_template_path, FileSystemLoader, StringLoader, TemplateLoader};
    pub use curly_template::{
        configure, init, register_global_filter, render_from_string, Dict, FilterRegistry,
        Template, Value,
    };
    pub use serde_json::json;
}
