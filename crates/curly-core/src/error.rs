//! Core error types for curly.
//!
//! [`CurlyError`] separates structural and programmer errors (an unreadable
//! template, a malformed placeholder, a bad argument, a filter applied to an
//! incompatible value) from ordinary binding gaps. Binding gaps are not errors
//! at all: they leave the placeholder unresolved so that its default, if any,
//! can be rendered.

use thiserror::Error;

/// The primary error type for curly.
#[derive(Error, Debug)]
pub enum CurlyError {
    // ── Loading ──────────────────────────────────────────────────────

    /// The template source could not be read.
    #[error("Template load error: {0}")]
    LoadError(String),

    /// A placeholder failed grammar validation while loading.
    #[error("Format error in template placeholder '{0}'")]
    FormatError(String),

    // ── Binding ──────────────────────────────────────────────────────

    /// A binding call received something other than a collection or null.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A filter received a value it cannot operate on.
    #[error("Filter error: {0}")]
    FilterError(String),

    // ── Persistence ──────────────────────────────────────────────────

    /// The template text could not be written.
    #[error("Template save error: {0}")]
    SaveError(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CurlyError {
    /// Returns `true` for errors raised while turning source text into a
    /// template (the load step of the template lifecycle).
    pub const fn is_load_failure(&self) -> bool {
        matches!(self, Self::LoadError(_) | Self::FormatError(_))
    }
}

/// A convenience type alias for results using [`CurlyError`].
pub type CurlyResult<T> = Result<T, CurlyError>;
