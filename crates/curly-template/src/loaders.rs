//! Template loaders.
//!
//! Loaders find and read template source. The [`TemplateLoader`] trait
//! defines the interface, with filesystem and in-memory implementations.
//! Relative file names resolve against a process-wide template path set with
//! [`set_template_path`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, PoisonError, RwLock};

use curly_core::error::CurlyError;

/// Loads template source text by name.
pub trait TemplateLoader: Send + Sync {
    /// Loads the template source with the given name.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if the template cannot be found or read.
    fn load(&self, name: &str) -> Result<String, CurlyError>;
}

/// Serializes tests that change the global template path.
#[cfg(test)]
pub(crate) static TEMPLATE_PATH_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn template_path_cell() -> &'static RwLock<String> {
    static TEMPLATE_PATH: OnceLock<RwLock<String>> = OnceLock::new();
    TEMPLATE_PATH.get_or_init(|| RwLock::new(String::new()))
}

/// Sets the directory relative template names resolve against.
///
/// Backslashes become `/` and a trailing `/` is added. An empty path resets
/// resolution to the working directory. Returns the stored path.
///
/// ```
/// use curly_template::loaders::set_template_path;
///
/// assert_eq!(set_template_path(r"C:\web\tpl"), "C:/web/tpl/");
/// assert_eq!(set_template_path(""), "");
/// ```
pub fn set_template_path(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    if !normalized.is_empty() && !normalized.ends_with('/') {
        normalized.push('/');
    }
    tracing::debug!(path = %normalized, "template path set");
    *template_path_cell()
        .write()
        .unwrap_or_else(PoisonError::into_inner) = normalized.clone();
    normalized
}

/// Returns the current template path (empty when unset).
pub fn template_path() -> String {
    template_path_cell()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Returns `true` for names starting with `/`, `\` or a drive letter (`C:`).
pub fn is_absolute(name: &str) -> bool {
    let bytes = name.as_bytes();
    name.starts_with(['/', '\\'])
        || (bytes.len() >= 2 && bytes[0].is_ascii_uppercase() && bytes[1] == b':')
}

/// Resolves a template file name: absolute names are used as-is, relative
/// ones are prefixed with the template path.
pub fn resolve_path(name: &str) -> PathBuf {
    if is_absolute(name) {
        PathBuf::from(name)
    } else {
        PathBuf::from(format!("{}{name}", template_path()))
    }
}

fn read_file(path: &Path) -> Result<String, CurlyError> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        CurlyError::LoadError(format!(
            "Template file '{}' is not readable: {e}",
            path.display()
        ))
    })?;
    tracing::debug!(path = %path.display(), bytes = source.len(), "template file read");
    Ok(source)
}

/// Reads a template file, resolving `name` with [`resolve_path`].
pub fn load_file(name: &str) -> Result<String, CurlyError> {
    read_file(&resolve_path(name))
}

/// Writes `text` to a file, resolving `name` with [`resolve_path`].
///
/// # Errors
///
/// Returns `SaveError` if the file cannot be written.
pub fn save_to(name: &str, text: &str) -> Result<PathBuf, CurlyError> {
    let path = resolve_path(name);
    std::fs::write(&path, text).map_err(|e| {
        CurlyError::SaveError(format!(
            "Template file '{}' is not writable: {e}",
            path.display()
        ))
    })?;
    tracing::debug!(path = %path.display(), bytes = text.len(), "template saved");
    Ok(path)
}

/// Loads templates from one or more directories on the filesystem.
///
/// Absolute names are read directly. Relative names are looked up in each
/// directory in order; without directories they resolve against the
/// template path.
pub struct FileSystemLoader {
    dirs: Vec<PathBuf>,
}

impl FileSystemLoader {
    /// Creates a new `FileSystemLoader` with the given search directories.
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

impl TemplateLoader for FileSystemLoader {
    fn load(&self, name: &str) -> Result<String, CurlyError> {
        if is_absolute(name) || self.dirs.is_empty() {
            return load_file(name);
        }

        for dir in &self.dirs {
            let path = dir.join(name);
            if path.exists() {
                return read_file(&path);
            }
        }

        Err(CurlyError::LoadError(format!(
            "Template '{name}' not found in directories: {:?}",
            self.dirs
        )))
    }
}

/// Loads templates from an in-memory map of names to source strings.
pub struct StringLoader {
    templates: RwLock<HashMap<String, String>>,
}

impl StringLoader {
    /// Creates a new empty `StringLoader`.
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a `StringLoader` from a map of template names to source strings.
    pub fn from_map(templates: HashMap<String, String>) -> Self {
        Self {
            templates: RwLock::new(templates),
        }
    }

    /// Adds or replaces a template.
    pub fn add(&self, name: impl Into<String>, source: impl Into<String>) {
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), source.into());
    }
}

impl Default for StringLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateLoader for StringLoader {
    fn load(&self, name: &str) -> Result<String, CurlyError> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| CurlyError::LoadError(format!("Template '{name}' not found in StringLoader")))
    }
}
