//! The filter pipeline.
//!
//! A placeholder's filters run left to right over the bound value. Built-in
//! filters are [`Filter`] implementations looked up by name; anything else
//! falls through to the caller's [`FilterRegistry`] of user functions, and
//! unknown names leave the value untouched. The final value is HTML-escaped
//! unless `html` or `raw` appeared in the chain.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use curly_core::error::CurlyError;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

use crate::context::{escape_html, Value};
use crate::{date, format};

/// Characters left alone by raw URL encoding (RFC 3986 unreserved).
const RAW_URL: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Characters left alone by form encoding; spaces become `+` separately.
const FORM_URL: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// A user-supplied filter: receives the current value and the argument, if
/// one was given.
pub type FilterFn = Arc<dyn Fn(&Value, Option<&str>) -> Value + Send + Sync>;

/// One parsed pipeline step: `name` or `name(arg)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCall {
    pub name: String,
    /// The argument with surrounding quote characters trimmed. Empty
    /// arguments are `None`.
    pub arg: Option<String>,
}

impl FilterCall {
    /// Parses a filter string. Returns `None` if the name is not a word.
    pub fn parse(text: &str) -> Option<Self> {
        static CALL: OnceLock<Option<Regex>> = OnceLock::new();
        let re = CALL
            .get_or_init(|| Regex::new(r"^(\w+)(?:\((.*)\))?$").ok())
            .as_ref()?;
        let caps = re.captures(text)?;
        let arg = caps
            .get(2)
            .map(|m| m.as_str().trim_matches(|c| c == '\'' || c == '"'))
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        Some(Self {
            name: caps[1].to_string(),
            arg,
        })
    }
}

/// Escaping policy threaded through one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterState {
    pub escape: bool,
}

impl Default for FilterState {
    fn default() -> Self {
        Self { escape: true }
    }
}

/// A built-in template filter.
pub trait Filter: Send + Sync {
    /// Returns the filter name.
    fn name(&self) -> &'static str;

    /// Applies the filter to a value with its optional argument.
    fn apply(
        &self,
        value: &Value,
        arg: Option<&str>,
        state: &mut FilterState,
    ) -> Result<Value, CurlyError>;
}

/// The table of built-in filters.
pub struct BuiltinFilters {
    filters: HashMap<&'static str, Box<dyn Filter>>,
}

impl BuiltinFilters {
    fn new() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    fn register(&mut self, filter: Box<dyn Filter>) {
        self.filters.insert(filter.name(), filter);
    }

    /// Looks up a built-in by name. Any name starting with `url` selects the
    /// URL filter.
    pub fn get(&self, name: &str) -> Option<&dyn Filter> {
        self.filters
            .get(name)
            .or_else(|| {
                if name.starts_with("url") {
                    self.filters.get("url")
                } else {
                    None
                }
            })
            .map(|filter| filter.as_ref())
    }

    /// Returns `true` if `name` resolves to a built-in.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Returns the built-in filter table.
pub fn builtins() -> &'static BuiltinFilters {
    static BUILTINS: OnceLock<BuiltinFilters> = OnceLock::new();
    BUILTINS.get_or_init(|| {
        let mut r = BuiltinFilters::new();
        register_all(&mut r);
        r
    })
}

fn register_all(r: &mut BuiltinFilters) {
    // Escaping
    r.register(Box::new(RawFilter { name: "html" }));
    r.register(Box::new(RawFilter { name: "raw" }));
    r.register(Box::new(UrlFilter));

    // Formatting
    r.register(Box::new(FormatFilter));
    r.register(Box::new(DateFilter));
    r.register(Box::new(AbsFilter));

    // Form helpers
    r.register(Box::new(MarkFilter { name: "selected" }));
    r.register(Box::new(MarkFilter { name: "checked" }));

    // Choice
    r.register(Box::new(BlankFilter));
    r.register(Box::new(SetFilter));
    r.register(Box::new(CaseFilter));
    r.register(Box::new(SignFilter));

    // Collections
    r.register(Box::new(EachFilter));
}

// ============================================================
// User filters
// ============================================================

/// A table of user filters.
///
/// Each template owns one, snapshotted from the global table when the
/// template is created.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, FilterFn>,
}

impl FilterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the current contents of the global registry.
    pub fn from_global() -> Self {
        global_registry()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Registers `filter` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&Value, Option<&str>) -> Value + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
    }

    pub fn get(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FilterRegistry")
            .field("filters", &names)
            .finish()
    }
}

/// Returns the process-wide user filter registry.
pub fn global_registry() -> &'static RwLock<FilterRegistry> {
    static GLOBAL: OnceLock<RwLock<FilterRegistry>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(FilterRegistry::new()))
}

/// Registers a user filter for every template created from now on.
///
/// Existing templates keep the registry they were created with.
pub fn register_global_filter<F>(name: impl Into<String>, filter: F)
where
    F: Fn(&Value, Option<&str>) -> Value + Send + Sync + 'static,
{
    global_registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(name, filter);
}

// ============================================================
// Pipeline
// ============================================================

/// Runs `value` through `filters` and returns the text to insert.
///
/// # Errors
///
/// Returns a `FilterError` when a filter's precondition fails, e.g. `each`
/// on a scalar or `format` with too few arguments.
pub fn apply_filters(
    filters: &[String],
    value: &Value,
    registry: &FilterRegistry,
) -> Result<String, CurlyError> {
    let mut state = FilterState::default();
    let mut current = value.render_nested()?.into_owned();

    for text in filters {
        let Some(call) = FilterCall::parse(text) else {
            tracing::trace!(filter = %text, "skipping malformed filter");
            continue;
        };
        let arg = call.arg.as_deref();

        current = if let Some(filter) = builtins().get(&call.name) {
            filter.apply(&current, arg, &mut state)?
        } else if let Some(user) = registry.get(&call.name) {
            user(&current, arg).render_nested()?.into_owned()
        } else {
            tracing::trace!(filter = %call.name, "unknown filter, value passed through");
            current
        };
    }

    let text = current.to_display_string();
    Ok(if state.escape { escape_html(&text) } else { text })
}

// ============================================================
// Escaping and URLs
// ============================================================

struct RawFilter {
    name: &'static str,
}
impl Filter for RawFilter {
    fn name(&self) -> &'static str {
        self.name
    }
    fn apply(
        &self,
        value: &Value,
        _arg: Option<&str>,
        state: &mut FilterState,
    ) -> Result<Value, CurlyError> {
        state.escape = false;
        Ok(value.clone())
    }
}

struct UrlFilter;
impl Filter for UrlFilter {
    fn name(&self) -> &'static str {
        "url"
    }
    fn apply(
        &self,
        value: &Value,
        _arg: Option<&str>,
        _state: &mut FilterState,
    ) -> Result<Value, CurlyError> {
        let encoded = if value.is_collection() {
            build_query(value)
        } else {
            utf8_percent_encode(&value.to_display_string(), RAW_URL).to_string()
        };
        Ok(Value::String(encoded))
    }
}

fn form_encode(s: &str) -> String {
    utf8_percent_encode(s, FORM_URL)
        .to_string()
        .replace("%20", "+")
}

/// Serializes a collection as an `application/x-www-form-urlencoded` query.
fn build_query(value: &Value) -> String {
    let mut pairs = Vec::new();
    for (key, item) in value.entries().unwrap_or_default() {
        push_query_pairs(&mut pairs, &form_encode(&key), item);
    }
    pairs.join("&")
}

fn push_query_pairs(pairs: &mut Vec<String>, prefix: &str, value: &Value) {
    match value {
        Value::Null => {}
        Value::List(_) | Value::Dict(_) => {
            for (key, item) in value.entries().unwrap_or_default() {
                let nested = format!("{prefix}%5B{}%5D", form_encode(&key));
                push_query_pairs(pairs, &nested, item);
            }
        }
        Value::Bool(b) => pairs.push(format!("{prefix}={}", u8::from(*b))),
        other => pairs.push(format!("{prefix}={}", form_encode(&other.to_display_string()))),
    }
}

// ============================================================
// Formatting
// ============================================================

struct FormatFilter;
impl Filter for FormatFilter {
    fn name(&self) -> &'static str {
        "format"
    }
    fn apply(
        &self,
        value: &Value,
        arg: Option<&str>,
        _state: &mut FilterState,
    ) -> Result<Value, CurlyError> {
        let Some(fmt) = arg else {
            return Ok(value.clone());
        };
        let args: Vec<Value> = match value.entries() {
            Some(entries) => entries.into_iter().map(|(_, v)| v.clone()).collect(),
            None => vec![value.clone()],
        };
        format::sprintf(fmt, &args).map(Value::String)
    }
}

struct DateFilter;
impl Filter for DateFilter {
    fn name(&self) -> &'static str {
        "date"
    }
    fn apply(
        &self,
        value: &Value,
        arg: Option<&str>,
        _state: &mut FilterState,
    ) -> Result<Value, CurlyError> {
        let Some(fmt) = arg else {
            return Ok(value.clone());
        };
        Ok(date::format_value(value, fmt).map_or_else(|| value.clone(), Value::String))
    }
}

struct AbsFilter;
impl Filter for AbsFilter {
    fn name(&self) -> &'static str {
        "abs"
    }
    fn apply(
        &self,
        value: &Value,
        _arg: Option<&str>,
        _state: &mut FilterState,
    ) -> Result<Value, CurlyError> {
        let abs = match value {
            Value::Integer(i) => abs_integer(*i),
            Value::Float(f) => Value::Float(f.abs()),
            Value::String(s) if value.is_numeric() => match s.trim().parse::<i64>() {
                Ok(i) => abs_integer(i),
                Err(_) => value
                    .as_float()
                    .map_or_else(|| value.clone(), |f| Value::Float(f.abs())),
            },
            other => other.clone(),
        };
        Ok(abs)
    }
}

/// `i64::MIN` has no `i64` absolute value; it is kept exact as a string.
fn abs_integer(i: i64) -> Value {
    i.checked_abs().map_or_else(
        || Value::String(i.unsigned_abs().to_string()),
        Value::Integer,
    )
}

// ============================================================
// Form helpers
// ============================================================

/// `selected` / `checked`: emits its own name when the value matches.
struct MarkFilter {
    name: &'static str,
}
impl Filter for MarkFilter {
    fn name(&self) -> &'static str {
        self.name
    }
    fn apply(
        &self,
        value: &Value,
        arg: Option<&str>,
        _state: &mut FilterState,
    ) -> Result<Value, CurlyError> {
        let hit = arg.map_or(true, |expected| value.to_display_string() == expected);
        Ok(Value::String(if hit { self.name } else { "" }.to_string()))
    }
}

// ============================================================
// Choice
// ============================================================

struct BlankFilter;
impl Filter for BlankFilter {
    fn name(&self) -> &'static str {
        "blank"
    }
    fn apply(
        &self,
        _value: &Value,
        _arg: Option<&str>,
        _state: &mut FilterState,
    ) -> Result<Value, CurlyError> {
        Ok(Value::String(String::new()))
    }
}

struct SetFilter;
impl Filter for SetFilter {
    fn name(&self) -> &'static str {
        "set"
    }
    fn apply(
        &self,
        value: &Value,
        arg: Option<&str>,
        _state: &mut FilterState,
    ) -> Result<Value, CurlyError> {
        let Some(text) = arg else {
            return Ok(value.clone());
        };
        let out = if value.to_display_string().is_empty() {
            ""
        } else {
            text
        };
        Ok(Value::from(out))
    }
}

/// Splits a choice list: the first character is the delimiter for the rest,
/// so `",a,b"` is `[a, b]`.
fn choice_list(arg: &str) -> Vec<&str> {
    let mut chars = arg.chars();
    match chars.next() {
        Some(delimiter) => chars.as_str().split(delimiter).collect(),
        None => Vec::new(),
    }
}

fn pick(list: &[&str], index: Option<usize>) -> Value {
    Value::from(index.and_then(|i| list.get(i)).copied().unwrap_or(""))
}

struct CaseFilter;
impl Filter for CaseFilter {
    fn name(&self) -> &'static str {
        "case"
    }
    fn apply(
        &self,
        value: &Value,
        arg: Option<&str>,
        _state: &mut FilterState,
    ) -> Result<Value, CurlyError> {
        let Some(arg) = arg else {
            return Ok(value.clone());
        };
        let index = value.as_integer().and_then(|i| usize::try_from(i).ok());
        Ok(pick(&choice_list(arg), index))
    }
}

struct SignFilter;
impl Filter for SignFilter {
    fn name(&self) -> &'static str {
        "sign"
    }
    fn apply(
        &self,
        value: &Value,
        arg: Option<&str>,
        _state: &mut FilterState,
    ) -> Result<Value, CurlyError> {
        let Some(arg) = arg else {
            return Ok(value.clone());
        };
        let index = value.as_float().filter(|f| !f.is_nan()).map(|f| {
            if f < 0.0 {
                0
            } else if f == 0.0 {
                1
            } else {
                2
            }
        });
        Ok(pick(&choice_list(arg), index))
    }
}

// ============================================================
// Collections
// ============================================================

struct EachFilter;
impl Filter for EachFilter {
    fn name(&self) -> &'static str {
        "each"
    }
    fn apply(
        &self,
        value: &Value,
        arg: Option<&str>,
        _state: &mut FilterState,
    ) -> Result<Value, CurlyError> {
        let Some(row) = arg else {
            return Ok(value.clone());
        };
        let entries = value.entries().ok_or_else(|| {
            CurlyError::FilterError(format!(
                "each expects a list or dict, got {}",
                value.type_name()
            ))
        })?;

        let lines: Vec<String> = entries
            .into_iter()
            .map(|(key, item)| {
                fill_row(row, &escape_html(&key), &escape_html(&item.to_display_string()))
            })
            .collect();
        Ok(Value::String(lines.join("\n").trim_end().to_string()))
    }
}

/// Replaces `#key#` and `#val#` in one left-to-right pass.
fn fill_row(row: &str, key: &str, val: &str) -> String {
    let mut out = String::with_capacity(row.len() + key.len() + val.len());
    let mut rest = row;
    while let Some(pos) = rest.find('#') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("#key#") {
            out.push_str(key);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("#val#") {
            out.push_str(val);
            rest = after;
        } else {
            out.push('#');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
