//! Values bound to template placeholders.
//!
//! Provides [`Value`], the tagged value model used by bindings and filters,
//! and [`Dict`], the insertion-ordered mapping behind collection values.

use std::borrow::Cow;
use std::fmt;

use curly_core::error::CurlyError;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::template::Template;

/// A dynamic value bound to a placeholder.
///
/// Scalars, ordered collections, and whole sub-templates share one type so
/// that attribute access and filters can inspect what they were given.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// The absence of a value. Never substituted.
    #[default]
    Null,
    /// A boolean. Renders as `"1"` or `""`.
    Bool(bool),
    /// A 64-bit integer.
    Integer(i64),
    /// A 64-bit floating point number.
    Float(f64),
    /// A string.
    String(String),
    /// An indexed collection. Attributes are decimal indices.
    List(Vec<Value>),
    /// An associative collection in insertion order.
    Dict(Dict),
    /// A nested template, spliced in verbatim once its own bindings are applied.
    Template(Box<Template>),
}

impl Value {
    /// Returns a short name for the variant, used in error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Template(_) => "template",
        }
    }

    /// Returns `true` for [`Value::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` for lists and dicts.
    pub const fn is_collection(&self) -> bool {
        matches!(self, Self::List(_) | Self::Dict(_))
    }

    /// Returns `true` for a list or dict without entries.
    ///
    /// An empty collection counts as "no value" when binding.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Self::List(l) => l.is_empty(),
            Self::Dict(d) => d.is_empty(),
            _ => false,
        }
    }

    /// Looks up one attribute level: a key on a dict, or an index on a list.
    pub fn get_attr(&self, attr: &str) -> Option<&Self> {
        match self {
            Self::Dict(map) => map.get(attr),
            Self::List(list) => attr.parse::<usize>().ok().and_then(|idx| list.get(idx)),
            _ => None,
        }
    }

    /// Iterates `(key, value)` pairs of a collection. List keys are indices.
    ///
    /// Returns `None` for anything that is not a collection.
    pub fn entries(&self) -> Option<Vec<(String, &Self)>> {
        match self {
            Self::List(list) => Some(
                list.iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v))
                    .collect(),
            ),
            Self::Dict(map) => Some(map.iter().map(|(k, v)| (k.to_string(), v)).collect()),
            _ => None,
        }
    }

    /// Replaces every nested template, at any depth, with its rendered text.
    ///
    /// Values without templates are borrowed unchanged.
    ///
    /// # Errors
    ///
    /// Propagates the first error raised while rendering a nested template.
    pub fn render_nested(&self) -> Result<Cow<'_, Self>, CurlyError> {
        if !self.contains_template() {
            return Ok(Cow::Borrowed(self));
        }
        let rendered = match self {
            Self::Template(tpl) => Self::String(tpl.render()?),
            Self::List(items) => Self::List(
                items
                    .iter()
                    .map(|item| item.render_nested().map(Cow::into_owned))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Dict(dict) => Self::Dict(
                dict.iter()
                    .map(|(key, item)| -> Result<(String, Self), CurlyError> {
                        Ok((key.to_string(), item.render_nested()?.into_owned()))
                    })
                    .collect::<Result<Dict, _>>()?,
            ),
            other => other.clone(),
        };
        Ok(Cow::Owned(rendered))
    }

    fn contains_template(&self) -> bool {
        match self {
            Self::Template(_) => true,
            Self::List(items) => items.iter().any(Self::contains_template),
            Self::Dict(dict) => dict.iter().any(|(_, item)| item.contains_template()),
            _ => false,
        }
    }

    /// Converts this value to the string inserted into the document
    /// (without HTML escaping).
    ///
    /// Nested templates that fail to render fall back to their source here;
    /// the filter pipeline resolves them first with [`Value::render_nested`].
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null | Self::Bool(false) => String::new(),
            Self::Bool(true) => "1".to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => format_float(*f),
            Self::String(s) => s.clone(),
            Self::List(_) | Self::Dict(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
            Self::Template(tpl) => tpl.render().unwrap_or_else(|err| {
                tracing::warn!(error = %err, "nested template failed to render, using its source");
                tpl.source().to_string()
            }),
        }
    }

    /// Returns `true` for integers, floats, and numeric strings.
    pub fn is_numeric(&self) -> bool {
        self.as_float().is_some()
    }

    /// Returns the numeric value, if this value is numeric.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::String(s) => parse_numeric(s),
            _ => None,
        }
    }

    /// Returns the integer value, if this value is an integer, an integral
    /// float, or a string holding one.
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::String(s) if s.trim().parse::<i64>().is_ok() => s.trim().parse().ok(),
            Self::Float(_) | Self::String(_) => {
                let f = self.as_float()?;
                (f.fract() == 0.0 && f.abs() < 9.0e15).then_some(f as i64)
            }
            _ => None,
        }
    }

    /// Coerces to an integer the permissive way: leading numeric prefix of a
    /// string, truncation of floats, `0` for everything unrecognizable.
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_integer_lossy(&self) -> i64 {
        match self {
            Self::Integer(i) => *i,
            Self::Float(f) => *f as i64,
            Self::Bool(b) => i64::from(*b),
            Self::String(s) => s
                .trim()
                .parse::<i64>()
                .unwrap_or_else(|_| numeric_prefix(s).map_or(0, |f| f as i64)),
            Self::List(l) => i64::from(!l.is_empty()),
            Self::Dict(d) => i64::from(!d.is_empty()),
            Self::Null | Self::Template(_) => 0,
        }
    }

    /// Coerces to a float the permissive way (see [`Value::to_integer_lossy`]).
    #[allow(clippy::cast_precision_loss)]
    pub fn to_float_lossy(&self) -> f64 {
        match self {
            Self::Float(f) => *f,
            Self::String(s) => numeric_prefix(s).unwrap_or(0.0),
            other => other.to_integer_lossy() as f64,
        }
    }

    /// Deep-merges `other` into this value, key by key.
    ///
    /// Collections merge recursively (lists by index); anything else is
    /// replaced by the incoming value.
    pub fn merge(&mut self, other: Self) {
        match (self, other) {
            (Self::Dict(base), Self::Dict(incoming)) => base.merge(incoming),
            (Self::List(base), Self::List(incoming)) => {
                for (idx, value) in incoming.into_iter().enumerate() {
                    match base.get_mut(idx) {
                        Some(slot) => slot.merge(value),
                        None => base.push(value),
                    }
                }
            }
            (base @ Self::List(_), incoming @ Self::Dict(_)) => {
                let mut dict = Self::Dict(Dict::from_list(std::mem::take(base)));
                dict.merge(incoming);
                *base = dict;
            }
            (Self::Dict(base), incoming @ Self::List(_)) => base.merge(Dict::from_list(incoming)),
            (slot, incoming) => *slot = incoming,
        }
    }
}

/// Renders floats the way loosely-typed template data expects: integral
/// values without a fractional part, everything else in shortest form.
fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NAN".to_string()
    } else if f.is_infinite() {
        let s = if f > 0.0 { "INF" } else { "-INF" };
        s.to_string()
    } else {
        f.to_string()
    }
}

/// Parses a string that is entirely numeric (surrounding whitespace allowed).
pub(crate) fn parse_numeric(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() || !t.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    if !t
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'+' | b'-' | b'e' | b'E'))
    {
        return None;
    }
    t.parse::<f64>().ok()
}

/// Parses the longest leading numeric prefix of a string (`"12abc"` -> 12).
fn numeric_prefix(s: &str) -> Option<f64> {
    let t = s.trim_start();
    let candidate = t
        .bytes()
        .take_while(|b| b.is_ascii_digit() || matches!(b, b'.' | b'+' | b'-' | b'e' | b'E'))
        .count();
    (1..=candidate).rev().find_map(|end| parse_numeric(&t[..end]))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl PartialEq for Value {
    #[allow(clippy::cast_precision_loss)]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Integer(a), Self::Float(b)) | (Self::Float(b), Self::Integer(a)) => {
                (*a as f64) == *b
            }
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Dict(a), Self::Dict(b)) => a == b,
            (Self::Template(a), Self::Template(b)) => a.source() == b.source(),
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Dict(dict) => {
                let mut map = serializer.serialize_map(Some(dict.len()))?;
                for (k, v) in dict {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Self::Template(_) => serializer.serialize_str(&self.to_display_string()),
        }
    }
}

/// An insertion-ordered string-keyed mapping.
///
/// Lookups are linear; binding sets are small and order matters more than
/// lookup speed (`each`, query strings, and positional `format` all follow it).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dict {
    entries: Vec<(String, Value)>,
}

impl Dict {
    /// Creates an empty dict.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Builds a dict from a list, keyed by index. Non-lists give an empty dict.
    pub fn from_list(value: Value) -> Self {
        match value {
            Value::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            Value::Dict(dict) => dict,
            _ => Self::new(),
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns a mutable reference to the value stored under `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Inserts a value, keeping the original position of an existing key.
    ///
    /// Returns the replaced value, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Deep-merges another dict into this one (see [`Value::merge`]).
    pub fn merge(&mut self, other: Self) {
        for (key, incoming) in other.entries {
            match self.get_mut(&key) {
                Some(existing) => existing.merge(incoming),
                None => self.entries.push((key, incoming)),
            }
        }
    }
}

impl<'a> IntoIterator for &'a Dict {
    type Item = (&'a str, &'a Value);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a Value)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

impl IntoIterator for Dict {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Dict {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dict = Self::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

// -- From implementations --

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<u64> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(i: u64) -> Self {
        i64::try_from(i).map_or_else(|_| Self::Float(i as f64), Self::Integer)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Self::from(i as u64)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Self::Float(f64::from(f))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Dict> for Value {
    fn from(d: Dict) -> Self {
        Self::Dict(d)
    }
}

impl From<Template> for Value {
    fn from(t: Template) -> Self {
        Self::Template(Box::new(t))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(o: Option<T>) -> Self {
        o.map_or(Self::Null, Into::into)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Dict(iter.into_iter().collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(arr) => Self::List(arr.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => map.into_iter().collect(),
        }
    }
}

/// Escapes HTML special characters in a string.
///
/// Replaces `&`, `<`, `>`, `"`, and `'` with their HTML entity equivalents.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(ch),
        }
    }
    out
}
