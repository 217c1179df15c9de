//! The binding and substitution engine.
//!
//! A [`Template`] owns its document text, a persistent binding set built up
//! with [`Template::assign`], and a snapshot of the user filter registry.
//! Rendering works on a copy of the document:
//!
//! 1. one-shot bindings passed to [`Template::render_with`],
//! 2. the persistent bindings,
//! 3. `{{name??"default"}}` placeholders still left over get their default.
//!
//! Placeholders with nothing bound and no default stay in the output as-is.

use std::path::PathBuf;
use std::str::FromStr;

use curly_core::error::CurlyError;
use curly_core::logging::render_span;

use crate::context::{escape_html, Dict, Value};
use crate::filters::{apply_filters, FilterRegistry};
use crate::lexer;
use crate::loaders::{self, TemplateLoader};

const STRING_ORIGIN: &str = "<string>";

/// A loaded, normalized template.
///
/// # Examples
///
/// ```
/// use curly_template::Template;
/// use serde_json::json;
///
/// let mut tpl = Template::from_string("<p>{{ user.name }} ({{ age ?? 'n/a' }})</p>").unwrap();
/// tpl.assign(json!({"user": {"name": "Bob & Co"}})).unwrap();
///
/// assert_eq!(tpl.render().unwrap(), "<p>Bob &amp; Co (n/a)</p>");
/// assert_eq!(tpl.render_with(json!({"age": 42})).unwrap(), "<p>Bob &amp; Co (42)</p>");
/// ```
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    origin: String,
    assigned: Dict,
    filters: FilterRegistry,
}

impl Template {
    /// Creates a template from source text.
    ///
    /// The user filter registry is a snapshot of the global one.
    ///
    /// # Errors
    ///
    /// Returns `FormatError` naming the first malformed placeholder.
    pub fn from_string(text: impl Into<String>) -> Result<Self, CurlyError> {
        Self::build(&text.into(), STRING_ORIGIN)
    }

    /// Creates a template from a file. Relative names resolve against the
    /// template path (see [`loaders::set_template_path`]).
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if the file cannot be read, or `FormatError` for a
    /// malformed placeholder.
    pub fn from_file(name: &str) -> Result<Self, CurlyError> {
        let source = loaders::load_file(name)?;
        Self::build(&source, name)
    }

    /// Creates a template from any [`TemplateLoader`].
    pub fn from_loader(loader: &dyn TemplateLoader, name: &str) -> Result<Self, CurlyError> {
        let source = loader.load(name)?;
        Self::build(&source, name)
    }

    fn build(raw: &str, origin: &str) -> Result<Self, CurlyError> {
        let source = lexer::normalize(raw)?;
        tracing::debug!(origin, bytes = source.len(), "template loaded");
        Ok(Self {
            source,
            origin: origin.to_string(),
            assigned: Dict::new(),
            filters: FilterRegistry::from_global(),
        })
    }

    /// Replaces the document with new source text, keeping bindings and
    /// filters. On error the template is left unchanged.
    pub fn load_string(&mut self, text: &str) -> Result<&mut Self, CurlyError> {
        self.source = lexer::normalize(text)?;
        STRING_ORIGIN.clone_into(&mut self.origin);
        tracing::debug!(bytes = self.source.len(), "template reloaded from string");
        Ok(self)
    }

    /// Replaces the document with the contents of a file, keeping bindings
    /// and filters. On error the template is left unchanged.
    pub fn load_file(&mut self, name: &str) -> Result<&mut Self, CurlyError> {
        let raw = loaders::load_file(name)?;
        self.source = lexer::normalize(&raw)?;
        name.clone_into(&mut self.origin);
        Ok(self)
    }

    /// Returns the current document text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns where the document was loaded from (`<string>` for text).
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Writes the current document to a file and returns the path written.
    ///
    /// # Errors
    ///
    /// Returns `SaveError` if the file cannot be written.
    pub fn save(&self, name: &str) -> Result<PathBuf, CurlyError> {
        loaders::save_to(name, &self.source)
    }

    /// Lists the placeholders in the document, optionally only those for one
    /// binding key.
    pub fn placeholders(&self, name: &str) -> Vec<String> {
        lexer::find_placeholders(&self.source, name)
    }

    /// Returns the persistent bindings.
    pub fn assigned(&self) -> &Dict {
        &self.assigned
    }

    /// Returns this template's user filters.
    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    /// Registers a user filter on this template only.
    pub fn register_filter<F>(&mut self, name: impl Into<String>, filter: F) -> &mut Self
    where
        F: Fn(&Value, Option<&str>) -> Value + Send + Sync + 'static,
    {
        self.filters.register(name, filter);
        self
    }

    /// Merges bindings into the persistent set.
    ///
    /// Dicts merge key by key and recursively; lists merge by index.
    /// `Value::Null` clears the set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for scalars; the set is left unchanged.
    pub fn assign(&mut self, bindings: impl Into<Value>) -> Result<&mut Self, CurlyError> {
        match bindings.into() {
            Value::Null => self.assigned.clear(),
            value => {
                let dict = bindings_to_dict(value, "assign")?;
                self.assigned.merge(dict);
            }
        }
        Ok(self)
    }

    /// Clears the persistent bindings.
    pub fn clear_assigned(&mut self) -> &mut Self {
        self.assigned.clear();
        self
    }

    /// Substitutes bindings into the document itself.
    ///
    /// With `insert_before_placeholder`, each value is inserted in front of
    /// its placeholder, which stays in place for further calls.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for scalars and `FilterError` from the
    /// filter pipeline; the document is unchanged in both cases.
    pub fn assign_once(
        &mut self,
        bindings: impl Into<Value>,
        insert_before_placeholder: bool,
    ) -> Result<&mut Self, CurlyError> {
        let bindings = bindings_to_dict(bindings.into(), "assign_once")?;
        let mut doc = self.source.clone();
        substitute(&mut doc, &bindings, &self.filters, insert_before_placeholder)?;
        self.source = doc;
        Ok(self)
    }

    /// Renders the document with the persistent bindings.
    pub fn render(&self) -> Result<String, CurlyError> {
        self.render_bindings(None)
    }

    /// Renders the document with one-shot bindings applied before the
    /// persistent ones. The one-shot bindings are not kept.
    pub fn render_with(&self, bindings: impl Into<Value>) -> Result<String, CurlyError> {
        let one_shot = bindings_to_dict(bindings.into(), "render")?;
        self.render_bindings(Some(&one_shot))
    }

    fn render_bindings(&self, one_shot: Option<&Dict>) -> Result<String, CurlyError> {
        let span = render_span(&self.origin);
        let _guard = span.enter();

        let mut doc = self.source.clone();
        if let Some(bindings) = one_shot {
            substitute(&mut doc, bindings, &self.filters, false)?;
        }
        substitute(&mut doc, &self.assigned, &self.filters, false)?;
        let doc = replace_defaults(&doc);

        tracing::debug!(
            bytes = doc.len(),
            unresolved = lexer::find_placeholders(&doc, "").len(),
            "template rendered"
        );
        Ok(doc)
    }

    /// The document with its own persistent bindings applied and no defaults
    /// resolved. This is what a parent template splices in.
    fn resolved_text(&self) -> Result<String, CurlyError> {
        let mut doc = self.source.clone();
        substitute(&mut doc, &self.assigned, &self.filters, false)?;
        Ok(doc)
    }
}

impl FromStr for Template {
    type Err = CurlyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}

/// Renders `text` with `bindings` in one step.
///
/// ```
/// use curly_template::render_from_string;
/// use serde_json::json;
///
/// let html = render_from_string("Hi {{name|raw}}!", json!({"name": "<b>Al</b>"})).unwrap();
/// assert_eq!(html, "Hi <b>Al</b>!");
/// ```
pub fn render_from_string(text: &str, bindings: impl Into<Value>) -> Result<String, CurlyError> {
    Template::from_string(text)?.render_with(bindings)
}

fn bindings_to_dict(value: Value, operation: &str) -> Result<Dict, CurlyError> {
    match value {
        Value::Null => Ok(Dict::new()),
        Value::Dict(dict) => Ok(dict),
        list @ Value::List(_) => Ok(Dict::from_list(list)),
        other => Err(CurlyError::InvalidArgument(format!(
            "{operation} expects a dict, list or null, got {}",
            other.type_name()
        ))),
    }
}

/// Applies one binding set to `doc`.
fn substitute(
    doc: &mut String,
    bindings: &Dict,
    registry: &FilterRegistry,
    insert: bool,
) -> Result<(), CurlyError> {
    for (key, value) in bindings {
        if let Value::Template(sub) = value {
            let text = sub.resolved_text()?;
            *doc = replace_key_spans(doc, key, &text);
            continue;
        }
        if value.is_empty_collection() {
            continue;
        }

        for placeholder in lexer::find_placeholders(doc, key) {
            let Some(fraction) = lexer::split_placeholder(&placeholder) else {
                tracing::warn!(placeholder = %placeholder, "unparseable placeholder left in place");
                continue;
            };

            let resolved = match fraction.attr.as_deref() {
                Some(attr) => match value.get_attr(attr) {
                    Some(v) => v,
                    None => {
                        tracing::trace!(placeholder = %placeholder, "attribute not bound");
                        continue;
                    }
                },
                None => value,
            };
            if resolved.is_null() {
                continue;
            }

            let mut text = apply_filters(&fraction.filters, resolved, registry)?;
            if insert {
                text.push_str(&placeholder);
            }
            *doc = doc.replace(&placeholder, &text);
        }
    }
    Ok(())
}

/// Replaces every `{{key}}`, `{{key|...}}` and `{{key??...}}` with `text`.
fn replace_key_spans(doc: &str, key: &str, text: &str) -> String {
    let mut out = String::with_capacity(doc.len());
    let mut last = 0;
    for span in lexer::find_key_spans(doc, key) {
        out.push_str(&doc[last..span.start]);
        out.push_str(text);
        last = span.end;
    }
    out.push_str(&doc[last..]);
    out
}

/// Replaces placeholders carrying a quoted default with the escaped default.
fn replace_defaults(doc: &str) -> String {
    let mut out = String::with_capacity(doc.len());
    let mut last = 0;
    for found in lexer::find_defaults(doc) {
        out.push_str(&doc[last..found.span.start]);
        out.push_str(&escape_html(&found.literal));
        last = found.span.end;
    }
    out.push_str(&doc[last..]);
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::loaders::StringLoader;

    fn tpl(text: &str) -> Template {
        Template::from_string(text).unwrap()
    }

    // ── Loading ─────────────────────────────────────────────────────

    #[test]
    fn test_from_string_normalizes() {
        let t = tpl("<p>{{ name | raw ?? 'x y' }}</p>");
        assert_eq!(t.source(), "<p>{{name|raw??'x y'}}</p>");
        assert_eq!(t.origin(), "<string>");
    }

    #[test]
    fn test_from_str_format_error() {
        let err = "ok {{ !bad }}".parse::<Template>().unwrap_err();
        assert!(matches!(err, CurlyError::FormatError(ref p) if p == "{{ !bad }}"));
    }

    #[test]
    fn test_load_string_keeps_bindings() {
        let mut t = tpl("a");
        t.assign(json!({"x": 1})).unwrap();
        t.load_string("x={{x}}").unwrap();
        assert_eq!(t.render().unwrap(), "x=1");

        assert!(t.load_string("{{ ? }}").is_err());
        assert_eq!(t.source(), "x={{x}}");
    }

    #[test]
    fn test_from_loader() {
        let loader = StringLoader::new();
        loader.add("greet", "Hello {{ who }}");
        let t = Template::from_loader(&loader, "greet").unwrap();
        assert_eq!(t.origin(), "greet");
        assert_eq!(t.render_with(json!({"who": "you"})).unwrap(), "Hello you");
        assert!(Template::from_loader(&loader, "missing").is_err());
    }

    #[test]
    fn test_placeholders() {
        let t = tpl("{{a}} {{ b|raw }} {{a}} {{a.c}}");
        assert_eq!(t.placeholders(""), vec!["{{a}}", "{{b|raw}}", "{{a.c}}"]);
        assert_eq!(t.placeholders("a"), vec!["{{a}}", "{{a.c}}"]);
    }

    // ── Rendering ───────────────────────────────────────────────────

    #[test]
    fn test_render_without_placeholders_is_identity() {
        let text = "<html>\n  plain { text }\n</html>";
        assert_eq!(tpl(text).render().unwrap(), text);
    }

    #[test]
    fn test_scalar_escaped_unless_raw() {
        let t = tpl("{{k}}|{{k|raw}}|{{k|html}}");
        assert_eq!(
            t.render_with(json!({"k": "<i>"})).unwrap(),
            "&lt;i&gt;|<i>|<i>"
        );
    }

    #[test]
    fn test_scalar_kinds() {
        let t = tpl("[{{s}}][{{i}}][{{f}}][{{t}}][{{n}}]");
        let out = t
            .render_with(json!({"s": "x", "i": 3, "f": 1.5, "t": true, "n": false}))
            .unwrap();
        assert_eq!(out, "[x][3][1.5][1][]");
    }

    #[test]
    fn test_repeated_placeholder() {
        assert_eq!(tpl("{{a}}-{{a}}").render_with(json!({"a": 1})).unwrap(), "1-1");
    }

    #[test]
    fn test_defaults() {
        let t = tpl(r#"{{missing??"N/A"}} {{ok??'unused'}} {{m2??"<none>"}}"#);
        assert_eq!(
            t.render_with(json!({"ok": "yes"})).unwrap(),
            "N/A yes &lt;none&gt;"
        );
    }

    #[test]
    fn test_unresolved_without_default_stays() {
        assert_eq!(tpl("a {{b}} c").render().unwrap(), "a {{b}} c");
    }

    #[test]
    fn test_null_and_empty_collection_leave_placeholder() {
        let t = tpl("{{n}} {{e}} {{e2??'d'}}");
        let out = t.render_with(json!({"n": null, "e": [], "e2": {}})).unwrap();
        assert_eq!(out, "{{n}} {{e}} d");
    }

    #[test]
    fn test_attributes() {
        let t = tpl("{{user.name}} <{{user.email}}> {{items.1}}");
        let out = t
            .render_with(json!({"user": {"name": "Bob"}, "items": ["a", "b"]}))
            .unwrap();
        assert_eq!(out, "Bob <{{user.email}}> b");
    }

    #[test]
    fn test_attribute_on_scalar_is_skipped() {
        let t = tpl("{{x.y??'none'}}");
        assert_eq!(t.render_with(json!({"x": 5})).unwrap(), "none");
    }

    #[test]
    fn test_collection_without_attribute_is_json() {
        let t = tpl("{{list|raw}}");
        assert_eq!(t.render_with(json!({"list": [1, "a"]})).unwrap(), r#"[1,"a"]"#);
    }

    #[test]
    fn test_one_shot_before_persistent() {
        let mut t = tpl("{{x}}");
        t.assign(json!({"x": 1})).unwrap();
        assert_eq!(t.render_with(json!({"x": 2})).unwrap(), "2");
        assert_eq!(t.render().unwrap(), "1");
        assert_eq!(t.render().unwrap(), "1");
    }

    #[test]
    fn test_render_with_list_binds_indexes() {
        assert_eq!(tpl("{{0}}{{1}}").render_with(json!(["a", "b"])).unwrap(), "ab");
    }

    #[test]
    fn test_render_with_scalar_is_invalid() {
        let err = tpl("x").render_with("scalar").unwrap_err();
        assert!(matches!(err, CurlyError::InvalidArgument(_)));
    }

    #[test]
    fn test_filter_error_propagates() {
        let err = tpl("{{x|each('#val#')}}")
            .render_with(json!({"x": 5}))
            .unwrap_err();
        assert!(matches!(err, CurlyError::FilterError(_)));
    }

    // ── Persistent bindings ─────────────────────────────────────────

    #[test]
    fn test_assign_deep_merge() {
        let mut t = tpl("{{user.name}} {{user.age}}");
        t.assign(json!({"user": {"name": "A", "age": 3}})).unwrap();
        t.assign(json!({"user": {"name": "B"}})).unwrap();
        assert_eq!(t.render().unwrap(), "B 3");
        assert_eq!(t.assigned().len(), 1);
    }

    #[test]
    fn test_assign_null_resets() {
        let mut t = tpl("{{x??'-'}}");
        t.assign(json!({"x": 1})).unwrap();
        t.assign(Value::Null).unwrap();
        assert!(t.assigned().is_empty());
        assert_eq!(t.render().unwrap(), "-");

        t.assign(json!({"x": 2})).unwrap().clear_assigned();
        assert_eq!(t.render().unwrap(), "-");
    }

    #[test]
    fn test_assign_scalar_is_invalid() {
        let mut t = tpl("{{x}}");
        t.assign(json!({"x": 1})).unwrap();
        assert!(matches!(t.assign(5), Err(CurlyError::InvalidArgument(_))));
        assert!(matches!(t.assign("s"), Err(CurlyError::InvalidArgument(_))));
        assert_eq!(t.render().unwrap(), "1");
    }

    // ── In-place substitution ───────────────────────────────────────

    #[test]
    fn test_assign_once_mutates_document() {
        let mut t = tpl("{{a}} {{b}}");
        t.assign_once(json!({"a": "x"}), false).unwrap();
        assert_eq!(t.source(), "x {{b}}");
    }

    #[test]
    fn test_assign_once_insert_before_placeholder() {
        let mut t = tpl("<ul>{{row}}</ul>");
        t.assign_once(json!({"row": "<li>1</li>"}), true).unwrap();
        t.assign_once(json!({"row": "<li>2</li>"}), true).unwrap();
        assert_eq!(
            t.source(),
            "<ul>&lt;li&gt;1&lt;/li&gt;&lt;li&gt;2&lt;/li&gt;{{row}}</ul>"
        );
        t.assign_once(json!({"row": ""}), false).unwrap();
        assert_eq!(t.source(), "<ul>&lt;li&gt;1&lt;/li&gt;&lt;li&gt;2&lt;/li&gt;</ul>");
    }

    #[test]
    fn test_assign_once_errors_leave_document() {
        let mut t = tpl("{{a}} {{b|each('#val#')}}");
        assert!(matches!(
            t.assign_once(Value::from(1), false),
            Err(CurlyError::InvalidArgument(_))
        ));
        assert!(t.assign_once(json!({"a": 1, "b": 2}), false).is_err());
        assert_eq!(t.source(), "{{a}} {{b|each('#val#')}}");
    }

    // ── Sub-templates ───────────────────────────────────────────────

    #[test]
    fn test_sub_template_replaces_all_forms() {
        let mut inner = tpl("<b>{{v}}</b>");
        inner.assign(json!({"v": 1})).unwrap();

        let outer = tpl("{{body}} {{ body }} {{body|raw}} {{body??'x'}} {{body.attr}}");
        let out = outer.render_with(Dict::from_iter([("body", inner)])).unwrap();
        assert_eq!(out, "<b>1</b> <b>1</b> <b>1</b> <b>1</b> {{body.attr}}");
    }

    #[test]
    fn test_sub_template_defaults_resolved_by_parent() {
        let inner = tpl("[{{title??'untitled'}}]");
        let mut outer = tpl("{{content}}");
        outer.assign(Dict::from_iter([("content", inner)])).unwrap();
        assert_eq!(outer.render().unwrap(), "[untitled]");
        assert_eq!(
            outer.render_with(json!({"title": "T"})).unwrap(),
            "[untitled]"
        );
    }

    #[test]
    fn test_sub_template_inside_collection_renders() {
        let inner = tpl("<i>{{x??'d'}}</i>");
        let mut page = Dict::new();
        page.insert("card", inner);
        let outer = tpl("{{page.card|raw}}");
        let out = outer.render_with(Dict::from_iter([("page", page)])).unwrap();
        assert_eq!(out, "<i>d</i>");
    }

    #[test]
    fn test_sub_template_error_inside_collection_propagates() {
        let mut inner = tpl("<i>{{x|each('#val#')}}</i>");
        inner.assign(json!({"x": 5})).unwrap();
        let mut page = Dict::new();
        page.insert("card", inner.clone());

        let outer = tpl("{{page.card|raw}} {{page|each('#val#')}}");
        let err = outer
            .render_with(Dict::from_iter([("page", page)]))
            .unwrap_err();
        assert!(matches!(err, CurlyError::FilterError(_)));

        let direct = tpl("{{card}}").render_with(Dict::from_iter([("card", inner)]));
        assert!(matches!(direct, Err(CurlyError::FilterError(_))));
    }

    // ── Filters ─────────────────────────────────────────────────────

    #[test]
    fn test_instance_filter() {
        let mut t = tpl("{{name|shout}}");
        let before = t.clone();
        t.register_filter("shout", |v: &Value, _: Option<&str>| {
            Value::from(format!("{}!", v.to_display_string().to_uppercase()))
        });
        assert_eq!(t.render_with(json!({"name": "bob"})).unwrap(), "BOB!");
        assert_eq!(before.render_with(json!({"name": "bob"})).unwrap(), "bob");
        assert!(t.filters().contains("shout"));
    }

    #[test]
    fn test_pipeline_order() {
        let t = tpl(r#"{{x|abs|format("%.2f")}} {{x|format("%.2f")|abs}}"#);
        assert_eq!(t.render_with(json!({"x": -3.14159})).unwrap(), "3.14 3.14");
    }

    #[test]
    fn test_each_in_template() {
        let t = tpl(r##"{{items|each("#key#=#val#")}}"##);
        let out = t.render_with(json!({"items": {"a": 1, "b": 2}})).unwrap();
        assert_eq!(out, "a=1\nb=2");
    }

    // ── Files ───────────────────────────────────────────────────────

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.html");
        std::fs::write(&src, "<h1>{{ title }}</h1>").unwrap();

        let mut t = Template::from_file(src.to_str().unwrap()).unwrap();
        t.assign_once(json!({"title": "Hi"}), false).unwrap();

        let out = dir.path().join("out.html");
        t.save(out.to_str().unwrap()).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "<h1>Hi</h1>");

        let mut reloaded = tpl("");
        reloaded.load_file(out.to_str().unwrap()).unwrap();
        assert_eq!(reloaded.source(), "<h1>Hi</h1>");
    }

    #[test]
    fn test_from_file_missing() {
        let result = Template::from_file("/nonexistent/curly/missing.html");
        assert!(matches!(result, Err(CurlyError::LoadError(_))));
    }

    #[test]
    fn test_render_from_string() {
        let out = render_from_string("{{a}}+{{b??'0'}}", json!({"a": 1})).unwrap();
        assert_eq!(out, "1+0");
        assert!(render_from_string("{{ }}", Value::Null).is_err());
    }
}
