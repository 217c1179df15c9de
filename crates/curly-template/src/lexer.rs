//! Placeholder grammar.
//!
//! Finds `{{ ... }}` placeholders in template text, compresses their
//! whitespace, validates their shape, and splits them into a [`Fraction`]:
//! the name path, the filter pipeline, and the optional default.
//!
//! Everything here is a hand-written scanner over the text. A placeholder
//! body runs from `{{` to the first `}`, which must be immediately followed
//! by a second `}`.

use std::ops::Range;

use curly_core::error::CurlyError;

/// Opening placeholder delimiter.
pub const OPEN: &str = "{{";
/// Closing placeholder delimiter.
pub const CLOSE: &str = "}}";

/// A placeholder split into its components.
///
/// `{{user.name|format("%5s")|raw??"nobody"}}` splits into key `user`,
/// attribute `name`, filters `format("%5s")` and `raw`, and default `nobody`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fraction {
    /// The binding key (first path segment).
    pub key: String,
    /// The attribute looked up on the bound collection (second path segment).
    pub attr: Option<String>,
    /// Filter calls in application order, e.g. `format("%3d")`.
    pub filters: Vec<String>,
    /// The default with its quotes stripped.
    pub default: Option<String>,
}

impl Fraction {
    /// Returns the name path: `[key]` or `[key, attr]`.
    pub fn path(&self) -> Vec<&str> {
        let mut path = vec![self.key.as_str()];
        if let Some(attr) = &self.attr {
            path.push(attr);
        }
        path
    }

    /// Rebuilds canonical placeholder text from this fraction.
    pub fn to_placeholder(&self) -> String {
        let mut out = String::from(OPEN);
        out.push_str(&self.key);
        if let Some(attr) = &self.attr {
            out.push('.');
            out.push_str(attr);
        }
        for filter in &self.filters {
            out.push('|');
            out.push_str(filter);
        }
        if let Some(default) = &self.default {
            out.push_str("??\"");
            out.push_str(default);
            out.push('"');
        }
        out.push_str(CLOSE);
        out
    }
}

/// Returns the byte ranges of every placeholder in `text`, delimiters included.
fn scan(text: &str) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find(OPEN) {
        let start = pos + offset;
        let body = start + OPEN.len();
        let Some(rel) = text[body..].find('}') else {
            break;
        };
        let close = body + rel;
        if rel > 0 && bytes.get(close + 1) == Some(&b'}') {
            spans.push(start..close + 2);
            pos = close + 2;
        } else {
            // Every opener before `close` runs into the same lone `}`.
            pos = close + 1;
        }
    }

    spans
}

/// Matches `{{ ?NAME([. |?][^}]*)?}}` at `start`, returning the end offset.
fn match_named_at(text: &str, start: usize, name: &str) -> Option<usize> {
    let mut rest = text[start..].strip_prefix(OPEN)?;
    rest = rest.strip_prefix(' ').unwrap_or(rest);
    rest = rest.strip_prefix(name)?;

    let tail = if rest.starts_with(CLOSE) {
        0
    } else {
        let first = rest.chars().next()?;
        if !matches!(first, '.' | ' ' | '|' | '?') {
            return None;
        }
        let body = rest.find('}')?;
        if !rest[body..].starts_with(CLOSE) {
            return None;
        }
        body
    };

    let consumed = text.len() - start - rest.len();
    Some(start + consumed + tail + CLOSE.len())
}

/// Returns the literal placeholders in `text`, deduplicated, in order of
/// first occurrence.
///
/// With a non-empty `name`, only placeholders whose leading identifier equals
/// `name` are returned (optionally followed by `.attr`, filters, or a default).
pub fn find_placeholders(text: &str, name: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut push = |s: &str| {
        if !found.iter().any(|f| f == s) {
            found.push(s.to_string());
        }
    };

    if name.is_empty() {
        for span in scan(text) {
            push(&text[span]);
        }
        return found;
    }

    let mut pos = 0;
    while let Some(offset) = text[pos..].find(OPEN) {
        let start = pos + offset;
        if let Some(end) = match_named_at(text, start, name) {
            push(&text[start..end]);
            pos = end;
        } else {
            pos = start + 1;
        }
    }
    found
}

/// Returns the byte ranges of placeholders that a nested template bound to
/// `key` replaces: `{{key}}`, `{{key|...}}` and `{{key??...}}`, with one
/// optional space after the key and after `{{`. Attribute forms are excluded.
pub fn find_key_spans(text: &str, key: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut pos = 0;
    while let Some(offset) = text[pos..].find(OPEN) {
        let start = pos + offset;
        match match_key_at(text, start, key) {
            Some(end) => {
                spans.push(start..end);
                pos = end;
            }
            None => pos = start + 1,
        }
    }
    spans
}

fn match_key_at(text: &str, start: usize, key: &str) -> Option<usize> {
    let mut rest = text[start..].strip_prefix(OPEN)?;
    rest = rest.strip_prefix(' ').unwrap_or(rest);
    rest = rest.strip_prefix(key)?;
    rest = rest.strip_prefix(' ').unwrap_or(rest);

    let tail = if rest.starts_with(CLOSE) {
        0
    } else {
        if !rest.starts_with(['|', '?']) {
            return None;
        }
        let body = rest.find('}')?;
        if body < 2 || !rest[body..].starts_with(CLOSE) {
            return None;
        }
        body
    };

    let consumed = text.len() - start - rest.len();
    Some(start + consumed + tail + CLOSE.len())
}

/// A `{{name??"literal"}}` placeholder still present after binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultMatch {
    /// Byte range of the whole placeholder.
    pub span: Range<usize>,
    /// The literal between the quotes.
    pub literal: String,
}

/// Finds placeholders that carry a quoted default.
///
/// The text before `??` must be free of `?`, `{` and `}`. The literal runs
/// from the opening quote to the first matching quote that is directly
/// followed by `}}`, and may not span lines.
pub fn find_defaults(text: &str) -> Vec<DefaultMatch> {
    let mut matches = Vec::new();
    let mut pos = 0;
    while let Some(offset) = text[pos..].find(OPEN) {
        let start = pos + offset;
        match match_default_at(text, start) {
            Some(found) => {
                pos = found.span.end;
                matches.push(found);
            }
            None => pos = start + 1,
        }
    }
    matches
}

fn match_default_at(text: &str, start: usize) -> Option<DefaultMatch> {
    let head_start = start + OPEN.len();
    let head_len = text[head_start..]
        .find(['?', '{', '}'])
        .unwrap_or(text.len() - head_start);
    if head_len == 0 {
        return None;
    }

    let marker = head_start + head_len;
    let after = text[marker..].strip_prefix("??")?;
    let quote = after.chars().next().filter(|c| matches!(c, '"' | '\''))?;

    let literal_start = marker + 2 + quote.len_utf8();
    let first = text[literal_start..].chars().next()?;
    let search_from = literal_start + first.len_utf8();

    let mut closer = String::with_capacity(3);
    closer.push(quote);
    closer.push_str(CLOSE);
    let literal_end = search_from + text[search_from..].find(&closer)?;

    let literal = &text[literal_start..literal_end];
    if literal.contains('\n') {
        return None;
    }

    Some(DefaultMatch {
        span: start..literal_end + closer.len(),
        literal: literal.to_string(),
    })
}

/// Horizontal whitespace, as stripped from placeholders at load time.
const fn is_horizontal_space(c: char) -> bool {
    matches!(
        c,
        '\t' | ' '
            | '\u{a0}'
            | '\u{1680}'
            | '\u{180e}'
            | '\u{2000}'..='\u{200a}'
            | '\u{202f}'
            | '\u{205f}'
            | '\u{3000}'
    )
}

/// Returns the index of the quote closing the one at `open`, honoring
/// backslash escapes. Quoted runs never span lines.
fn closing_quote(chars: &[char], open: usize) -> Option<usize> {
    let quote = chars[open];
    let mut i = open + 1;
    while i < chars.len() {
        match chars[i] {
            '\n' => return None,
            '\\' => {
                if chars.get(i + 1).is_some_and(|c| *c != '\n') {
                    i += 2;
                } else {
                    return None;
                }
            }
            c if c == quote => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Returns `true` if the quote at `i` opens a quoted run (it is not escaped).
fn opens_quote(chars: &[char], i: usize) -> bool {
    matches!(chars[i], '"' | '\'') && (i == 0 || chars[i - 1] != '\\')
}

/// Removes horizontal whitespace outside single- and double-quoted runs.
pub fn compress_whitespace(placeholder: &str) -> String {
    let chars: Vec<char> = placeholder.chars().collect();
    let mut out = String::with_capacity(placeholder.len());
    let mut i = 0;

    while i < chars.len() {
        if opens_quote(&chars, i) {
            if let Some(end) = closing_quote(&chars, i) {
                out.extend(&chars[i..=end]);
                i = end + 1;
                continue;
            }
        }
        if !is_horizontal_space(chars[i]) {
            out.push(chars[i]);
        }
        i += 1;
    }

    out
}

/// Checks the compressed shape: `{{`, an identifier, optional trailing
/// content on the same line, `}}`.
fn is_well_formed(compressed: &str) -> bool {
    let Some(body) = compressed
        .strip_prefix(OPEN)
        .and_then(|s| s.strip_suffix(CLOSE))
    else {
        return false;
    };
    body.bytes()
        .next()
        .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        && !body.contains('\n')
}

/// Compresses every placeholder in `raw` and validates its shape.
///
/// # Errors
///
/// Returns a `FormatError` carrying the first placeholder that does not
/// start with an identifier once its whitespace is removed.
pub fn normalize(raw: &str) -> Result<String, CurlyError> {
    let mut text = raw.to_string();
    for placeholder in find_placeholders(raw, "") {
        let compressed = compress_whitespace(&placeholder);
        if !is_well_formed(&compressed) {
            return Err(CurlyError::FormatError(placeholder));
        }
        if compressed != placeholder {
            text = text.replace(&placeholder, &compressed);
        }
    }
    Ok(text)
}

/// Splits `text` on `sep` wherever it occurs outside a quoted run.
fn split_outside_quotes(text: &str, sep: char) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        if opens_quote(&chars, i) {
            if let Some(end) = closing_quote(&chars, i) {
                current.extend(&chars[i..=end]);
                i = end + 1;
                continue;
            }
        }
        if chars[i] == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(chars[i]);
        }
        i += 1;
    }
    parts.push(current);
    parts
}

/// Finds the byte offset of the first `??` outside a quoted run that has at
/// least one character after it.
fn find_default_marker(text: &str) -> Option<usize> {
    let offsets: Vec<usize> = text.char_indices().map(|(at, _)| at).collect();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if opens_quote(&chars, i) {
            if let Some(end) = closing_quote(&chars, i) {
                i = end + 1;
                continue;
            }
        }
        if chars[i] == '?' && chars.get(i + 1) == Some(&'?') && i + 2 < chars.len() {
            return Some(offsets[i]);
        }
        i += 1;
    }
    None
}

/// Strips one pair of matching surrounding quotes: `'abc'` and `"abc"` become
/// `abc`; mismatched quotes are left alone.
pub fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2 && !s.contains('\n') {
        for quote in ['\'', '"'] {
            if let Some(inner) = s.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
                return inner;
            }
        }
    }
    s
}

/// Splits a placeholder into name path, filters, and default.
///
/// Accepts the text with or without its `{{`/`}}` delimiters. Returns `None`
/// when the text is not `name(|filter...)?(??default)?`.
pub fn split_placeholder(placeholder: &str) -> Option<Fraction> {
    let inner = placeholder.trim_start_matches('{').trim_end_matches('}');
    if inner.contains('\n') {
        return None;
    }

    let name_len = inner
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.'))
        .count();
    if name_len == 0 {
        return None;
    }
    let (name, rest) = inner.split_at(name_len);

    let (filter_part, default) = match find_default_marker(rest) {
        Some(marker) => (&rest[..marker], Some(strip_quotes(&rest[marker + 2..]))),
        None => (rest, None),
    };

    let filters = if filter_part.is_empty() {
        Vec::new()
    } else {
        if !filter_part.starts_with('|') || filter_part.len() < 2 {
            return None;
        }
        split_outside_quotes(filter_part.trim_matches('|'), '|')
            .into_iter()
            .filter(|f| !f.is_empty())
            .collect()
    };

    let (key, attr) = match name.split_once('.') {
        Some((key, attr)) => (key.to_string(), Some(attr.to_string())),
        None => (name.to_string(), None),
    };

    Some(Fraction {
        key,
        attr,
        filters,
        default: default.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Discovery ───────────────────────────────────────────────────

    #[test]
    fn test_find_all_placeholders() {
        let text = "Hi {{ name }}, {{age|format('%d')}} and {{name}} {{ name }}";
        assert_eq!(
            find_placeholders(text, ""),
            vec!["{{ name }}", "{{age|format('%d')}}", "{{name}}"]
        );
    }

    #[test]
    fn test_find_placeholders_by_name() {
        let text = "{{name}} {{names}} {{name.first}} {{name|raw}} {{name??'x'}} {{ name }} {{other}}";
        assert_eq!(
            find_placeholders(text, "name"),
            vec![
                "{{name}}",
                "{{name.first}}",
                "{{name|raw}}",
                "{{name??'x'}}",
                "{{ name }}"
            ]
        );
    }

    #[test]
    fn test_find_placeholders_none() {
        assert!(find_placeholders("no tags { here } {{}}", "").is_empty());
        assert!(find_placeholders("{{unclosed", "").is_empty());
    }

    #[test]
    fn test_scan_lone_closing_brace() {
        assert_eq!(find_placeholders("{{a}b}} {{c}}", ""), vec!["{{c}}"]);
        assert_eq!(find_placeholders("{{{x}}", ""), vec!["{{{x}}"]);
    }

    #[test]
    fn test_placeholder_spans_lines() {
        assert_eq!(find_placeholders("{{a\n}}", ""), vec!["{{a\n}}"]);
    }

    #[test]
    fn test_find_key_spans() {
        let text = "{{body}} {{ body }} {{body|raw}} {{body??'-'}} {{body.x}} {{bodyx}}";
        let spans = find_key_spans(text, "body");
        let found: Vec<&str> = spans.iter().map(|s| &text[s.clone()]).collect();
        assert_eq!(
            found,
            vec!["{{body}}", "{{ body }}", "{{body|raw}}", "{{body??'-'}}"]
        );
    }

    // ── Normalization ───────────────────────────────────────────────

    #[test]
    fn test_normalize_strips_whitespace() {
        let out = normalize("A {{ name | format( \"%5s\" ) ?? 'a b' }} B").unwrap();
        assert_eq!(out, "A {{name|format(\"%5s\")??'a b'}} B");
    }

    #[test]
    fn test_normalize_preserves_escaped_quotes() {
        let out = normalize(r#"{{ x ?? "say \"hi there\"" }}"#).unwrap();
        assert_eq!(out, r#"{{x??"say \"hi there\""}}"#);
    }

    #[test]
    fn test_normalize_unclosed_quote_is_plain() {
        let out = normalize("{{ x|f(\"a b) }}").unwrap();
        assert_eq!(out, "{{x|f(\"ab)}}");
    }

    #[test]
    fn test_normalize_format_error() {
        let err = normalize("ok {{ 1 }} {{ -bad }}").unwrap_err();
        match err {
            CurlyError::FormatError(p) => assert_eq!(p, "{{ -bad }}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_normalize_rejects_multiline() {
        assert!(matches!(
            normalize("{{a\n}}"),
            Err(CurlyError::FormatError(_))
        ));
    }

    #[test]
    fn test_normalize_tabs() {
        assert_eq!(normalize("{{\tname\t}}").unwrap(), "{{name}}");
    }

    #[test]
    fn test_normalize_no_placeholders_identity() {
        let text = "plain { text } with braces";
        assert_eq!(normalize(text).unwrap(), text);
    }

    // ── Splitting ───────────────────────────────────────────────────

    #[test]
    fn test_split_simple() {
        let f = split_placeholder("{{name}}").unwrap();
        assert_eq!(f.key, "name");
        assert!(f.attr.is_none());
        assert!(f.filters.is_empty());
        assert!(f.default.is_none());
        assert_eq!(f.path(), vec!["name"]);
    }

    #[test]
    fn test_split_full() {
        let f = split_placeholder(r#"{{foo.bar|format("%3d")|html??"default val"}}"#).unwrap();
        assert_eq!(f.path(), vec!["foo", "bar"]);
        assert_eq!(f.filters, vec![r#"format("%3d")"#, "html"]);
        assert_eq!(f.default.as_deref(), Some("default val"));
    }

    #[test]
    fn test_split_default_only() {
        let f = split_placeholder("{{missing??'N/A'}}").unwrap();
        assert!(f.filters.is_empty());
        assert_eq!(f.default.as_deref(), Some("N/A"));
    }

    #[test]
    fn test_split_attr_on_first_dot() {
        let f = split_placeholder("{{a.b.c}}").unwrap();
        assert_eq!(f.key, "a");
        assert_eq!(f.attr.as_deref(), Some("b.c"));
    }

    #[test]
    fn test_split_quote_aware_pipes() {
        let f = split_placeholder(r#"{{x|each("a|b??c")|raw}}"#).unwrap();
        assert_eq!(f.filters, vec![r#"each("a|b??c")"#, "raw"]);
        assert!(f.default.is_none());
    }

    #[test]
    fn test_split_invalid() {
        assert!(split_placeholder("{{name#x}}").is_none());
        assert!(split_placeholder("{{-x}}").is_none());
        assert!(split_placeholder("{{x|}}").is_none());
        assert!(split_placeholder("{{ x}}").is_none());
    }

    #[test]
    fn test_split_round_trip() {
        for raw in [
            "{{ a }}",
            "{{ a.b | raw }}",
            "{{ x | abs | format( \"%.2f\" ) }}",
            "{{ m ?? 'N/A' }}",
            "{{ u.name | selected('Bob') ?? \"none\" }}",
        ] {
            let normalized = normalize(raw).unwrap();
            let fraction = split_placeholder(&normalized).unwrap();
            let rebuilt = split_placeholder(&fraction.to_placeholder()).unwrap();
            assert_eq!(fraction, rebuilt, "round trip of {raw}");
        }
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("'abc'"), "abc");
        assert_eq!(strip_quotes("\"abc\""), "abc");
        assert_eq!(strip_quotes("'abc\""), "'abc\"");
        assert_eq!(strip_quotes("abc"), "abc");
        assert_eq!(strip_quotes("'"), "'");
    }

    // ── Defaults ────────────────────────────────────────────────────

    #[test]
    fn test_find_defaults() {
        let text = r#"{{a??"x y"}} {{b|raw??'z'}} {{c}} {{d??none}}"#;
        let found = find_defaults(text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].literal, "x y");
        assert_eq!(&text[found[0].span.clone()], r#"{{a??"x y"}}"#);
        assert_eq!(found[1].literal, "z");
    }

    #[test]
    fn test_find_defaults_inner_quote() {
        let found = find_defaults(r#"{{a??"say "hi""}}"#);
        assert_eq!(found[0].literal, r#"say "hi""#);
    }

    #[test]
    fn test_find_defaults_rejects_question_in_head() {
        assert!(find_defaults(r#"{{a?b??"x"}}"#).is_empty());
        assert!(find_defaults(r#"{{a??""}}"#).is_empty());
    }
}
