//! Header ("frontmatter") parsing for capture notes.
//!
//! A note may open with a header block fenced by `---` lines:
//!
//! ```text
//! ---
//! title: Call the plumber
//! tags: [todo, project:house]
//! ---
//! Body text starts here.
//! ```
//!
//! With the `yaml` feature the block goes through a standards-compliant YAML
//! parser. The hand-rolled [`parse_fallback`] handles the supported subset
//! (scalars, flat lists, one level of nested mapping or list) and is used
//! whenever the YAML path is unavailable or rejects the text.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Number, Value};

/// Parsed header mapping.
pub type Header = Map<String, Value>;

const MARKER: &str = "---";

static INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+$").unwrap());
static DECIMAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+\.\d+$").unwrap());

/// Split raw note text into `(header text, body)`.
///
/// Returns `None` for the header when the text does not open with a marker
/// line or the marker is never closed; the body is then the full text.
pub fn split(raw: &str) -> (Option<&str>, &str) {
    let mut lines = raw.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return (None, raw);
    };
    if first.trim_end() != MARKER {
        return (None, raw);
    }

    let header_start = first.len();
    let mut offset = header_start;
    for line in lines {
        if line.trim_end() == MARKER {
            let header = &raw[header_start..offset];
            let body = &raw[offset + line.len()..];
            return (Some(header), body.trim_start_matches(['\n', '\r']));
        }
        offset += line.len();
    }
    (None, raw)
}

/// Split and parse a note: `(header, body)`. Never fails.
pub fn parse_note(raw: &str) -> (Header, &str) {
    match split(raw) {
        (Some(header), body) => (parse_header(header), body),
        (None, body) => (Header::new(), body),
    }
}

/// Parse header text into a mapping using the best available parser.
pub fn parse_header(text: &str) -> Header {
    if text.trim().is_empty() {
        return Header::new();
    }

    #[cfg(feature = "yaml")]
    {
        match parse_yaml(text) {
            Ok(header) => return header,
            Err(reason) => {
                tracing::warn!(%reason, "header rejected by YAML parser; using fallback parser");
            }
        }
    }

    parse_fallback(text)
}

/// Standards-compliant path.
#[cfg(feature = "yaml")]
pub fn parse_yaml(text: &str) -> Result<Header, String> {
    if text.trim().is_empty() {
        return Ok(Header::new());
    }
    match serde_yml::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Header::new()),
        Ok(other) => Err(format!("header must be a mapping, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}

/// Hand-rolled recursive-descent parser for the supported header subset.
///
/// Never fails: a block stops at the first line that breaks its shape and
/// hands control back to the enclosing level, so malformed input yields
/// whatever structure was recognised before the break.
pub fn parse_fallback(text: &str) -> Header {
    let lines: Vec<&str> = text.lines().collect();
    let (mapping, _) = parse_mapping(&lines, 0, 0);
    mapping
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn is_skippable(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

fn is_sequence_item(trimmed: &str) -> bool {
    trimmed == "-" || trimmed.starts_with("- ")
}

fn next_content_line(lines: &[&str], start: usize) -> Option<usize> {
    (start..lines.len()).find(|&i| !is_skippable(lines[i]))
}

fn parse_mapping(lines: &[&str], start: usize, indent: usize) -> (Header, usize) {
    let mut mapping = Header::new();
    let mut index = start;

    while index < lines.len() {
        let line = lines[index];
        if is_skippable(line) {
            index += 1;
            continue;
        }
        let current_indent = indent_of(line);
        if current_indent < indent {
            break;
        }
        let trimmed = line.trim();
        if is_sequence_item(trimmed) {
            break;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            break;
        };
        let key = unquote(key.trim()).to_string();
        let value = strip_comment(value.trim());
        index += 1;

        if !value.is_empty() {
            mapping.insert(key, parse_scalar(value));
            continue;
        }

        let (nested, next) = parse_nested(lines, index, current_indent, current_indent + 2);
        mapping.insert(key, nested);
        index = next;
    }

    (mapping, index)
}

/// Value for a `key:` (or bare `-`) line with nothing after it: a sequence
/// when the next content line is a `- ` item at `seq_indent` or deeper,
/// otherwise a mapping at `map_indent`. Null when neither consumes a line.
fn parse_nested(lines: &[&str], start: usize, seq_indent: usize, map_indent: usize) -> (Value, usize) {
    let Some(peek) = next_content_line(lines, start) else {
        return (Value::Null, lines.len());
    };
    let peek_line = lines[peek];

    if is_sequence_item(peek_line.trim()) && indent_of(peek_line) >= seq_indent {
        let (items, next) = parse_sequence(lines, start, indent_of(peek_line));
        return (Value::Array(items), next);
    }

    let (nested, next) = parse_mapping(lines, start, map_indent);
    if nested.is_empty() {
        return (Value::Null, start);
    }
    (Value::Object(nested), next)
}

fn parse_sequence(lines: &[&str], start: usize, indent: usize) -> (Vec<Value>, usize) {
    let mut items = Vec::new();
    let mut index = start;

    while index < lines.len() {
        let line = lines[index];
        if is_skippable(line) {
            index += 1;
            continue;
        }
        let current_indent = indent_of(line);
        if current_indent < indent {
            break;
        }
        let trimmed = line.trim();
        if !is_sequence_item(trimmed) {
            break;
        }
        let item = strip_comment(trimmed[1..].trim());
        index += 1;

        if !item.is_empty() {
            items.push(parse_scalar(item));
            continue;
        }

        let (nested, next) = parse_nested(lines, index, current_indent + 2, current_indent + 2);
        items.push(nested);
        index = next;
    }

    (items, index)
}

/// Drop a trailing `# comment`. A `#` starts a comment only after
/// whitespace and outside quotes, so `C#` and `"a # b"` survive.
fn strip_comment(value: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    for (i, c) in value.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => {
                let at_token_start =
                    prev.map_or(true, |p| p.is_whitespace() || matches!(p, '[' | '{' | ','));
                if (c == '"' || c == '\'') && at_token_start {
                    quote = Some(c);
                } else if c == '#' && prev.map_or(true, char::is_whitespace) {
                    return value[..i].trim_end();
                }
            }
        }
        prev = Some(c);
    }
    value
}

fn unquote(token: &str) -> &str {
    let quoted = token.len() >= 2
        && ((token.starts_with('"') && token.ends_with('"'))
            || (token.starts_with('\'') && token.ends_with('\'')));
    if quoted {
        &token[1..token.len() - 1]
    } else {
        token
    }
}

/// Coerce a scalar token. Order: null, boolean, integer, decimal, quoted
/// text, inline list/mapping, raw string.
pub fn parse_scalar(token: &str) -> Value {
    let token = token.trim();
    if matches!(token, "" | "~" | "null" | "Null" | "NULL") {
        return Value::Null;
    }
    match token.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if INTEGER.is_match(token) {
        if let Ok(n) = token.parse::<i64>() {
            return Value::Number(n.into());
        }
    }
    if DECIMAL.is_match(token) {
        if let Some(n) = token.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    let unquoted = unquote(token);
    if unquoted.len() != token.len() {
        return Value::String(unquoted.to_string());
    }
    if let Some(inner) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        let inner = inner.trim();
        if inner.is_empty() {
            return Value::Array(Vec::new());
        }
        return Value::Array(inner.split(',').map(parse_scalar).collect());
    }
    if let Some(inner) = token.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
        let mut map = Map::new();
        for part in inner.split(',') {
            if let Some((key, value)) = part.split_once(':') {
                map.insert(unquote(key.trim()).to_string(), parse_scalar(value));
            }
        }
        return Value::Object(map);
    }
    Value::String(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FIXTURE_SCALARS: &str = "\
title: Call the plumber
count: 3
ratio: 0.5
negative: -7
done: false
urgent: True
nothing: ~
empty:
quoted: \"42\"
single: 'yes: really'
url: https://example.com/a
";

    const FIXTURE_FLAT_LIST: &str = "\
tags:
  - todo
  - project:house
inline: [a, 'b c', 3]
compact:
- one
- two
";

    const FIXTURE_NESTED: &str = "\
source:
  device: phone
  app: capture
  version: 2
after: top-level
";

    const FIXTURE_COMMENTS: &str = "\
tags: [todo] # inbox
count: 3 # three
language: C#
quoted: \"a # b\"  # trailing
note: don't # stop here
list:
  - one # first
  - two
";

    #[test]
    fn test_scalar_coercion() {
        let header = parse_fallback(FIXTURE_SCALARS);
        assert_eq!(header["title"], json!("Call the plumber"));
        assert_eq!(header["count"], json!(3));
        assert_eq!(header["ratio"], json!(0.5));
        assert_eq!(header["negative"], json!(-7));
        assert_eq!(header["done"], json!(false));
        assert_eq!(header["urgent"], json!(true));
        assert_eq!(header["nothing"], Value::Null);
        assert_eq!(header["empty"], Value::Null);
        assert_eq!(header["quoted"], json!("42"));
        assert_eq!(header["single"], json!("yes: really"));
        assert_eq!(header["url"], json!("https://example.com/a"));
    }

    #[test]
    fn test_flat_lists() {
        let header = parse_fallback(FIXTURE_FLAT_LIST);
        assert_eq!(header["tags"], json!(["todo", "project:house"]));
        assert_eq!(header["inline"], json!(["a", "b c", 3]));
        assert_eq!(header["compact"], json!(["one", "two"]));
    }

    #[test]
    fn test_nested_mapping() {
        let header = parse_fallback(FIXTURE_NESTED);
        assert_eq!(
            header["source"],
            json!({"device": "phone", "app": "capture", "version": 2})
        );
        assert_eq!(header["after"], json!("top-level"));
    }

    #[test]
    fn test_inline_mapping() {
        assert_eq!(parse_scalar("{a: 1, b: x}"), json!({"a": 1, "b": "x"}));
        assert_eq!(parse_scalar("[]"), json!([]));
        assert_eq!(parse_scalar("{}"), json!({}));
    }

    #[test]
    fn test_sequence_of_mappings_and_lists() {
        let header = parse_fallback("items:\n  -\n    name: a\n    size: 1\n  -\n    - x\n    - y\n");
        assert_eq!(header["items"], json!([{"name": "a", "size": 1}, ["x", "y"]]));
    }

    #[test]
    fn test_malformed_indentation_recovers_partial_structure() {
        let text = "title: ok\nmeta:\n    deep: 1\n  shallow: 2\nnot a pair\nlost: value\n";
        let header = parse_fallback(text);
        assert_eq!(header["title"], json!("ok"));
        assert_eq!(header["meta"], json!({"deep": 1, "shallow": 2}));
        // Parsing stops at the first line that is not `key: value`.
        assert!(!header.contains_key("lost"));
    }

    #[test]
    fn test_dedent_ends_nested_block() {
        let header = parse_fallback("a:\n  b: 1\nc: 2\n");
        assert_eq!(header["a"], json!({"b": 1}));
        assert_eq!(header["c"], json!(2));
    }

    #[test]
    fn test_comments_are_skipped() {
        let header = parse_fallback("# leading comment\ntitle: x\n  # indented\ntags: [a]\n");
        assert_eq!(header["title"], json!("x"));
        assert_eq!(header["tags"], json!(["a"]));
    }

    #[test]
    fn test_split_without_marker() {
        let (header, body) = split("Just a note\n");
        assert!(header.is_none());
        assert_eq!(body, "Just a note\n");
    }

    #[test]
    fn test_split_with_marker_strips_leading_blank_lines() {
        let raw = "---\ntitle: x\n---\n\n\nBody line\n";
        let (header, body) = split(raw);
        assert_eq!(header, Some("title: x\n"));
        assert_eq!(body, "Body line\n");
    }

    #[test]
    fn test_split_unterminated_marker_is_body() {
        let raw = "---\ntitle: x\nno closing marker\n";
        let (header, body) = split(raw);
        assert!(header.is_none());
        assert_eq!(body, raw);
    }

    #[test]
    fn test_split_requires_marker_on_its_own_line() {
        let raw = "--- not a marker\ntitle: x\n---\n";
        assert!(split(raw).0.is_none());
    }

    #[test]
    fn test_split_handles_crlf() {
        let raw = "---\r\ntitle: x\r\n---\r\nBody\r\n";
        let (header, body) = split(raw);
        assert_eq!(header, Some("title: x\r\n"));
        assert_eq!(body, "Body\r\n");
    }

    #[test]
    fn test_parse_note_empty_header() {
        let (header, body) = parse_note("---\n---\nBody\n");
        assert!(header.is_empty());
        assert_eq!(body, "Body\n");
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn test_fallback_matches_yaml_on_supported_subset() {
        for fixture in [FIXTURE_SCALARS, FIXTURE_FLAT_LIST, FIXTURE_NESTED, FIXTURE_COMMENTS] {
            let reference = parse_yaml(fixture).unwrap();
            let fallback = parse_fallback(fixture);
            assert_eq!(fallback, reference, "mismatch on fixture:\n{}", fixture);
        }
    }

    #[test]
    fn test_fallback_strips_trailing_comments() {
        let header = parse_fallback(FIXTURE_COMMENTS);
        assert_eq!(header["tags"], json!(["todo"]));
        assert_eq!(header["count"], json!(3));
        assert_eq!(header["language"], json!("C#"));
        assert_eq!(header["quoted"], json!("a # b"));
        assert_eq!(header["note"], json!("don't"));
        assert_eq!(header["list"], json!(["one", "two"]));
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn test_non_mapping_yaml_falls_back() {
        let header = parse_header("- just\n- a list\n");
        assert!(header.is_empty());
    }
}
