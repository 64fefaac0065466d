//! JSON with comments, as used by the device configuration files.
//!
//! Reading accepts `//` and `/* */` comments plus trailing commas. Writing
//! produces JSON indented with tabs, with the comments of the source put back
//! in front of the members they preceded.

use crate::error::{DedupError, Result};
use ahash::AHashMap;
use serde_json::Value;
use std::fs;
use std::path::Path;

type CommentMap = AHashMap<Vec<String>, Vec<String>>;

/// Comments of a document, keyed by the path of the member they precede.
///
/// Array elements that carry a `#` member are addressed by it, so their
/// comments stay with them when the entries are reordered.
#[derive(Debug, Clone, Default)]
pub struct Comments {
    leading: CommentMap,
    closing: CommentMap,
    tail: Vec<String>,
}

impl Comments {
    pub fn is_empty(&self) -> bool {
        self.leading.is_empty() && self.closing.is_empty() && self.tail.is_empty()
    }
}

/// Parse a JSONC document, keeping the key order of every object.
pub fn parse(text: &str) -> Result<Value> {
    let plain = strip_trailing_commas(&strip_comments(text)?);
    Ok(serde_json::from_str(&plain)?)
}

/// Parse a JSONC document along with its comments.
pub fn parse_document(text: &str) -> Result<(Value, Comments)> {
    let value = parse(text)?;
    let comments = locate_comments(text, &value);
    Ok((value, comments))
}

/// Read and parse a JSONC file.
pub fn read(path: &Path) -> Result<Value> {
    read_document(path).map(|(value, _)| value)
}

pub fn read_document(path: &Path) -> Result<(Value, Comments)> {
    let text = fs::read_to_string(path)?;
    parse_document(&text).map_err(|e| match e {
        DedupError::Syntax(source) => DedupError::Json {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

/// Pretty print with tab indentation and a trailing newline.
pub fn to_string(value: &Value) -> String {
    render(value, &Comments::default())
}

/// Pretty print like [`to_string`], putting comments back in place.
pub fn render(value: &Value, comments: &Comments) -> String {
    let mut out = String::new();
    let mut path: Vec<String> = Vec::new();
    push_comments(&mut out, comments.leading.get(path.as_slice()), 0);
    render_value(&mut out, value, &mut path, 0, comments);
    out.push('\n');
    push_comments(&mut out, Some(&comments.tail), 0);
    out
}

pub fn write(path: &Path, value: &Value, comments: &Comments) -> Result<()> {
    fs::write(path, render(value, comments))?;
    Ok(())
}

fn render_value(
    out: &mut String,
    value: &Value,
    path: &mut Vec<String>,
    depth: usize,
    comments: &Comments,
) {
    let closing = comments.closing.get(path.as_slice());
    match value {
        Value::Object(map) if !map.is_empty() || closing.is_some() => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                path.push(key.clone());
                out.push('\n');
                push_comments(out, comments.leading.get(path.as_slice()), depth + 1);
                indent(out, depth + 1);
                out.push_str(&Value::String(key.clone()).to_string());
                out.push_str(": ");
                render_value(out, item, path, depth + 1, comments);
                if i + 1 < map.len() {
                    out.push(',');
                }
                path.pop();
            }
            out.push('\n');
            push_comments(out, closing, depth + 1);
            indent(out, depth);
            out.push('}');
        }
        Value::Array(items) if !items.is_empty() || closing.is_some() => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                path.push(element_segment(&i.to_string(), item));
                out.push('\n');
                push_comments(out, comments.leading.get(path.as_slice()), depth + 1);
                indent(out, depth + 1);
                render_value(out, item, path, depth + 1, comments);
                if i + 1 < items.len() {
                    out.push(',');
                }
                path.pop();
            }
            out.push('\n');
            push_comments(out, closing, depth + 1);
            indent(out, depth);
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn push_comments(out: &mut String, lines: Option<&Vec<String>>, depth: usize) {
    for line in lines.into_iter().flatten() {
        indent(out, depth);
        out.push_str(line);
        out.push('\n');
    }
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

fn element_segment(index: &str, element: &Value) -> String {
    match element.get("#") {
        Some(Value::String(no)) => format!("#{}", no),
        Some(Value::Number(no)) => format!("#{}", no),
        _ => index.to_string(),
    }
}

enum Frame {
    Object {
        path: Vec<String>,
        key: Option<String>,
        expect_key: bool,
    },
    Array {
        path: Vec<String>,
        len: usize,
    },
}

/// Attach every comment of `text` to the member or closing bracket after it.
///
/// `text` must already have parsed into `value`.
fn locate_comments(text: &str, value: &Value) -> Comments {
    let chars: Vec<char> = text.chars().collect();
    let mut comments = Comments::default();
    let mut pending: Vec<String> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '/' if chars.get(i + 1) == Some(&'/') => {
                let start = i;
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                pending.push(chars[start..i].iter().collect::<String>().trim_end().to_string());
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let start = i;
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
                pending.push(chars[start..i].iter().collect());
            }
            '"' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i = (i + 1).min(chars.len());

                let is_key = matches!(stack.last(), Some(Frame::Object { expect_key: true, .. }));
                if !is_key {
                    start_value(&mut stack, &mut comments, &mut pending);
                } else if let Some(Frame::Object { path, key, expect_key }) = stack.last_mut() {
                    let raw: String = chars[start..i].iter().collect();
                    let name = serde_json::from_str::<String>(&raw)
                        .unwrap_or_else(|_| raw.trim_matches('"').to_string());
                    let mut member = path.clone();
                    member.push(name.clone());
                    attach(&mut comments.leading, member, &mut pending);
                    *key = Some(name);
                    *expect_key = false;
                }
            }
            '{' | '[' => {
                let path = start_value(&mut stack, &mut comments, &mut pending);
                stack.push(if c == '{' {
                    Frame::Object { path, key: None, expect_key: true }
                } else {
                    Frame::Array { path, len: 0 }
                });
                i += 1;
            }
            '}' | ']' => {
                if let Some(Frame::Object { path, .. } | Frame::Array { path, .. }) = stack.pop() {
                    attach(&mut comments.closing, path, &mut pending);
                }
                i += 1;
            }
            ',' => {
                if let Some(Frame::Object { expect_key, .. }) = stack.last_mut() {
                    *expect_key = true;
                }
                i += 1;
            }
            _ if c == ':' || c.is_whitespace() => i += 1,
            _ => {
                start_value(&mut stack, &mut comments, &mut pending);
                i += 1;
                while i < chars.len()
                    && !chars[i].is_whitespace()
                    && !matches!(chars[i], ',' | ':' | '}' | ']' | '/' | '"')
                {
                    i += 1;
                }
            }
        }
    }
    comments.tail = pending;

    comments.leading = rekey(comments.leading, value);
    comments.closing = rekey(comments.closing, value);
    comments
}

/// Record the start of a value and return its path.
fn start_value(stack: &mut [Frame], comments: &mut Comments, pending: &mut Vec<String>) -> Vec<String> {
    let member = match stack.last_mut() {
        None => Vec::new(),
        Some(Frame::Array { path, len }) => {
            let mut member = path.clone();
            member.push(len.to_string());
            *len += 1;
            member
        }
        Some(Frame::Object { path, key, .. }) => {
            let mut member = path.clone();
            member.extend(key.clone());
            member
        }
    };
    attach(&mut comments.leading, member.clone(), pending);
    member
}

fn attach(map: &mut CommentMap, path: Vec<String>, pending: &mut Vec<String>) {
    if !pending.is_empty() {
        map.entry(path).or_default().append(pending);
    }
}

/// Swap array indexes in comment paths for `#` addresses where the element has one.
fn rekey(map: CommentMap, value: &Value) -> CommentMap {
    let mut out = CommentMap::default();
    for (path, lines) in map {
        out.entry(stable_path(value, &path)).or_default().extend(lines);
    }
    out
}

fn stable_path(value: &Value, path: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(path.len());
    let mut current = Some(value);
    for segment in path {
        current = match current {
            Some(Value::Array(items)) => {
                let item = segment.parse::<usize>().ok().and_then(|i| items.get(i));
                out.push(item.map_or_else(|| segment.clone(), |item| element_segment(segment, item)));
                item
            }
            Some(Value::Object(map)) => {
                out.push(segment.clone());
                map.get(segment)
            }
            _ => {
                out.push(segment.clone());
                None
            }
        };
    }
    out
}

/// Remove line and block comments that sit outside string literals.
///
/// Block comments are replaced by a single space (plus any newlines they
/// spanned) so that tokens on either side stay apart and line numbers in
/// later parse errors still point at the right place.
fn strip_comments(text: &str) -> Result<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                    i += 1;
                }
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match (c, chars.get(i + 1)) {
            ('"', _) => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                let start = i;
                i += 2;
                loop {
                    match (chars.get(i), chars.get(i + 1)) {
                        (Some('*'), Some('/')) => {
                            i += 2;
                            break;
                        }
                        (Some(ch), _) => {
                            if *ch == '\n' {
                                out.push('\n');
                            }
                            i += 1;
                        }
                        (None, _) => return Err(DedupError::UnterminatedComment(start)),
                    }
                }
                out.push(' ');
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(out)
}

/// Drop commas that are directly followed (modulo whitespace) by `}` or `]`.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_strips_comments() {
        let text = r#"{
            // manufacturer header
            "label": "ZW4001", /* inline */
            "paramInformation": {
                /* multi
                   line */
                "1": { "minValue": 0 }
            }
        }"#;

        let value = parse(text).unwrap();
        assert_eq!(
            value,
            json!({ "label": "ZW4001", "paramInformation": { "1": { "minValue": 0 } } })
        );
    }

    #[test]
    fn test_comment_markers_inside_strings_survive() {
        let text = r#"{ "url": "http://example.com/*x*/", "note": "say \"//hi\"" }"#;
        let value = parse(text).unwrap();
        assert_eq!(value["url"], "http://example.com/*x*/");
        assert_eq!(value["note"], "say \"//hi\"");
    }

    #[test]
    fn test_trailing_commas_are_accepted() {
        let text = "{ \"a\": [1, 2, ], \"b\": { \"c\": \",\", }, }";
        let value = parse(text).unwrap();
        assert_eq!(value, json!({ "a": [1, 2], "b": { "c": "," } }));
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = parse("{ /* never closed").unwrap_err();
        assert!(matches!(err, DedupError::UnterminatedComment(2)));
    }

    #[test]
    fn test_parse_keeps_key_order() {
        let value = parse(r#"{ "z": 1, "a": 2, "m": 3 }"#).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn test_to_string_uses_tabs() {
        let out = to_string(&json!({ "a": { "b": 1 }, "c": [], "d": {} }));
        assert_eq!(out, "{\n\t\"a\": {\n\t\t\"b\": 1\n\t},\n\t\"c\": [],\n\t\"d\": {}\n}\n");
    }

    #[test]
    fn test_render_puts_comments_back() {
        let text = "{\n\t// Fibaro dimmer, see manual p.12\n\t\"label\": \"X\"\n}";
        let (value, comments) = parse_document(text).unwrap();
        assert!(!comments.is_empty());
        assert_eq!(render(&value, &comments), format!("{}\n", text));
    }

    #[test]
    fn test_comments_follow_reordered_entries() {
        let text = r##"// Fibaro dimmer, see manual p.12
{
	"label": "X", // trailing note
	/* params */
	"paramInformation": [
		// second
		{ "#": "2", "label": "B" },
		// first
		{ "#": "1", "label": "A" },
	]
}"##;
        let (mut value, comments) = parse_document(text).unwrap();
        value["paramInformation"].as_array_mut().unwrap().reverse();

        let expected = r##"// Fibaro dimmer, see manual p.12
{
	"label": "X",
	// trailing note
	/* params */
	"paramInformation": [
		// first
		{
			"#": "1",
			"label": "A"
		},
		// second
		{
			"#": "2",
			"label": "B"
		}
	]
}
"##;
        assert_eq!(render(&value, &comments), expected);
    }

    #[test]
    fn test_closing_and_tail_comments() {
        let text = "{ \"a\": 1, // last\n \"b\": {\n /* empty */ } }\n// end\n";
        let (value, comments) = parse_document(text).unwrap();
        assert_eq!(
            render(&value, &comments),
            "{\n\t\"a\": 1,\n\t// last\n\t\"b\": {\n\t\t/* empty */\n\t}\n}\n// end\n"
        );
    }

    #[test]
    fn test_dropped_members_drop_their_comments() {
        let text = "{ \"1\": {\n // old wording\n \"label\": \"Beep\" } }";
        let (mut value, comments) = parse_document(text).unwrap();
        value["1"] = json!({ "$import": "templates/t.json#beep" });
        assert_eq!(
            render(&value, &comments),
            "{\n\t\"1\": {\n\t\t\"$import\": \"templates/t.json#beep\"\n\t}\n}\n"
        );
    }

    #[test]
    fn test_read_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ \"a\": }").unwrap();

        let err = read(&path).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }
}
