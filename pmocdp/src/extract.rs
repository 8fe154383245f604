//! Tolerant field extraction from JSON-ish text.
//!
//! DevTools answers and page lists are produced by an application we do not
//! control, and the values we care about sit at varying depths inside them.
//! Rather than modelling every shape, these helpers look for a single
//! `"key": value` pair anywhere in the text.
//!
//! Contract, shared by every function here:
//! - the key is matched exactly (case-sensitive), as a quoted JSON string,
//!   with optional whitespace around the colon;
//! - the first occurrence in the text wins, whatever its nesting depth;
//! - malformed or truncated input never fails loudly: a value that cannot be
//!   read yields `None`.

use std::collections::HashMap;
use std::sync::Mutex;

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FieldKind {
    Number,
    String,
    Bool,
}

impl FieldKind {
    fn value_pattern(self) -> &'static str {
        match self {
            FieldKind::Number => r"(-?[0-9]*\.?[0-9]+(?:[eE][+-]?[0-9]+)?)",
            FieldKind::String => r#""((?:[^"\\]|\\.)*)""#,
            FieldKind::Bool => r"(true|false)\b",
        }
    }
}

lazy_static! {
    // Compiled patterns, keyed by field name and value kind.
    static ref FIELD_PATTERNS: Mutex<HashMap<(String, FieldKind), Regex>> =
        Mutex::new(HashMap::new());
}

fn field_regex(key: &str, kind: FieldKind) -> Option<Regex> {
    let mut patterns = FIELD_PATTERNS
        .lock()
        .expect("field pattern cache mutex poisoned");
    let slot = (key.to_string(), kind);
    if let Some(re) = patterns.get(&slot) {
        return Some(re.clone());
    }
    let re = Regex::new(&format!(
        r#""{}"\s*:\s*{}"#,
        regex::escape(key),
        kind.value_pattern()
    ))
    .ok()?;
    patterns.insert(slot, re.clone());
    Some(re)
}

/// Reads a JSON number (`-12`, `3.5`, `1e3`) stored under `key`.
pub fn extract_number(text: &str, key: &str) -> Option<f64> {
    let re = field_regex(key, FieldKind::Number)?;
    let caps = re.captures(text)?;
    caps.get(1)?.as_str().parse::<f64>().ok()
}

/// Reads a JSON string stored under `key`, with escapes resolved.
///
/// An empty string is returned as `Some("")`; callers decide whether empty
/// means absent.
pub fn extract_string(text: &str, key: &str) -> Option<String> {
    let re = field_regex(key, FieldKind::String)?;
    let caps = re.captures(text)?;
    let inner = caps.get(1)?.as_str();
    // Resolve escapes through serde_json; keep the raw text if it refuses.
    match serde_json::from_str::<String>(&format!("\"{}\"", inner)) {
        Ok(s) => Some(s),
        Err(_) => Some(inner.to_string()),
    }
}

/// Reads a JSON boolean stored under `key`.
pub fn extract_bool(text: &str, key: &str) -> Option<bool> {
    let re = field_regex(key, FieldKind::Bool)?;
    let caps = re.captures(text)?;
    Some(caps.get(1)?.as_str() == "true")
}

/// Byte offset of the first ASCII case-insensitive occurrence of `needle`.
pub fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    // ASCII lowercasing keeps byte offsets stable.
    let haystack = haystack.to_ascii_lowercase();
    let needle = needle.to_ascii_lowercase();
    haystack.find(&needle)
}

/// Smallest `{ ... }` span around byte offset `at`: the last `{` before it and
/// the first `}` after it. Nested objects are not balanced.
pub fn enclosing_object(text: &str, at: usize) -> Option<&str> {
    if at > text.len() {
        return None;
    }
    let start = text[..at].rfind('{')?;
    let end = at + text[at..].find('}')?;
    text.get(start..=end)
}

/// Cuts `text` to at most `max_bytes`, backing off to a char boundary.
pub fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
