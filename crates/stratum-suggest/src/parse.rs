//! Recovering structured data from noisy model output.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Deserializer, Map, Value};

// Literal patterns: compilation only fails on a typo, which every test run
// would hit on first use.
static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON|javascript|js)?(.+?)```").expect("fence regex is valid")
});
static SINGLE_QUOTED_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'([^']*)'\s*:").expect("quoted key regex is valid"));
static BARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,])\s*([A-Za-z0-9_]+)\s*:").expect("bare key regex is valid"));
static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("trailing comma regex is valid"));
static KEY_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#""([^"]+)"\s*:\s*("(?:[^"\\]|\\.)*"|\[.*?\]|\{.*?\}|true|false|null|-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)"#,
    )
    .expect("key-value regex is valid")
});

/// Which fallback produced an extracted object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Direct,
    Span,
    Repaired,
    KeyValue,
}

/// Best-effort JSON object from model text; empty when nothing is recoverable.
pub fn extract_object(text: &str) -> Map<String, Value> {
    match extract_object_staged(text) {
        Some((map, stage)) => {
            if stage != Stage::Direct {
                log::warn!("recovered JSON object via {stage:?} fallback");
            }
            map
        }
        None => {
            let preview: String = text.chars().take(200).collect();
            log::warn!("no JSON object found in model output: {preview}");
            Map::new()
        }
    }
}

/// Like [`extract_object`], also naming the fallback that succeeded.
///
/// The first fenced block is only preferred for a direct decode; the
/// recovery stages run over the whole text before the fence contents, so an
/// unrelated code block cannot hide the answer.
pub fn extract_object_staged(text: &str) -> Option<(Map<String, Value>, Stage)> {
    let candidates = candidates(text);

    for candidate in &candidates {
        if let Ok(map) = serde_json::from_str::<Map<String, Value>>(candidate) {
            return Some((map, Stage::Direct));
        }
    }
    candidates.into_iter().rev().find_map(recover)
}

fn recover(text: &str) -> Option<(Map<String, Value>, Stage)> {
    let span = outer_span(text);
    if let Some(map) = span.and_then(|s| serde_json::from_str::<Map<String, Value>>(s).ok()) {
        return Some((map, Stage::Span));
    }
    if let Some(map) = longest_embedded_object(text) {
        return Some((map, Stage::Span));
    }

    let repaired = repair(span.unwrap_or(text));
    if let Ok(map) = serde_json::from_str::<Map<String, Value>>(&repaired) {
        return Some((map, Stage::Repaired));
    }

    let map = key_values(text);
    (!map.is_empty()).then_some((map, Stage::KeyValue))
}

/// Fence contents first (when they differ), then the whole trimmed text.
fn candidates(text: &str) -> Vec<&str> {
    let whole = text.trim();
    let mut out = Vec::with_capacity(2);
    let fenced = strip_fence(whole);
    if !fenced.is_empty() && fenced != whole {
        out.push(fenced);
    }
    if !whole.is_empty() {
        out.push(whole);
    }
    out
}

/// Contents of the first fenced block, or the text without a dangling fence.
fn strip_fence(text: &str) -> &str {
    if let Some(inner) = FENCE.captures(text).and_then(|c| c.get(1)) {
        return inner.as_str().trim();
    }
    let mut text = text;
    if text.starts_with("```") {
        text = text.find('\n').map_or("", |i| &text[i + 1..]);
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }
    text.trim()
}

/// First `{` through last `}`.
fn outer_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Try every `{` as the start of an object and keep the longest one that
/// decodes, ignoring whatever follows it.
fn longest_embedded_object(text: &str) -> Option<Map<String, Value>> {
    let mut best: Option<(usize, Map<String, Value>)> = None;
    let mut from = 0;
    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;
        let mut stream = Deserializer::from_str(&text[start..]).into_iter::<Map<String, Value>>();
        match stream.next() {
            Some(Ok(map)) => {
                let len = stream.byte_offset();
                if best.as_ref().map_or(true, |(l, _)| len > *l) {
                    best = Some((len, map));
                }
                from = start + len;
            }
            _ => from = start + 1,
        }
    }
    best.map(|(_, map)| map)
}

fn repair(text: &str) -> String {
    let fixed = SINGLE_QUOTED_KEY.replace_all(text, "\"$1\":");
    let fixed = BARE_KEY.replace_all(&fixed, "$1\"$2\":");
    TRAILING_COMMA.replace_all(&fixed, "$1").into_owned()
}

/// Last resort: pull individual `"key": value` pairs out of the text.
fn key_values(text: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for caps in KEY_VALUE.captures_iter(text) {
        let (Some(key), Some(raw)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let raw = raw.as_str();
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(v) => v,
            Err(_) if raw.starts_with('[') => Value::Array(vec![]),
            Err(_) if raw.starts_with('{') => Value::Object(Map::new()),
            Err(_) if raw.starts_with('"') => {
                Value::String(raw.trim_matches('"').to_string())
            }
            Err(_) => Value::String(raw.to_string()),
        };
        map.insert(key.as_str().to_string(), value);
    }
    map
}

// --- Module lists ---

/// Extract the JSON array substring from raw model output.
fn extract_json_array(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    Some(&raw[start..=end])
}

/// Salvage the balanced top-level objects of a malformed array.
fn parse_object_by_object(json_str: &str) -> Vec<Value> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in json_str.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Ok(obj @ Value::Object(_)) = serde_json::from_str(&json_str[s..=i]) {
                            objects.push(obj);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    objects
}

/// Module records from a model answer that should be a JSON array of objects.
///
/// Tries the whole array first, then salvages individual objects, then a
/// `{"modules": [...]}` wrapper.
pub fn parse_module_records(raw: &str) -> Result<Vec<Value>, String> {
    let candidates = candidates(raw);

    let arrays: Vec<&str> = candidates.iter().copied().filter_map(extract_json_array).collect();
    for array in &arrays {
        if let Ok(records) = serde_json::from_str::<Vec<Value>>(array) {
            return Ok(records.into_iter().filter(Value::is_object).collect());
        }
    }
    for array in &arrays {
        let salvaged = parse_object_by_object(array);
        if !salvaged.is_empty() {
            log::warn!("module list was malformed, salvaged {} records", salvaged.len());
            return Ok(salvaged);
        }
    }

    if let Some(Value::Array(records)) = extract_object(raw).remove("modules") {
        return Ok(records.into_iter().filter(Value::is_object).collect());
    }
    Err("no module list found in model output".to_string())
}
