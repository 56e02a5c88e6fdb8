use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

/// Extract a JSON object from noisy model output.
///
/// Four strategies, tried in order: direct parse; the first fenced code
/// block; the first balanced `{…}` span; the same span after a common-fix
/// pass (trailing commas removed, single quotes doubled). Returns `None`
/// when no strategy yields an object.
pub fn tolerant_json(text: &str) -> Option<Value> {
    if let Some(v) = parse_object(text) {
        return Some(v);
    }

    if let Some(fenced) = extract_fenced(text) {
        if let Some(v) = parse_object(fenced) {
            return Some(v);
        }
        if let Some(v) = parse_object(&common_fixes(fenced)) {
            return Some(v);
        }
    }

    if let Some(span) = first_object_span(text) {
        if let Some(v) = parse_object(span) {
            return Some(v);
        }
        if let Some(v) = parse_object(&common_fixes(span)) {
            return Some(v);
        }
    }

    None
}

fn parse_object(s: &str) -> Option<Value> {
    serde_json::from_str::<Value>(s.trim())
        .ok()
        .filter(Value::is_object)
}

/// Content of the first fenced code block, with any language tag stripped.
fn extract_fenced(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip the language tag line ("json", "JSON", or empty)
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// The first balanced top-level `{…}` span, string-aware so braces inside
/// quoted values don't end the scan early.
fn first_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Fix the two most common model JSON mistakes: trailing commas and
/// single-quoted strings.
fn common_fixes(s: &str) -> String {
    let no_trailing = TRAILING_COMMA_RE.replace_all(s, "$1");
    no_trailing.replace('\'', "\"")
}
