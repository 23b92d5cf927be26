//! Local repairs for model output that is almost, but not quite, JSON.
//!
//! Each repair returns a candidate string to re-parse, or `None` when it
//! has nothing to offer. None of them make a gateway call.

/// A repair pass, applied to the raw response text.
pub type Repair = fn(&str) -> Option<String>;

/// Repairs in the order they are tried.
pub const REPAIRS: [(&str, Repair); 2] = [
    ("strip_wrapping", strip_wrapping),
    ("close_truncated", close_truncated),
];

/// Drop reasoning blocks, markdown fences and surrounding prose, keeping the
/// first balanced object that parses. A fenced block is searched before the
/// rest of the text.
pub fn strip_wrapping(raw: &str) -> Option<String> {
    let text = strip_think_blocks(raw);
    let found = fenced_block(&text)
        .and_then(first_parsing_object)
        .or_else(|| first_parsing_object(&text));
    found.map(str::to_string)
}

/// Close an object that was cut off mid-stream: terminate an open string,
/// then close every open bracket. If that does not parse, back off to the
/// last complete element before a comma and close from there.
///
/// The first unbalanced object is the one closed; complete objects ahead of
/// it (`{placeholders}` in prose) are skipped.
pub fn close_truncated(raw: &str) -> Option<String> {
    let text = strip_think_blocks(raw);
    let region = fenced_block(&text)
        .filter(|block| block.contains('{'))
        .unwrap_or(text.as_str());

    let mut from = 0;
    loop {
        let start = from + region[from..].find('{')?;
        match balanced_object_end(&region[start..]) {
            Some(end) => from = start + end,
            None => return close_from(&region[start..]),
        }
    }
}

fn close_from(body: &str) -> Option<String> {
    let mut closers: Vec<char> = Vec::new();
    // Byte offset of each top-level-or-nested comma with the closers open there.
    let mut cut_points: Vec<(usize, Vec<char>)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in body.char_indices() {
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
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                closers.pop();
                if closers.is_empty() {
                    // Already complete; nothing to close.
                    return None;
                }
            }
            ',' => cut_points.push((i, closers.clone())),
            _ => {}
        }
    }

    let mut candidate = body.trim_end().to_string();
    if in_string {
        if escaped {
            candidate.pop();
        }
        candidate.push('"');
    }
    let candidate = close_with(candidate.trim_end_matches([',', ':']).to_string(), &closers);
    if parses(&candidate) {
        return Some(candidate);
    }

    cut_points
        .iter()
        .rev()
        .map(|(at, open)| close_with(body[..*at].to_string(), open))
        .find(|c| parses(c))
}

fn close_with(mut text: String, closers: &[char]) -> String {
    text.extend(closers.iter().rev());
    text
}

fn parses(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate).is_ok()
}

/// Contents of the first markdown code fence. An unterminated fence runs to
/// the end of the text.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body = &after[after.find('\n')? + 1..];
    Some(match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    })
}

/// First balanced object in `text` that parses as JSON. Objects that do not
/// parse are skipped whole; an unbalanced one ends the search.
fn first_parsing_object(text: &str) -> Option<&str> {
    let mut from = 0;
    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;
        let end = start + balanced_object_end(&text[start..])?;
        let candidate = &text[start..end];
        if parses(candidate) {
            return Some(candidate);
        }
        from = end;
    }
    None
}

/// Byte length of the balanced object starting at `text[0] == '{'`.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
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
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove `<think>...</think>` blocks some reasoning models emit.
fn strip_think_blocks(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find("<think>") {
        out.push_str(&rest[..open]);
        match rest[open..].find("</think>") {
            Some(close) => rest = &rest[open + close + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markdown_fence() {
        let raw = "Here is the data:\n```json\n{\"a\": [1, 2], \"b\": \"x}\"}\n```\nLet me know!";
        assert_eq!(
            strip_wrapping(raw).as_deref(),
            Some("{\"a\": [1, 2], \"b\": \"x}\"}")
        );
    }

    #[test]
    fn test_strip_think_block() {
        let raw = "<think>maybe {\"wrong\": true}</think>{\"right\": true}";
        assert_eq!(strip_wrapping(raw).as_deref(), Some("{\"right\": true}"));
    }

    #[test]
    fn test_strip_without_object() {
        assert_eq!(strip_wrapping("I cannot help with that."), None);
        assert_eq!(strip_wrapping("{\"open\": [1, 2"), None);
    }

    #[test]
    fn test_strip_skips_braces_in_prose() {
        let raw = "I filled in the {risk} schema:\n```json\n{\"a\": 1}\n```";
        assert_eq!(strip_wrapping(raw).as_deref(), Some("{\"a\": 1}"));

        let raw = "Using {risk} as asked: {\"a\": 1} done";
        assert_eq!(strip_wrapping(raw).as_deref(), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_close_truncated_skips_braces_in_prose() {
        let raw = "I filled in the {risk} schema:\n```json\n{\"a\": 1, \"b\": [\"x\", \"y";
        let fixed = close_truncated(raw).unwrap();
        assert_eq!(fixed, "{\"a\": 1, \"b\": [\"x\", \"y\"]}");

        let raw = "Using {risk}: {\"a\": 1, \"b\": [\"x\"";
        assert_eq!(close_truncated(raw).as_deref(), Some("{\"a\": 1, \"b\": [\"x\"]}"));
    }

    #[test]
    fn test_close_truncated_string() {
        let raw = "{\"risk_categories\": [\"Supply\", \"Regulat";
        let fixed = close_truncated(raw).unwrap();
        let value: serde_json::Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value["risk_categories"][0], "Supply");
        assert_eq!(value["risk_categories"][1], "Regulat");
    }

    #[test]
    fn test_close_truncated_dangling_key() {
        let raw = "```json\n{\"a\": [1, 2], \"b\": {\"c\": true, \"d\":";
        let fixed = close_truncated(raw).unwrap();
        let value: serde_json::Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value["a"], serde_json::json!([1, 2]));
        assert_eq!(value["b"]["c"], true);
    }

    #[test]
    fn test_close_truncated_backs_off_to_comma() {
        let raw = "{\"a\": 1, \"b\": tru";
        let fixed = close_truncated(raw).unwrap();
        assert_eq!(fixed, "{\"a\": 1}");
    }

    #[test]
    fn test_close_complete_object_is_noop() {
        assert_eq!(close_truncated("{\"a\": 1}"), None);
    }
}
