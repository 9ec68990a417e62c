//! Parsing of XML-tagged tool invocations from model output
//!
//! The model emits `<toolName><params>{...}</params></toolName>` (or the
//! legacy `<toolName><key>value</key></toolName>` form). Output is
//! adversarial: it may wrap the call in thinking tags, quote closing
//! tags inside its own answer text, or truncate the call entirely, so
//! every path here degrades instead of erroring.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

/// A recognized tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    pub tool_name: String,
    pub params: Value,
}

static THINKING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<thinking>.*?</thinking>").expect("Invalid regex pattern"));

/// Remove thinking blocks before tag matching. An unterminated
/// `<thinking>` swallows the rest of the text.
pub fn strip_thinking(text: &str) -> String {
    let stripped = THINKING_RE.replace_all(text, "").into_owned();
    match stripped.find("<thinking>") {
        Some(idx) => stripped[..idx].to_string(),
        None => stripped,
    }
}

/// Find the first open/close tag pair among `candidates` and parse its
/// parameter payload. Returns `None` when no candidate tag is present.
pub fn parse_call(text: &str, candidates: &[String]) -> Option<ParsedCall> {
    for name in candidates {
        if let Some(inner) = extract_tag_body(text, name) {
            return Some(ParsedCall {
                tool_name: name.clone(),
                params: parse_params(inner),
            });
        }
    }
    None
}

/// `parse_call` plus a recovery path for truncated output: a shorthand
/// `<name/>` marker yields empty params, and an open tag with no close
/// anywhere treats the remainder of the text as the body.
pub fn parse_call_with_recovery(text: &str, candidates: &[String]) -> Option<ParsedCall> {
    if let Some(call) = parse_call(text, candidates) {
        return Some(call);
    }

    for name in candidates {
        if text.contains(&format!("<{name}/>")) {
            return Some(ParsedCall {
                tool_name: name.clone(),
                params: json!({}),
            });
        }

        let open = format!("<{name}>");
        if let Some(idx) = text.find(&open) {
            let inner = &text[idx + open.len()..];
            let mut params = parse_params(inner);
            if params.as_object().is_some_and(|m| m.is_empty()) && !inner.trim().is_empty() {
                params = json!({ "value": inner.trim() });
            }
            return Some(ParsedCall {
                tool_name: name.clone(),
                params,
            });
        }
    }

    None
}

/// Body between the first `<name>` and the **last** `</name>`. Model
/// output may quote the closing tag as example text inside its answer;
/// the last occurrence is the real terminator.
fn extract_tag_body<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");

    let start = text.find(&open)? + open.len();
    let end = text.rfind(&close)?;
    if end < start {
        return None;
    }
    Some(&text[start..end])
}

/// Body between the first `<name>` and the first `</name>` after it.
/// Parameter payloads are well-formed, so the greedy rule does not apply
/// to them.
fn extract_first_tag_body<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");

    let start = text.find(&open)? + open.len();
    let end = start + text[start..].find(&close)?;
    Some(&text[start..end])
}

fn parse_params(inner: &str) -> Value {
    if let Some(block) = extract_first_tag_body(inner, "params") {
        let raw = unwrap_cdata(block.trim()).trim();

        if raw.starts_with('{') {
            return match serde_json::from_str::<Value>(raw) {
                Ok(value) => value,
                // Malformed JSON degrades to a single opaque string value
                Err(_) => json!({ "value": raw }),
            };
        }

        return json!({ "value": raw });
    }

    legacy_params(inner)
}

fn unwrap_cdata(raw: &str) -> &str {
    raw.strip_prefix("<![CDATA[")
        .and_then(|r| r.strip_suffix("]]>"))
        .unwrap_or(raw)
}

/// Legacy form: one `<key>value</key>` pair per parameter. A literal
/// `params` tag name is skipped so the two forms cannot shadow each
/// other.
fn legacy_params(inner: &str) -> Value {
    let mut map = Map::new();
    let mut rest = inner;

    while let Some(open_idx) = rest.find('<') {
        let after = &rest[open_idx + 1..];
        let Some(gt) = after.find('>') else { break };
        let key = &after[..gt];

        if !is_identifier(key) || key == "params" {
            rest = &rest[open_idx + 1..];
            continue;
        }

        let body_start = open_idx + 1 + gt + 1;
        let close = format!("</{key}>");
        let Some(close_idx) = rest[body_start..].find(&close) else {
            rest = &rest[open_idx + 1..];
            continue;
        };

        let value = rest[body_start..body_start + close_idx].trim();
        map.insert(key.to_string(), Value::String(value.to_string()));
        rest = &rest[body_start + close_idx + close.len()..];
    }

    Value::Object(map)
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_json_params_form() {
        let text = r#"<search><params>{"query": "fn main", "path": "src"}</params></search>"#;
        let call = parse_call(text, &names(&["search"])).unwrap();
        assert_eq!(call.tool_name, "search");
        assert_eq!(call.params["query"], "fn main");
        assert_eq!(call.params["path"], "src");
    }

    #[test]
    fn test_bare_string_params_are_coerced() {
        let text = "<search><params>plain text query</params></search>";
        let call = parse_call(text, &names(&["search"])).unwrap();
        assert_eq!(call.params, json!({ "value": "plain text query" }));
    }

    #[test]
    fn test_malformed_json_degrades_to_string_value() {
        let text = r#"<search><params>{"query": unquoted}</params></search>"#;
        let call = parse_call(text, &names(&["search"])).unwrap();
        assert_eq!(call.params["value"], r#"{"query": unquoted}"#);
    }

    #[test]
    fn test_cdata_wrapped_params() {
        let text = r#"<search><params><![CDATA[{"query": "a < b"}]]></params></search>"#;
        let call = parse_call(text, &names(&["search"])).unwrap();
        assert_eq!(call.params["query"], "a < b");
    }

    #[test]
    fn test_legacy_per_parameter_tags() {
        let text = "<extract><file_path>src/main.rs</file_path><line>42</line></extract>";
        let call = parse_call(text, &names(&["extract"])).unwrap();
        assert_eq!(call.params["file_path"], "src/main.rs");
        assert_eq!(call.params["line"], "42");
    }

    #[test]
    fn test_no_candidate_tag_returns_none() {
        let text = "I could not decide which tool to use.";
        assert!(parse_call(text, &names(&["search", "extract"])).is_none());
    }

    #[test]
    fn test_first_candidate_with_a_match_wins() {
        let text = "<extract><params>{}</params></extract>";
        let call = parse_call(text, &names(&["search", "extract"])).unwrap();
        assert_eq!(call.tool_name, "extract");
    }

    #[test]
    fn test_last_closing_tag_wins() {
        // The model quotes the closing tag inside its own answer text;
        // the real terminator is the last occurrence.
        let text = "<attempt_completion><params>example shows </attempt_completion> \
                    marker</params></attempt_completion>";
        let call = parse_call(text, &names(&["attempt_completion"])).unwrap();
        assert_eq!(
            call.params["value"],
            "example shows </attempt_completion> marker"
        );
    }

    #[test]
    fn test_embedded_close_inside_json_params() {
        let text = r#"<attempt_completion><params>{"result": "write </attempt_completion> to finish"}</params></attempt_completion>"#;
        let call = parse_call(text, &names(&["attempt_completion"])).unwrap();
        assert_eq!(call.params["result"], "write </attempt_completion> to finish");
    }

    #[test]
    fn test_strip_thinking_blocks() {
        let text = "<thinking>should I search? yes</thinking><search><params>{\"query\":\"x\"}</params></search>";
        let cleaned = strip_thinking(text);
        assert!(!cleaned.contains("thinking"));
        assert!(parse_call(&cleaned, &names(&["search"])).is_some());
    }

    #[test]
    fn test_unterminated_thinking_swallows_the_rest() {
        let text = "done.<thinking>now I will ponder forever";
        assert_eq!(strip_thinking(text), "done.");
    }

    #[test]
    fn test_recovery_for_unterminated_tag() {
        let text = "<attempt_completion>The refactor is complete.";
        let call = parse_call_with_recovery(text, &names(&["attempt_completion"])).unwrap();
        assert_eq!(call.tool_name, "attempt_completion");
        assert_eq!(call.params["value"], "The refactor is complete.");
    }

    #[test]
    fn test_recovery_for_shorthand_marker() {
        let text = "Finishing up. <attempt_completion/>";
        let call = parse_call_with_recovery(text, &names(&["attempt_completion"])).unwrap();
        assert_eq!(call.params, json!({}));
    }

    #[test]
    fn test_legacy_skips_literal_params_tag_name() {
        let text = "<tool><params>not json</params></tool>";
        let call = parse_call(text, &names(&["tool"])).unwrap();
        // The params block wins; it is never read as a legacy key
        assert_eq!(call.params, json!({ "value": "not json" }));
    }
}
