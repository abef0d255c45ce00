//! Pulling JSON and code out of free-form model responses.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use extractflow_shared::Decoded;

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid regex"));

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:python3|python|py)?[ \t]*\r?\n?(.*?)```").expect("valid regex")
});

/// Find a JSON object in `text`: the whole text, a ```json fence, or the
/// outermost `{...}` span, in that order.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(fenced) = JSON_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        if let Ok(value) = serde_json::from_str::<Value>(fenced.as_str()) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Decode a response into `T`, keeping the text verbatim when it holds no
/// usable JSON.
pub fn decode_response<T: DeserializeOwned>(text: &str) -> Decoded<T> {
    match extract_json(text) {
        Some(value) => Decoded::from_value(value),
        None => {
            tracing::warn!(chars = text.len(), "response is not JSON, keeping raw text");
            Decoded::raw(text)
        }
    }
}

/// The first fenced code block of `text`, or the whole text trimmed.
pub fn extract_code(text: &str) -> String {
    CODE_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
        .trim()
        .to_string()
}

/// Bullet lines of a review, outside any code block.
pub fn bullet_points(text: &str) -> Vec<String> {
    let mut in_fence = false;
    let mut bullets = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
            if !rest.trim().is_empty() {
                bullets.push(rest.trim().to_string());
            }
        }
    }
    bullets
}

#[cfg(test)]
mod tests {
    use super::*;
    use extractflow_shared::Synthesis;
    use serde_json::json;

    #[test]
    fn plain_json_is_parsed() {
        assert_eq!(extract_json(" {\"a\": 1} "), Some(json!({"a": 1})));
    }

    #[test]
    fn fenced_json_is_parsed() {
        let text = "Here you go:\n```json\n{\"sections\": []}\n```\nDone.";
        assert_eq!(extract_json(text), Some(json!({"sections": []})));
    }

    #[test]
    fn embedded_object_is_parsed() {
        let text = "The schema is {\"schema_version\": \"1.0\", \"sections\": [{\"name\": \"t\"}]} as requested";
        assert_eq!(
            extract_json(text),
            Some(json!({"schema_version": "1.0", "sections": [{"name": "t"}]}))
        );
    }

    #[test]
    fn prose_has_no_json() {
        assert_eq!(extract_json("I could not analyze this page."), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn decode_falls_back_to_raw() {
        let decoded: Decoded<Synthesis> = decode_response("no structure here");
        assert_eq!(decoded, Decoded::raw("no structure here"));

        let decoded: Decoded<Synthesis> =
            decode_response("```json\n{\"common_patterns\": [\"article\"]}\n```");
        let synthesis = decoded.structured().unwrap();
        assert_eq!(synthesis.common_patterns, vec![json!("article")]);
    }

    #[test]
    fn code_is_taken_from_the_first_fence() {
        let text = "Sure!\n```python\nclass HTMLExtractor:\n    pass\n```\nNotes: ```other```";
        assert_eq!(extract_code(text), "class HTMLExtractor:\n    pass");

        let bare = "```\nx = 1\n```";
        assert_eq!(extract_code(bare), "x = 1");

        assert_eq!(extract_code("  x = 2\n"), "x = 2");
    }

    #[test]
    fn bullets_skip_code_blocks() {
        let review = "Changes:\n- added try/except\n* fixed imports\n```python\n- not a bullet\n```\n-\n";
        assert_eq!(
            bullet_points(review),
            vec!["added try/except".to_string(), "fixed imports".to_string()]
        );
    }
}
