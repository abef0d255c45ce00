//! HTML helpers: prompt-sized compaction, truncation, and artifact naming.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

/// Marker appended to text cut at the prompt budget.
pub const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// Reduce a page to the markup worth showing a model: the `<body>` element
/// without scripts, styles, inline SVG, or comments, and with inter-tag
/// whitespace collapsed.
pub fn compact_html(html: &str) -> String {
    static NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<(script|style|noscript|svg|template)\b[^>]*>.*?</(script|style|noscript|svg|template)\s*>")
            .expect("valid regex")
    });
    static COMMENT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
    static GAP_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r">\s+<").expect("valid regex"));

    let body = body_html(html);
    let without_noise = NOISE_RE.replace_all(&body, "");
    let without_comments = COMMENT_RE.replace_all(&without_noise, "");
    GAP_RE
        .replace_all(&without_comments, "><")
        .trim()
        .to_string()
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{TRUNCATION_MARKER}", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Compact then truncate: the form in which a page is embedded in prompts.
pub fn prepare_for_prompt(html: &str, max_chars: usize) -> String {
    truncate_chars(&compact_html(html), max_chars)
}

/// Visible text of a page, whitespace-normalized.
pub fn text_content(html: &str) -> String {
    let doc = Html::parse_document(&compact_html(html));
    doc.root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// File stem for per-document artifacts: `.html`/`.htm` stripped, anything
/// outside word characters, `-`, and `.` replaced with `_`.
pub fn result_stem(name: &str) -> String {
    static UNSAFE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^\w\-.]").expect("valid regex"));

    let lower = name.to_ascii_lowercase();
    let stem = if lower.ends_with(".html") {
        &name[..name.len() - 5]
    } else if lower.ends_with(".htm") {
        &name[..name.len() - 4]
    } else {
        name
    };

    let cleaned = UNSAFE_RE.replace_all(stem, "_");
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned.into_owned()
    }
}

/// [`result_stem`] for a whole batch, made unique in order.
///
/// A stem already taken (compared case-insensitively) gets `_2`, `_3`, ...
/// appended, so no two documents share a result file.
pub fn unique_result_stems<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut taken = HashSet::new();
    names
        .iter()
        .map(|name| {
            let stem = result_stem(name.as_ref());
            let mut candidate = stem.clone();
            let mut n = 1;
            while !taken.insert(candidate.to_lowercase()) {
                n += 1;
                candidate = format!("{stem}_{n}");
            }
            candidate
        })
        .collect()
}

fn body_html(html: &str) -> String {
    let doc = Html::parse_document(html);
    let Ok(body_sel) = Selector::parse("body") else {
        return html.to_string();
    };

    match doc.select(&body_sel).next() {
        Some(body) => body.html(),
        None => html.to_string(),
    }
}
