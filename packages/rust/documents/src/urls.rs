//! URL list parsing and URL-derived file naming.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};
use url::Url;

use extractflow_shared::{ExtractflowError, Result};

/// Parse a URL list: one URL per line, blank lines and `#` comments ignored.
/// Lines that are not absolute URLs with a host are skipped with a warning.
pub fn parse_url_list(content: &str) -> Vec<Url> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match Url::parse(line) {
            Ok(url) if url.host_str().is_some() => Some(url),
            _ => {
                warn!(line, "invalid URL format, skipping");
                None
            }
        })
        .collect()
}

/// Read and parse a URL list file.
pub fn load_url_list(path: &Path) -> Result<Vec<Url>> {
    let content = std::fs::read_to_string(path).map_err(|e| ExtractflowError::io(path, e))?;
    let urls = parse_url_list(&content);
    info!(count = urls.len(), path = %path.display(), "loaded URL list");
    Ok(urls)
}

/// Deterministic `.html` file names for a batch of URLs.
///
/// The last path segment is used (joined with the previous one when it is
/// shorter than five characters); a URL without a path falls back to the
/// host. Collisions within the batch get a numeric suffix in list order, so
/// the same list always maps to the same names.
pub fn filenames_for(urls: &[Url]) -> Vec<String> {
    let mut taken = HashSet::new();
    urls.iter()
        .enumerate()
        .map(|(i, url)| {
            let base = base_name(url, i + 1);
            let mut candidate = format!("{base}.html");
            let mut counter = 1;
            while !taken.insert(candidate.clone()) {
                candidate = format!("{base}_{counter}.html");
                counter += 1;
            }
            candidate
        })
        .collect()
}

fn base_name(url: &Url, index: usize) -> String {
    static UNSAFE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^\w\-.]").expect("valid regex"));

    let parts: Vec<&str> = url
        .path_segments()
        .map(|segs| segs.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let raw = match parts.as_slice() {
        [] => format!(
            "{}_{index:03}",
            url.host_str().unwrap_or("page").replace('.', "_")
        ),
        [only] => (*only).to_string(),
        [.., prev, last] if last.chars().count() < 5 => format!("{prev}_{last}"),
        [.., last] => (*last).to_string(),
    };

    let sanitized = UNSAFE_RE.replace_all(&raw, "_");
    let stem = sanitized
        .strip_suffix(".html")
        .or_else(|| sanitized.strip_suffix(".htm"))
        .unwrap_or(sanitized.as_ref());

    if stem.chars().count() < 3 {
        format!("page_{index:03}")
    } else {
        stem.to_string()
    }
}
