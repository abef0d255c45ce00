//! Input batch loading for extractflow.
//!
//! A batch directory holds either a `urls.txt` list (downloaded on first use
//! into the output root's `downloaded_html/`), an `html/` subdirectory, or
//! HTML files directly. Documents are always returned sorted by file name so
//! the same directory yields the same `file_identifiers` on every run.

pub mod download;
pub mod html;
pub mod urls;

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use extractflow_shared::{DownloadConfig, ExtractflowError, InputDocument, Result};

pub use download::Downloader;
pub use html::{
    compact_html, prepare_for_prompt, result_stem, text_content, truncate_chars,
    unique_result_stems,
};
pub use urls::{filenames_for, load_url_list, parse_url_list};

/// URL list file name inside a batch directory.
pub const URL_LIST_FILE: &str = "urls.txt";

/// Subdirectory of a batch directory holding pre-fetched pages.
pub const HTML_SUBDIR: &str = "html";

/// Directory under the output root where URL batches are downloaded.
pub const DOWNLOAD_DIR: &str = "downloaded_html";

/// Where a batch directory's documents come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSource {
    UrlList(PathBuf),
    HtmlDir(PathBuf),
}

/// Decide how to read the batch at `dir`.
pub fn detect_source(dir: &Path) -> Result<BatchSource> {
    if !dir.is_dir() {
        return Err(ExtractflowError::validation(format!(
            "input directory does not exist: {}",
            dir.display()
        )));
    }

    let url_list = dir.join(URL_LIST_FILE);
    if url_list.is_file() {
        return Ok(BatchSource::UrlList(url_list));
    }

    let html_dir = dir.join(HTML_SUBDIR);
    if html_dir.is_dir() {
        return Ok(BatchSource::HtmlDir(html_dir));
    }

    Ok(BatchSource::HtmlDir(dir.to_path_buf()))
}

/// Load every document of the batch at `dir`.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub async fn load_batch(
    dir: &Path,
    download_dir: &Path,
    config: &DownloadConfig,
) -> Result<Vec<InputDocument>> {
    match detect_source(dir)? {
        BatchSource::UrlList(list) => {
            let urls = load_url_list(&list)?;
            let downloader = Downloader::new(config)?;
            downloader.download_all(&urls, download_dir).await
        }
        BatchSource::HtmlDir(html_dir) => load_html_dir(&html_dir),
    }
}

/// Read all `.html`/`.htm` files of a directory, sorted by file name.
///
/// Identifiers are canonical absolute paths, so `input`, `./input` and
/// `/abs/input` name the same batch.
pub fn load_html_dir(dir: &Path) -> Result<Vec<InputDocument>> {
    let dir = std::fs::canonicalize(dir).map_err(|e| ExtractflowError::io(dir, e))?;
    let entries = std::fs::read_dir(&dir).map_err(|e| ExtractflowError::io(&dir, e))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_html(p))
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable document");
                continue;
            }
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        documents.push(InputDocument {
            identifier: path.display().to_string(),
            name,
            path: Some(path),
            content,
        });
    }

    info!(count = documents.len(), dir = %dir.display(), "loaded HTML documents");
    Ok(documents)
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
}
