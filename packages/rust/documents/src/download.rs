//! Downloading a URL batch into a local directory, reusing earlier downloads.

use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use extractflow_shared::{DownloadConfig, ExtractflowError, InputDocument, Result};

use crate::urls::filenames_for;

/// Maximum number of redirects to follow per download.
const MAX_REDIRECTS: usize = 10;

/// User-Agent string for download requests.
const USER_AGENT: &str = concat!("Mozilla/5.0 (compatible; extractflow/", env!("CARGO_PKG_VERSION"), ")");

/// HTTP downloader with per-URL retry and exponential backoff.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    config: DownloadConfig,
}

impl Downloader {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExtractflowError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Fetch one page, retrying transient failures.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> Result<String> {
        let attempts = self.config.retries.max(1);
        let mut attempt = 1;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => {
                    info!(chars = body.len(), "downloaded");
                    return Ok(body);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = Duration::from_millis(self.config.delay_ms)
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(attempt, attempts, error = %e, ?delay, "download failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| ExtractflowError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractflowError::Api {
                status: status.as_u16(),
                message: format!("{url}: HTTP {status}"),
            });
        }

        response
            .text()
            .await
            .map_err(|e| ExtractflowError::Network(format!("{url}: failed to read body: {e}")))
    }

    /// Download every URL into `dir`, returning documents in list order.
    ///
    /// A file already present from an earlier run is reused instead of
    /// fetched again. URLs that still fail after retrying are skipped.
    #[instrument(skip_all, fields(count = urls.len(), dir = %dir.display()))]
    pub async fn download_all(&self, urls: &[Url], dir: &Path) -> Result<Vec<InputDocument>> {
        std::fs::create_dir_all(dir).map_err(|e| ExtractflowError::io(dir, e))?;

        let names = filenames_for(urls);
        let mut documents = Vec::with_capacity(urls.len());
        let mut fetched_any = false;

        for (i, (url, name)) in urls.iter().zip(names).enumerate() {
            let path = dir.join(&name);

            if path.is_file() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => {
                        debug!(%url, file = %name, "reusing downloaded page");
                        documents.push(InputDocument {
                            identifier: url.to_string(),
                            name,
                            path: Some(path),
                            content,
                        });
                        continue;
                    }
                    Err(e) => warn!(file = %name, error = %e, "cannot reuse download, fetching again"),
                }
            }

            if fetched_any && self.config.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
            }
            fetched_any = true;

            info!(index = i + 1, total = urls.len(), %url, "downloading");
            let content = match self.fetch(url).await {
                Ok(c) => c,
                Err(e) => {
                    error!(%url, error = %e, "skipping URL after download failure");
                    continue;
                }
            };

            std::fs::write(&path, &content).map_err(|e| ExtractflowError::io(&path, e))?;
            documents.push(InputDocument {
                identifier: url.to_string(),
                name,
                path: Some(path),
                content,
            });
        }

        info!(downloaded = documents.len(), requested = urls.len(), "download complete");
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> DownloadConfig {
        DownloadConfig {
            timeout_secs: 5,
            retries: 3,
            delay_ms: 0,
        }
    }

    fn temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ef-download-{}", uuid::Uuid::now_v7()))
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/flaky-page"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky-page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let downloader = Downloader::new(&fast_config()).unwrap();
        let url = Url::parse(&format!("{}/flaky-page", server.uri())).unwrap();
        let body = downloader.fetch(&url).await.unwrap();
        assert_eq!(body, "<html>ok</html>");
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let downloader = Downloader::new(&fast_config()).unwrap();
        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let err = downloader.fetch(&url).await.unwrap_err();
        assert!(matches!(err, ExtractflowError::Api { status: 404, .. }));
    }

    #[tokio::test]
    async fn download_all_reuses_existing_files_and_skips_failures() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/posts/first-article"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>first</p>"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/posts/broken-article"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let dir = temp_dir();
        let urls = vec![
            Url::parse(&format!("{}/posts/first-article", server.uri())).unwrap(),
            Url::parse(&format!("{}/posts/broken-article", server.uri())).unwrap(),
        ];
        let downloader = Downloader::new(&fast_config()).unwrap();

        let docs = downloader.download_all(&urls, &dir).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "first-article.html");
        assert_eq!(docs[0].identifier, urls[0].to_string());
        assert!(dir.join("first-article.html").is_file());

        // Second pass is served from disk; the mock's expect(1) verifies it.
        let again = downloader.download_all(&urls, &dir).await.unwrap();
        assert_eq!(again[0].content, "<p>first</p>");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
