//! reqwest-backed fetcher for the resource cache.
//!
//! ### Request shape
//! - Plain GET, no conditional headers
//! - Redirects followed up to `max_redirects` (default: 5)
//! - gzip, brotli and deflate bodies decoded transparently
//!
//! ### Response handling
//! - Non-success statuses are handed back to the cache, not turned into errors
//! - `max-age` read from every Cache-Control header, first match wins
//! - Body streamed chunk by chunk; the cache enforces the byte limit

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, header};
use url::Url;

use hoard_core::cache::{FetchResponse, Fetcher, parse_max_age};
use hoard_core::{AppConfig, Error};

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "hoard/<version>")
    pub user_agent: String,

    /// Request timeout, covering connect through the last body byte (default: 30s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("hoard/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_millis(30_000),
            max_redirects: 5,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self { user_agent: config.user_agent.clone(), timeout: config.timeout(), ..Self::default() }
    }
}

/// HTTP client that feeds the resource cache.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::UpstreamError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Create a fetcher from the application configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        Self::new(FetchConfig::from(config))
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn send(&self, url: &Url) -> Result<FetchResponse, Error> {
        let response = self.http.get(url.as_str()).send().await.map_err(|e| transport_error(url, &e))?;

        let status = response.status().as_u16();
        let max_age = response
            .headers()
            .get_all(header::CACHE_CONTROL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(parse_max_age);
        let content_length = response.content_length();

        tracing::debug!(
            url = %url,
            final_url = %response.url(),
            status,
            max_age,
            content_length,
            "Received response headers"
        );

        let body_url = url.clone();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| transport_error(&body_url, &e)))
            .boxed();

        Ok(FetchResponse { status, max_age, content_length, body })
    }
}

fn transport_error(url: &Url, err: &reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::FetchTimeout(format!("{url}: {err}"))
    } else {
        Error::UpstreamError(format!("{url}: network error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(response: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await.unwrap();
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        Url::parse(&format!("http://{addr}/asset.txt")).unwrap()
    }

    async fn collect(response: FetchResponse) -> Vec<u8> {
        let mut body = response.body;
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk.unwrap());
        }
        bytes
    }

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert!(config.user_agent.starts_with("hoard/"));
        assert_eq!(config.timeout, Duration::from_millis(30_000));
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_fetch_config_from_app_config() {
        let app = AppConfig { user_agent: "tester/1.0".into(), timeout_ms: 1_500, ..Default::default() };
        let config = FetchConfig::from(&app);
        assert_eq!(config.user_agent, "tester/1.0");
        assert_eq!(config.timeout, Duration::from_millis(1_500));
        assert_eq!(config.max_redirects, 5);
    }

    #[tokio::test]
    async fn test_http_fetcher_new() {
        assert!(HttpFetcher::new(FetchConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_send_reads_status_max_age_and_body() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nCache-Control: public, max-age=120\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let fetcher = HttpFetcher::new(FetchConfig::default()).unwrap();

        let response = fetcher.send(&url).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.max_age, Some(120));
        assert_eq!(response.content_length, Some(5));
        assert_eq!(collect(response).await, b"hello");
    }

    #[tokio::test]
    async fn test_send_passes_error_status_through() {
        let url = serve_once("HTTP/1.1 404 Not Found\r\nContent-Length: 4\r\nConnection: close\r\n\r\ngone").await;
        let fetcher = HttpFetcher::new(FetchConfig::default()).unwrap();

        let response = fetcher.send(&url).await.unwrap();

        assert_eq!(response.status, 404);
        assert!(!response.is_success());
        assert_eq!(response.max_age, None);
    }

    #[tokio::test]
    async fn test_send_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let url = Url::parse(&format!("http://{addr}/slow.bin")).unwrap();
        let config = FetchConfig { timeout: Duration::from_millis(100), ..FetchConfig::default() };
        let fetcher = HttpFetcher::new(config).unwrap();

        let result = fetcher.send(&url).await;

        assert!(matches!(result, Err(Error::FetchTimeout(_))));
    }

    #[tokio::test]
    async fn test_send_reports_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = Url::parse(&format!("http://{addr}/missing.txt")).unwrap();
        let fetcher = HttpFetcher::new(FetchConfig::default()).unwrap();

        let result = fetcher.send(&url).await;

        assert!(matches!(result, Err(Error::UpstreamError(_))));
    }
}
