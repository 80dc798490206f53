use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::CrawlError;

/// Everything the parser needs from one HTTP GET: the body bytes plus the
/// handful of headers the core cares about (`Content-Location`, repeated
/// `Link:` headers for WordPress detection).
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    /// The URL the response actually came from, after redirects.
    pub effective_url: String,
    /// Lowercased header name -> value, first occurrence wins (used for
    /// `Content-Location`).
    pub headers: HashMap<String, String>,
    /// Every `Link:` header value verbatim, in order — `Link` can repeat and
    /// a single value can itself contain multiple comma-separated entries.
    pub link_headers: Vec<String>,
    pub body: Vec<u8>,
}

/// Abstracts the HTTP transport so strategies and the orchestrator can be
/// unit-tested against a `MockFetcher` instead of a live server.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Issues a GET request. Returns `Ok` for any response regardless of
    /// status code; callers that need to tolerate 404 (WordPress pagination)
    /// inspect `FetchedResponse::status` themselves and convert a
    /// non-tolerated status to `CrawlError::UnexpectedStatus`.
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<FetchedResponse, CrawlError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, request_timeout: Duration) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Routes every request through a feed's configured proxy by prepending the
/// proxy's base URL to the requested one, mirroring the original crawler's
/// `FeedDocument(url, proxy)` constructor. The requested URL keeps its own
/// identity for parsing purposes — only the address actually dialed changes.
pub struct ProxyFetcher<'a> {
    inner: &'a dyn Fetcher,
    proxy_url: &'a str,
}

impl<'a> ProxyFetcher<'a> {
    pub fn new(inner: &'a dyn Fetcher, proxy_url: &'a str) -> Self {
        Self { inner, proxy_url }
    }
}

#[async_trait]
impl<'a> Fetcher for ProxyFetcher<'a> {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<FetchedResponse, CrawlError> {
        let proxied = format!("{}{}", self.proxy_url, url);
        self.inner.get(&proxied, headers).await
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<FetchedResponse, CrawlError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let effective_url = response.url().to_string();

        let mut header_map = HashMap::new();
        let mut link_headers = Vec::new();
        for (name, value) in response.headers().iter() {
            let name_lower = name.as_str().to_ascii_lowercase();
            if let Ok(value_str) = value.to_str() {
                if name_lower == "link" {
                    link_headers.push(value_str.to_string());
                }
                header_map.entry(name_lower).or_insert_with(|| value_str.to_string());
            }
        }
        header_map
            .entry("content-location".to_string())
            .or_insert_with(|| effective_url.clone());

        let body = response.bytes().await?.to_vec();

        Ok(FetchedResponse {
            status,
            effective_url,
            headers: header_map,
            link_headers,
            body,
        })
    }
}
