//! Object-safe HTTP transport seam.
//!
//! The upload pipeline issues three kinds of calls: entity/task reads,
//! create/cancel posts, and byte-range piece writes. [`Transport`] covers
//! exactly those, so tests can substitute a scripted implementation the way
//! the production code substitutes [`HttpTransport`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use tracing::debug;

use crate::ApiError;

/// Boxed future returned by [`Transport`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Byte range carried by one piece PUT.
///
/// Renders as `bytes <start>-<end>/<total>`, where `end` is inclusive and
/// `total` is the size of the logical remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// Abstract connection to the remote API.
pub trait Transport: Send + Sync {
    /// Issues a GET against `href` and returns the response body.
    fn get(&self, href: &str) -> BoxFuture<'_, Result<String, ApiError>>;

    /// Issues a POST with an XML body and returns the response body.
    fn post(
        &self,
        href: &str,
        content_type: &str,
        body: String,
    ) -> BoxFuture<'_, Result<String, ApiError>>;

    /// Writes one piece to an upload endpoint with an explicit byte range.
    fn put_piece(
        &self,
        href: &str,
        range: ContentRange,
        data: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), ApiError>>;
}

/// [`Transport`] implementation over `reqwest`.
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Wraps a preconfigured client (proxies, custom TLS, timeouts).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn get(&self, href: &str) -> BoxFuture<'_, Result<String, ApiError>> {
        let req = self.http.get(href).header(ACCEPT, "application/*+xml");
        Box::pin(async move {
            let resp = req.send().await?;
            read_body(resp).await
        })
    }

    fn post(
        &self,
        href: &str,
        content_type: &str,
        body: String,
    ) -> BoxFuture<'_, Result<String, ApiError>> {
        debug!(href, content_type, "POST");
        let req = self
            .http
            .post(href)
            .header(ACCEPT, "application/*+xml")
            .header(CONTENT_TYPE, content_type.to_string())
            .body(body);
        Box::pin(async move {
            let resp = req.send().await?;
            read_body(resp).await
        })
    }

    fn put_piece(
        &self,
        href: &str,
        range: ContentRange,
        data: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), ApiError>> {
        debug!(href, %range, len = data.len(), "PUT piece");
        let req = self
            .http
            .put(href)
            .header(CONTENT_LENGTH, data.len() as u64)
            .header(CONTENT_RANGE, range.to_string())
            .body(data);
        Box::pin(async move {
            let resp = req.send().await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(ApiError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok(())
        })
    }
}

async fn read_body(resp: reqwest::Response) -> Result<String, ApiError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.text().await?)
}
