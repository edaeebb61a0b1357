//! Inbound client requests and the downstream requests derived from them.
//!
//! The target host comes from an absolute-form URI, the Host header or the
//! CONNECT authority, always without its port. The archive request goes to
//! `/content/{host}{path}` on the loopback archive; the legacy request keeps
//! the original `http://{host}{path}` target.

use crate::error::ProxyError;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HOST, HeaderMap};
use hyper::{Method, Request, Uri};
use std::fmt;
use std::net::SocketAddr;

/// A client request with its body read once into memory.
///
/// Up to three downstream attempts need the body (archive, then one legacy
/// tier), so it is buffered at ingress and every attempt gets its own view.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    method: Method,
    host: String,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
}

impl InboundRequest {
    pub fn new(
        method: Method,
        host: &str,
        path: &str,
        query: Option<&str>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Self, ProxyError> {
        let host = strip_port(host.trim());
        if host.is_empty() {
            return Err(ProxyError::RequestBuild("Cannot determine target host".to_string()));
        }
        let path = if path.is_empty() { "/" } else { path };

        Ok(Self {
            method,
            host: host.to_string(),
            path: path.to_string(),
            query: query.map(str::to_string),
            headers,
            body,
        })
    }

    /// Plain proxy request: absolute-form URI, or origin-form plus Host.
    pub async fn from_proxy_request<B>(req: Request<B>) -> Result<Self, ProxyError>
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: fmt::Display,
    {
        let host = match req.uri().host() {
            Some(host) => host.to_string(),
            None => host_header(req.headers())?,
        };
        Self::buffer(req, &host).await
    }

    /// Request read inside an intercepted CONNECT tunnel. The target is the
    /// tunnel's authority; the Host header is used when it is missing.
    pub async fn from_tunneled_request<B>(req: Request<B>, authority: &str) -> Result<Self, ProxyError>
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: fmt::Display,
    {
        let host = if authority.trim().is_empty() {
            host_header(req.headers())?
        } else {
            authority.to_string()
        };
        Self::buffer(req, &host).await
    }

    async fn buffer<B>(req: Request<B>, host: &str) -> Result<Self, ProxyError>
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: fmt::Display,
    {
        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| ProxyError::Http(format!("Failed to read request body: {}", e)))?
            .to_bytes();

        Self::new(
            parts.method,
            host,
            parts.uri.path(),
            parts.uri.query(),
            parts.headers,
            body,
        )
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A new, independent body over the buffered bytes.
    pub fn fresh_body(&self) -> Full<Bytes> {
        Full::new(self.body.clone())
    }

    fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    pub fn archive_uri(&self, archive_addr: SocketAddr) -> Result<Uri, ProxyError> {
        format!("http://{}/content/{}{}", archive_addr, self.host, self.path_and_query())
            .parse::<Uri>()
            .map_err(|e| ProxyError::RequestBuild(format!("Invalid archive URI for {}: {}", self, e)))
    }

    pub fn legacy_uri(&self) -> Result<Uri, ProxyError> {
        format!("http://{}{}", self.host, self.path_and_query())
            .parse::<Uri>()
            .map_err(|e| ProxyError::RequestBuild(format!("Invalid legacy URI for {}: {}", self, e)))
    }

    /// Request for the content archive: same method, headers and body,
    /// path rewritten to `content/{host}{path}`.
    pub fn archive_request(&self, archive_addr: SocketAddr) -> Result<Request<Full<Bytes>>, ProxyError> {
        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(self.archive_uri(archive_addr)?)
            .body(self.fresh_body())?;
        *request.headers_mut() = self.headers.clone();
        Ok(request)
    }

    /// Request for a legacy tier, identical to the original over plain http.
    pub fn legacy_request(&self) -> Result<Request<Bytes>, ProxyError> {
        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(self.legacy_uri()?)
            .body(self.body.clone())?;
        *request.headers_mut() = self.headers.clone();
        Ok(request)
    }
}

impl fmt::Display for InboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} http://{}{}", self.method, self.host, self.path_and_query())
    }
}

fn host_header(headers: &HeaderMap) -> Result<String, ProxyError> {
    headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ProxyError::RequestBuild("Cannot determine target host".to_string()))
}

/// Drops a trailing `:port`. Bracketed IPv6 literals keep their brackets.
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.split_once(':') {
        Some((name, _)) => name,
        None => host,
    }
}
