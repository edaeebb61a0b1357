//! Per-request routing: archive first, one legacy hop on failure, then
//! Content-Type inference and header finalization.

use crate::common::{ProxyBody, ResponseBuilder};
use crate::config::ProxyConfiguration;
use crate::content_type::MimeTable;
use crate::error::ProxyError;
use crate::finalizer;
use crate::legacy::{LegacyFallback, LegacyTier};
use crate::request::InboundRequest;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::fmt;
use std::net::SocketAddr;

/// Which tier's response went back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackDecision {
    Archive,
    Legacy(LegacyTier),
    /// The legacy hop failed. The archive response stands, or a synthetic
    /// 502 when the legacy request could not be built.
    OriginalFailure,
}

impl fmt::Display for FallbackDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackDecision::Archive => write!(f, "archive"),
            FallbackDecision::Legacy(tier) => write!(f, "{} legacy", tier),
            FallbackDecision::OriginalFailure => write!(f, "archive (legacy failed)"),
        }
    }
}

pub struct ProxyRouter {
    archive_addr: SocketAddr,
    archive_client: Client<HttpConnector, Full<Bytes>>,
    fallback: LegacyFallback,
    mime_table: MimeTable,
}

impl ProxyRouter {
    pub fn new(config: &ProxyConfiguration, fallback: LegacyFallback) -> Self {
        Self::with_parts(config.archive_addr(), fallback, MimeTable::from_config(config))
    }

    pub fn with_parts(archive_addr: SocketAddr, fallback: LegacyFallback, mime_table: MimeTable) -> Self {
        let archive_client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            archive_addr,
            archive_client,
            fallback,
            mime_table,
        }
    }

    /// Serves a request received in plain HTTP proxy form.
    pub async fn serve_proxy_request<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: fmt::Display,
    {
        match InboundRequest::from_proxy_request(req).await {
            Ok(inbound) => self.route(&inbound).await,
            Err(e) => {
                log::warn!("Rejected proxy request: {}", e);
                ResponseBuilder::from_error(&e)
            }
        }
    }

    /// Serves a request read from an intercepted CONNECT tunnel.
    pub async fn serve_tunneled_request<B>(&self, req: Request<B>, authority: &str) -> Response<ProxyBody>
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: fmt::Display,
    {
        match InboundRequest::from_tunneled_request(req, authority).await {
            Ok(inbound) => self.route(&inbound).await,
            Err(e) => {
                log::warn!("Rejected tunneled request for {}: {}", authority, e);
                ResponseBuilder::from_error(&e)
            }
        }
    }

    pub async fn route(&self, request: &InboundRequest) -> Response<ProxyBody> {
        self.route_with_decision(request).await.0
    }

    pub async fn route_with_decision(&self, request: &InboundRequest) -> (Response<ProxyBody>, FallbackDecision) {
        let (mut response, decision) = self.dispatch(request).await;
        log::debug!("{} -> {} from {}", request, response.status(), decision);

        self.mime_table.apply(request.path(), &mut response);
        finalizer::finalize(request.headers(), &mut response);
        (response, decision)
    }

    async fn dispatch(&self, request: &InboundRequest) -> (Response<ProxyBody>, FallbackDecision) {
        let archive_response = self.fetch_archive(request).await;
        let status = archive_response.status();

        if status.is_server_error() {
            log::warn!("Archive server error {} for {}", status, request);
        }
        if status.as_u16() < 400 {
            return (archive_response, FallbackDecision::Archive);
        }

        let legacy_request = match request.legacy_request() {
            Ok(legacy_request) => legacy_request,
            Err(e) => {
                log::error!("Request build error for legacy tier: {}", e);
                return (ResponseBuilder::proxy_error(&e.to_string()), FallbackDecision::OriginalFailure);
            }
        };

        let tier = self.fallback.tier();
        match self.fallback.serve(legacy_request).await {
            Ok(response) => (response, FallbackDecision::Legacy(tier)),
            Err(e) => {
                match (tier, &e) {
                    (LegacyTier::Internal, _) => {
                        log::error!("Internal legacy dispatch failed for {}: {}", request, e)
                    }
                    (LegacyTier::External, ProxyError::Timeout(_)) => {
                        log::error!("External legacy server timed out for {}: {}", request, e)
                    }
                    (LegacyTier::External, _) => log::error!("External legacy error for {}: {}", request, e),
                }
                (archive_response, FallbackDecision::OriginalFailure)
            }
        }
    }

    /// Archive attempt. Build and transport failures become a synthetic 502
    /// so they take the same fallback hop as an archive-reported error.
    async fn fetch_archive(&self, request: &InboundRequest) -> Response<ProxyBody> {
        let archive_request = match request.archive_request(self.archive_addr) {
            Ok(archive_request) => archive_request,
            Err(e) => {
                log::error!("Request build error for archive: {}", e);
                return ResponseBuilder::proxy_error(&e.to_string());
            }
        };

        match self.archive_client.request(archive_request).await {
            Ok(response) => response.map(|body| body.boxed()),
            Err(e) => {
                log::error!("Archive transport error for {}: {}", request, e);
                ResponseBuilder::proxy_error("content archive unreachable")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::ResponseRecorder;
    use hyper::header::HeaderMap;
    use hyper::header::CONTENT_TYPE;
    use hyper::{Method, StatusCode};

    fn inbound(path: &str) -> InboundRequest {
        InboundRequest::new(Method::GET, "game.example", path, None, HeaderMap::new(), Bytes::new()).unwrap()
    }

    async fn unused_addr() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[test]
    fn test_decision_display() {
        assert_eq!(FallbackDecision::Archive.to_string(), "archive");
        assert_eq!(FallbackDecision::Legacy(LegacyTier::Internal).to_string(), "internal legacy");
    }

    #[tokio::test]
    async fn test_unreachable_archive_takes_the_fallback_hop() {
        let fallback = LegacyFallback::internal(|recorder: &mut ResponseRecorder, _: &Request<Bytes>| {
            recorder.write(b"from legacy");
        });
        let router = ProxyRouter::with_parts(unused_addr().await, fallback, MimeTable::default());

        let (response, decision) = router.route_with_decision(&inbound("/index.html")).await;
        assert_eq!(decision, FallbackDecision::Legacy(LegacyTier::Internal));
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"from legacy");
    }

    #[tokio::test]
    async fn test_both_tiers_down_returns_synthetic_502() {
        let fallback = LegacyFallback::external(unused_addr().await.port()).unwrap();
        let router = ProxyRouter::with_parts(unused_addr().await, fallback, MimeTable::default());

        let (response, decision) = router.route_with_decision(&inbound("/index.html")).await;
        assert_eq!(decision, FallbackDecision::OriginalFailure);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_resolver_runs_on_the_legacy_response() {
        let fallback = LegacyFallback::internal(|recorder: &mut ResponseRecorder, _: &Request<Bytes>| {
            recorder.write(b"{}");
        });
        let mut mime_types = std::collections::HashMap::new();
        mime_types.insert("json".to_string(), "application/json".to_string());
        let router = ProxyRouter::with_parts(unused_addr().await, fallback, MimeTable::new(mime_types, Vec::new()));

        let response = router.route(&inbound("/data/level.json")).await;
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }
}
