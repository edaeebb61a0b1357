//! Legacy serving tier, tried once when the archive answers with a 4xx/5xx.
//!
//! Two strategies exist and one is chosen at startup: an in-process
//! dispatcher writing into a [`ResponseRecorder`], or a reverse proxy to an
//! external legacy server listening on a loopback port.

use crate::common::ProxyBody;
use crate::config::ProxyConfiguration;
use crate::connector::LoopbackConnector;
use crate::error::ProxyError;
use crate::htdocs::HtdocsDispatcher;
use crate::recorder::ResponseRecorder;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const LEGACY_DIAL_TIMEOUT: Duration = Duration::from_secs(30);
pub const LEGACY_KEEP_ALIVE: Duration = Duration::from_secs(30);
pub const LEGACY_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// In-process handler for legacy requests.
///
/// Called on the blocking pool with a fresh recorder per request.
pub trait LegacyDispatcher: Send + Sync + 'static {
    fn dispatch(&self, recorder: &mut ResponseRecorder, request: &Request<Bytes>);
}

impl<F> LegacyDispatcher for F
where
    F: Fn(&mut ResponseRecorder, &Request<Bytes>) + Send + Sync + 'static,
{
    fn dispatch(&self, recorder: &mut ResponseRecorder, request: &Request<Bytes>) {
        self(recorder, request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyTier {
    Internal,
    External,
}

impl fmt::Display for LegacyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegacyTier::Internal => write!(f, "internal"),
            LegacyTier::External => write!(f, "external"),
        }
    }
}

/// Reverse proxy to the external legacy server. Every connection goes to
/// the loopback port, whatever host the request names.
#[derive(Clone)]
pub struct ExternalLegacy {
    client: Client<LoopbackConnector, Full<Bytes>>,
    port: u16,
}

impl ExternalLegacy {
    pub fn new(port: u16) -> Result<Self, ProxyError> {
        let connector = LoopbackConnector::new(port, LEGACY_DIAL_TIMEOUT, LEGACY_KEEP_ALIVE)?;
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(LEGACY_KEEP_ALIVE)
            .pool_timer(TokioTimer::new())
            .build(connector);
        Ok(Self { client, port })
    }

    async fn serve(&self, request: Request<Bytes>) -> Result<Response<ProxyBody>, ProxyError> {
        let request = request.map(Full::new);
        let pending = self.client.request(request);

        let response = tokio::time::timeout(LEGACY_REQUEST_TIMEOUT, pending)
            .await
            .map_err(|_| ProxyError::Timeout(LEGACY_REQUEST_TIMEOUT.as_secs()))?
            .map_err(|e| {
                ProxyError::Connection(format!("External legacy server on port {}: {}", self.port, e))
            })?;

        Ok(response.map(|body| body.boxed()))
    }
}

#[derive(Clone)]
pub enum LegacyFallback {
    Internal(Arc<dyn LegacyDispatcher>),
    External(ExternalLegacy),
}

impl LegacyFallback {
    pub fn from_config(config: &ProxyConfiguration) -> Result<Self, ProxyError> {
        if config.handle_legacy_requests {
            log::info!(
                "Legacy requests handled in-process from {}",
                config.legacy_htdocs_path.display()
            );
            Ok(Self::internal(HtdocsDispatcher::from_config(config)))
        } else {
            log::info!("Legacy requests forwarded to {}", config.external_legacy_addr());
            Self::external(config.external_legacy_port)
        }
    }

    pub fn internal<D: LegacyDispatcher>(dispatcher: D) -> Self {
        LegacyFallback::Internal(Arc::new(dispatcher))
    }

    pub fn external(port: u16) -> Result<Self, ProxyError> {
        Ok(LegacyFallback::External(ExternalLegacy::new(port)?))
    }

    pub fn tier(&self) -> LegacyTier {
        match self {
            LegacyFallback::Internal(_) => LegacyTier::Internal,
            LegacyFallback::External(_) => LegacyTier::External,
        }
    }

    /// Runs the request through the configured tier. An error means the
    /// tier could not produce a response at all.
    pub async fn serve(&self, request: Request<Bytes>) -> Result<Response<ProxyBody>, ProxyError> {
        match self {
            LegacyFallback::Internal(dispatcher) => {
                let dispatcher = Arc::clone(dispatcher);
                let recorder = tokio::task::spawn_blocking(move || {
                    let mut recorder = ResponseRecorder::new();
                    dispatcher.dispatch(&mut recorder, &request);
                    recorder
                })
                .await
                .map_err(|e| ProxyError::Http(format!("Legacy dispatcher failed: {}", e)))?;
                Ok(recorder.into_response())
            }
            LegacyFallback::External(external) => external.serve(request).await,
        }
    }
}

impl fmt::Debug for LegacyFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegacyFallback::Internal(_) => f.write_str("LegacyFallback::Internal"),
            LegacyFallback::External(external) => {
                write!(f, "LegacyFallback::External(127.0.0.1:{})", external.port)
            }
        }
    }
}
