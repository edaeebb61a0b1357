//! TLS interception for CONNECT tunnels.
//!
//! Every tunnel is terminated locally with one fixed certificate, a single
//! request is read from it and handed to the router, and the connection is
//! closed after the response.

use crate::config::ProxyConfiguration;
use crate::error::ProxyError;
use crate::router::ProxyRouter;
use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use rustls::ServerConfig;
use std::convert::Infallible;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

const EMBEDDED_CERTIFICATE: &[u8] = include_bytes!("../certs/mitm.crt");
const EMBEDDED_PRIVATE_KEY: &[u8] = include_bytes!("../certs/mitm.key");

#[derive(Clone)]
pub struct MitmAuthority {
    acceptor: TlsAcceptor,
}

impl MitmAuthority {
    /// The certificate pair compiled into the binary.
    pub fn embedded() -> Result<Self, ProxyError> {
        Self::from_pem(&mut &EMBEDDED_CERTIFICATE[..], &mut &EMBEDDED_PRIVATE_KEY[..])
    }

    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self, ProxyError> {
        let mut cert_file = BufReader::new(File::open(cert_path).map_err(|e| {
            ProxyError::Tls(format!("Failed to open certificate file {}: {}", cert_path.display(), e))
        })?);
        let mut key_file = BufReader::new(File::open(key_path).map_err(|e| {
            ProxyError::Tls(format!("Failed to open private key file {}: {}", key_path.display(), e))
        })?);
        Self::from_pem(&mut cert_file, &mut key_file)
    }

    /// Configured files when both are set, otherwise the embedded pair.
    pub fn from_config(config: &ProxyConfiguration) -> Result<Self, ProxyError> {
        match (&config.mitm_certificate, &config.mitm_private_key) {
            (Some(cert), Some(key)) => {
                log::info!("Loading MITM certificate from {}", cert.display());
                Self::from_files(cert, key)
            }
            (None, None) => Self::embedded(),
            _ => Err(ProxyError::Config(
                "mitmCertificate and mitmPrivateKey must be set together".to_string(),
            )),
        }
    }

    pub fn from_pem(cert_pem: &mut dyn BufRead, key_pem: &mut dyn BufRead) -> Result<Self, ProxyError> {
        let certs = rustls_pemfile::certs(cert_pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ProxyError::Tls(format!("Failed to read certificate: {}", e)))?;

        if certs.is_empty() {
            return Err(ProxyError::Tls("No valid certificate found".to_string()));
        }

        let private_key = rustls_pemfile::private_key(key_pem)
            .map_err(|e| ProxyError::Tls(format!("Failed to read private key: {}", e)))?
            .ok_or_else(|| ProxyError::Tls("No valid private key found".to_string()))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, private_key)
            .map_err(|e| ProxyError::Tls(format!("Failed to create TLS config: {}", e)))?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    /// Terminates TLS on an upgraded CONNECT tunnel and serves one request
    /// through the router, with `authority` as the target host.
    pub async fn intercept(&self, upgraded: Upgraded, authority: String, router: Arc<ProxyRouter>) {
        let tls_stream = match self.acceptor.accept(TokioIo::new(upgraded)).await {
            Ok(tls_stream) => tls_stream,
            Err(e) => {
                log::warn!("TLS handshake with client failed for {}: {}", authority, e);
                return;
            }
        };
        log::debug!("Intercepted TLS tunnel to {}", authority);

        let service = service_fn(move |req: Request<Incoming>| {
            let router = Arc::clone(&router);
            let authority = authority.clone();
            async move { Ok::<_, Infallible>(router.serve_tunneled_request(req, &authority).await) }
        });

        if let Err(e) = ServerBuilder::new()
            .keep_alive(false)
            .serve_connection(TokioIo::new(tls_stream), service)
            .await
        {
            log::error!("Error serving intercepted connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfiguration;
    use std::path::PathBuf;

    #[test]
    fn test_embedded_pair_loads() {
        assert!(MitmAuthority::embedded().is_ok());
    }

    #[test]
    fn test_garbage_certificate_is_rejected() {
        let result = MitmAuthority::from_pem(&mut &b"not a pem"[..], &mut &EMBEDDED_PRIVATE_KEY[..]);
        assert!(matches!(result, Err(ProxyError::Tls(_))));
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let result = MitmAuthority::from_pem(&mut &EMBEDDED_CERTIFICATE[..], &mut &b""[..]);
        assert!(matches!(result, Err(ProxyError::Tls(_))));
    }

    #[test]
    fn test_configured_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let cert = dir.path().join("mitm.crt");
        let key = dir.path().join("mitm.key");
        std::fs::write(&cert, EMBEDDED_CERTIFICATE).unwrap();
        std::fs::write(&key, EMBEDDED_PRIVATE_KEY).unwrap();

        let mut config = ProxyConfiguration::default();
        config.mitm_certificate = Some(cert);
        config.mitm_private_key = Some(key);
        assert!(MitmAuthority::from_config(&config).is_ok());

        config.mitm_private_key = Some(PathBuf::from("/nonexistent/mitm.key"));
        assert!(matches!(MitmAuthority::from_config(&config), Err(ProxyError::Tls(_))));

        config.mitm_private_key = None;
        assert!(matches!(MitmAuthority::from_config(&config), Err(ProxyError::Config(_))));
    }
}
