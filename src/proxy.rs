use crate::archive_server::ArchiveDirectoryServer;
use crate::config::ProxyConfiguration;
use crate::error::ProxyError;
use crate::forward_proxy::ForwardProxy;
use crate::legacy::LegacyFallback;
use crate::mitm::MitmAuthority;
use crate::router::ProxyRouter;
use log::{debug, info};
use std::net::SocketAddr;
use std::sync::Arc;

/// The proxy listener and the archive listener, run side by side.
pub struct ContentProxy {
    ingress: ForwardProxy,
    ingress_addr: SocketAddr,
    archive: ArchiveDirectoryServer,
    archive_addr: SocketAddr,
}

impl ContentProxy {
    pub async fn run(self) -> Result<(), ProxyError> {
        tokio::try_join!(
            self.ingress.run(self.ingress_addr),
            self.archive.run(self.archive_addr),
        )?;
        Ok(())
    }
}

pub struct ProxyFactory;

impl ProxyFactory {
    pub fn create(config: Arc<ProxyConfiguration>) -> Result<ContentProxy, ProxyError> {
        info!(
            "Creating content proxy: proxy port {}, archive port {}",
            config.proxy_port, config.server_http_port
        );

        let fallback = LegacyFallback::from_config(&config)?;
        debug!("Legacy fallback: {:?}", fallback);

        let mitm = MitmAuthority::from_config(&config)?;
        let router = Arc::new(ProxyRouter::new(&config, fallback));

        Ok(ContentProxy {
            ingress: ForwardProxy::new(router, mitm),
            ingress_addr: config.proxy_addr(),
            archive: ArchiveDirectoryServer::from_config(&config),
            archive_addr: config.archive_addr(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_builds_with_defaults() {
        let config = Arc::new(ProxyConfiguration::default());
        let proxy = ProxyFactory::create(config).unwrap();
        assert_eq!(proxy.ingress_addr.port(), 22500);
        assert_eq!(proxy.archive_addr.port(), 22501);
    }

    #[test]
    fn test_half_configured_certificate_is_rejected() {
        let mut config = ProxyConfiguration::default();
        config.mitm_certificate = Some("mitm.crt".into());
        assert!(ProxyFactory::create(Arc::new(config)).is_err());
    }
}
