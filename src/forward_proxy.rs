use crate::common::{ProxyBody, ResponseBuilder, empty};
use crate::error::ProxyError;
use crate::mitm::MitmAuthority;
use crate::router::ProxyRouter;
use hyper::body::Incoming;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Client-facing proxy listener. Plain HTTP goes straight to the router,
/// CONNECT tunnels are intercepted.
#[derive(Clone)]
pub struct ForwardProxy {
    router: Arc<ProxyRouter>,
    mitm: MitmAuthority,
}

impl ForwardProxy {
    pub fn new(router: Arc<ProxyRouter>, mitm: MitmAuthority) -> Self {
        Self { router, mitm }
    }

    pub async fn run(self, addr: SocketAddr) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            ProxyError::Connection(format!("Failed to bind proxy listener on {}: {}", addr, e))
        })?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<(), ProxyError> {
        log::info!("Proxy listening on http://{}", listener.local_addr()?);
        let proxy = Arc::new(self);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            log::debug!("Accepted proxy connection from {}", remote_addr);
            let proxy = Arc::clone(&proxy);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let proxy = Arc::clone(&proxy);
                    async move { Ok::<_, Infallible>(proxy.handle_request(req).await) }
                });

                if let Err(e) = ServerBuilder::new()
                    .preserve_header_case(true)
                    .title_case_headers(true)
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades()
                    .await
                {
                    log::error!("Error serving proxy connection from {}: {}", remote_addr, e);
                }
            });
        }
    }

    async fn handle_request(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        log::debug!("{} {}", req.method(), req.uri());
        if req.method() == Method::CONNECT {
            self.handle_connect(req)
        } else {
            self.router.serve_proxy_request(req).await
        }
    }

    fn handle_connect(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        let Some(authority) = req.uri().authority().map(|authority| authority.to_string()) else {
            log::warn!("CONNECT without authority: {}", req.uri());
            return ResponseBuilder::from_error(&ProxyError::RequestBuild(
                "Invalid CONNECT target".to_string(),
            ));
        };
        log::debug!("Intercepting CONNECT to {}", authority);

        let mitm = self.mitm.clone();
        let router = Arc::clone(&self.router);
        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => mitm.intercept(upgraded, authority, router).await,
                Err(e) => log::error!("Failed to upgrade CONNECT to {}: {}", authority, e),
            }
        });

        // The upgrade completes once this response is sent
        Response::new(empty())
    }
}
