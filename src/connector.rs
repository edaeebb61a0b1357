//! Client transport for the external legacy server.
//!
//! Legacy hostnames usually do not resolve, so every dial is redirected to a
//! fixed loopback port regardless of the request's authority. Connections
//! are reported as proxied, which makes the client write requests in
//! absolute form, the way a forward proxy expects them.

use crate::error::ProxyError;
use hyper::Uri;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tower::Service;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Debug)]
pub struct LoopbackConnector {
    inner: HttpConnector,
    target: Uri,
}

impl LoopbackConnector {
    pub fn new(port: u16, connect_timeout: Duration, keepalive: Duration) -> Result<Self, ProxyError> {
        let target = Uri::builder()
            .scheme("http")
            .authority(format!("127.0.0.1:{}", port))
            .path_and_query("/")
            .build()
            .map_err(|e| ProxyError::Config(format!("Invalid legacy port {}: {}", port, e)))?;

        let mut inner = HttpConnector::new();
        inner.set_connect_timeout(Some(connect_timeout));
        inner.set_keepalive(Some(keepalive));
        inner.set_nodelay(true);

        Ok(Self { inner, target })
    }

}

impl Service<Uri> for LoopbackConnector {
    type Response = ProxiedStream;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, requested: Uri) -> Self::Future {
        log::debug!("Dialing {} for {}", self.target, requested);
        let connecting = self.inner.call(self.target.clone());
        Box::pin(async move {
            let stream = connecting.await?;
            Ok::<_, BoxError>(ProxiedStream { inner: stream })
        })
    }
}

/// TCP stream to the loopback legacy server, marked as a proxy connection.
pub struct ProxiedStream {
    inner: TokioIo<TcpStream>,
}

impl Connection for ProxiedStream {
    fn connected(&self) -> Connected {
        self.inner.connected().proxy(true)
    }
}

impl Read for ProxiedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl Write for ProxiedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }
}
