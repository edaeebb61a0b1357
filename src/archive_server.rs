//! Directory-backed stand-in for the content archive.
//!
//! Serves `/content/{host}/{path}` from `{gameRootPath}/{host}/{path}` and
//! names the file it served in the `ZIPSVR_FILENAME` response header.

use crate::common::{ARCHIVE_FILENAME_HEADER, ProxyBody, ResponseBuilder, full, resolve_under};
use crate::config::ProxyConfiguration;
use crate::error::ProxyError;
use hyper::body::Incoming;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;

const CONTENT_PREFIX: &str = "/content/";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveStatus<'a> {
    status: &'static str,
    version: &'static str,
    game_root_path: String,
    use_mad4fp: bool,
    handle_legacy_requests: bool,
    api_prefix: &'a str,
}

#[derive(Debug, Clone)]
pub struct ArchiveDirectoryServer {
    game_root: PathBuf,
    api_prefix: String,
    use_mad4fp: bool,
    handle_legacy_requests: bool,
}

impl ArchiveDirectoryServer {
    pub fn new(game_root: PathBuf, api_prefix: String) -> Self {
        Self {
            game_root,
            api_prefix: api_prefix.trim_end_matches('/').to_string(),
            use_mad4fp: false,
            handle_legacy_requests: false,
        }
    }

    pub fn from_config(config: &ProxyConfiguration) -> Self {
        let mut server = Self::new(config.game_root_path.clone(), config.api_prefix.clone());
        server.use_mad4fp = config.use_mad4fp;
        server.handle_legacy_requests = config.handle_legacy_requests;
        server
    }

    pub async fn run(self, addr: SocketAddr) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            ProxyError::Connection(format!("Failed to bind archive listener on {}: {}", addr, e))
        })?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<(), ProxyError> {
        log::info!("Content archive listening on http://{}", listener.local_addr()?);
        let server = Arc::new(self);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let server = Arc::clone(&server);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                });

                if let Err(e) = ServerBuilder::new()
                    .keep_alive(true)
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    log::error!("Error serving archive connection from {}: {}", remote_addr, e);
                }
            });
        }
    }

    pub async fn handle(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        self.respond(req.method(), req.uri().path()).await
    }

    /// Everything except the request line is ignored; the body is never read.
    pub async fn respond(&self, method: &Method, path: &str) -> Response<ProxyBody> {
        if !self.api_prefix.is_empty() && path.starts_with(&self.api_prefix) {
            return self.handle_api(&path[self.api_prefix.len()..]);
        }

        let Some(rest) = path.strip_prefix(CONTENT_PREFIX) else {
            return ResponseBuilder::error(StatusCode::NOT_FOUND, "Not Found");
        };
        let (host, file) = match rest.split_once('/') {
            Some((host, file)) => (host, file),
            None => (rest, ""),
        };

        let Some(file_path) = resolve_under(&self.game_root, host, file) else {
            return ResponseBuilder::error(StatusCode::FORBIDDEN, "Forbidden");
        };

        match self.read_file(&file_path).await {
            Ok(contents) => {
                let len = contents.len();
                let body = if method == Method::HEAD { Vec::new() } else { contents };
                let mut response = Response::new(full(body));
                let headers = response.headers_mut();
                headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
                if let Some(name) = file_path.file_name().and_then(|name| name.to_str())
                    && let Ok(value) = HeaderValue::from_str(name)
                {
                    headers.insert(ARCHIVE_FILENAME_HEADER, value);
                }
                response
            }
            Err(e) => {
                log::debug!("Archive miss for {}: {}", path, e);
                ResponseBuilder::error(StatusCode::NOT_FOUND, "Not Found")
            }
        }
    }

    async fn read_file(&self, file_path: &Path) -> Result<Vec<u8>, ProxyError> {
        let metadata = tokio::fs::metadata(file_path).await?;
        if !metadata.is_file() {
            return Err(ProxyError::NotFound(file_path.display().to_string()));
        }
        Ok(tokio::fs::read(file_path).await?)
    }

    fn handle_api(&self, route: &str) -> Response<ProxyBody> {
        if route != "/status" {
            return ResponseBuilder::error(StatusCode::NOT_FOUND, "Not Found");
        }

        let status = ArchiveStatus {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            game_root_path: self.game_root.display().to_string(),
            use_mad4fp: self.use_mad4fp,
            handle_legacy_requests: self.handle_legacy_requests,
            api_prefix: &self.api_prefix,
        };
        match serde_json::to_vec(&status) {
            Ok(json) => {
                let mut response = Response::new(full(json));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(e) => ResponseBuilder::from_error(&ProxyError::Json(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, ArchiveDirectoryServer) {
        let dir = TempDir::new().unwrap();
        let site = dir.path().join("game.example").join("assets");
        std::fs::create_dir_all(&site).unwrap();
        std::fs::write(site.join("sprite.png"), b"\x89PNG").unwrap();
        let server = ArchiveDirectoryServer::new(dir.path().to_path_buf(), "/fpProxy/api/".to_string());
        (dir, server)
    }

    async fn body_of(response: Response<ProxyBody>) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    #[tokio::test]
    async fn test_serves_content_with_filename_header() {
        let (_dir, server) = fixture();
        let response = server.respond(&Method::GET, "/content/game.example/assets/sprite.png").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ARCHIVE_FILENAME_HEADER], "sprite.png");
        assert_eq!(body_of(response).await, b"\x89PNG");
    }

    #[tokio::test]
    async fn test_missing_content_is_404() {
        let (_dir, server) = fixture();
        let missing = server.respond(&Method::GET, "/content/game.example/assets/none.png").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let directory = server.respond(&Method::GET, "/content/game.example/assets").await;
        assert_eq!(directory.status(), StatusCode::NOT_FOUND);

        let outside = server.respond(&Method::GET, "/elsewhere/sprite.png").await;
        assert_eq!(outside.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_traversal_is_forbidden() {
        let (_dir, server) = fixture();
        let response = server.respond(&Method::GET, "/content/game.example/../../etc/passwd").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_status_api() {
        let (_dir, server) = fixture();
        let response = server.respond(&Method::GET, "/fpProxy/api/status").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");

        let json: serde_json::Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["apiPrefix"], "/fpProxy/api");

        let unknown = server.respond(&Method::GET, "/fpProxy/api/launch").await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }
}
