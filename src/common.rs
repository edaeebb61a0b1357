use crate::error::ProxyError;
use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};

/// Body type for every response the proxy hands back to a client. Archive
/// and external legacy responses stream through, recorded and synthetic
/// responses are fully buffered.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Header the content archive uses to name the archive entry it served.
pub const ARCHIVE_FILENAME_HEADER: &str = "zipsvr_filename";

pub fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Common response builder utilities
pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Creates a proxy error response with custom message
    pub fn proxy_error(message: &str) -> Response<ProxyBody> {
        Self::error(StatusCode::BAD_GATEWAY, &format!("Proxy Error: {}", message))
    }

    /// Maps an error onto the synthetic response sent in place of a
    /// downstream one.
    pub fn from_error(error: &ProxyError) -> Response<ProxyBody> {
        match error {
            ProxyError::RequestBuild(message) => Self::error(
                StatusCode::BAD_REQUEST,
                &format!("Bad Request: {}", message),
            ),
            ProxyError::Timeout(_) => Self::error(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout"),
            other => Self::proxy_error(&other.to_string()),
        }
    }

    /// Creates a generic error response with custom status and message
    pub fn error(status: StatusCode, message: &str) -> Response<ProxyBody> {
        let mut response = Response::new(full(message.to_string()));
        *response.status_mut() = status;
        response
    }
}

/// Maps `{host}{url_path}` onto a directory tree below `root`.
///
/// The path is percent-decoded first. Returns `None` when the host or any
/// path segment would leave `root`.
pub fn resolve_under(root: &Path, host: &str, url_path: &str) -> Option<PathBuf> {
    if host.is_empty() || host.contains(['/', '\\']) || host == "." || host == ".." {
        return None;
    }
    let decoded = percent_decode_str(url_path).decode_utf8().ok()?;

    let mut resolved = root.join(host);
    for segment in decoded.split(['/', '\\']) {
        match Path::new(segment).components().next() {
            None | Some(Component::CurDir) => continue,
            Some(Component::Normal(part)) if part == segment => resolved.push(part),
            _ => return None,
        }
    }
    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_under() {
        let root = Path::new("/srv/htdocs");
        assert_eq!(
            resolve_under(root, "game.example", "/assets/a%20b.swf"),
            Some(PathBuf::from("/srv/htdocs/game.example/assets/a b.swf"))
        );
        assert_eq!(
            resolve_under(root, "game.example", "/"),
            Some(PathBuf::from("/srv/htdocs/game.example"))
        );
        assert_eq!(resolve_under(root, "game.example", "/../secret"), None);
        assert_eq!(resolve_under(root, "game.example", "/a/%2e%2e/%2e%2e/secret"), None);
        assert_eq!(resolve_under(root, "..", "/secret"), None);
    }

    #[tokio::test]
    async fn test_proxy_error_body() {
        let response = ResponseBuilder::proxy_error("archive down");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Proxy Error: archive down");
    }

    #[test]
    fn test_error_mapping() {
        let build = ResponseBuilder::from_error(&ProxyError::RequestBuild("no host".to_string()));
        assert_eq!(build.status(), StatusCode::BAD_REQUEST);

        let timeout = ResponseBuilder::from_error(&ProxyError::Timeout(300));
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);

        let connection = ResponseBuilder::from_error(&ProxyError::Connection("refused".to_string()));
        assert_eq!(connection.status(), StatusCode::BAD_GATEWAY);
    }
}
