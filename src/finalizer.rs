//! Headers added to every response on its way back to the client.

use hyper::Response;
use hyper::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONNECTION, HeaderMap, HeaderValue};

pub const KEEP_ALIVE_PARAMS: &str = "timeout=5; max=100";

/// Whether the inbound request asked for a persistent connection.
pub fn wants_keep_alive(request_headers: &HeaderMap) -> bool {
    request_headers
        .get(CONNECTION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("keep-alive"))
}

/// Adds the CORS header and, when requested, the keep-alive headers.
/// Headers are replaced rather than appended, so running it twice is a no-op.
pub fn finalize<B>(request_headers: &HeaderMap, response: &mut Response<B>) {
    let keep_alive = wants_keep_alive(request_headers);
    let headers = response.headers_mut();

    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    if keep_alive {
        headers.insert(CONNECTION, HeaderValue::from_static("Keep-Alive"));
        headers.insert("keep-alive", HeaderValue::from_static(KEEP_ALIVE_PARAMS));
    }
}
