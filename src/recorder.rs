//! Response sink for the in-process legacy tier.

use crate::common::{ProxyBody, full};
use bytes::BytesMut;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Response, StatusCode};

/// In-memory response sink handed to the in-process legacy dispatcher.
///
/// Mirrors a server-side response writer: headers may be changed until the
/// status is written, the first body write commits a 200 if no status was
/// set, and later status writes are ignored.
#[derive(Debug)]
pub struct ResponseRecorder {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    committed: bool,
}

impl Default for ResponseRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            committed: false,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.committed {
            self.headers.insert(name, value);
        }
    }

    pub fn write_status(&mut self, status: StatusCode) {
        if self.committed {
            log::debug!("Recorder status already committed, ignoring {}", status);
            return;
        }
        self.status = status;
        self.committed = true;
    }

    pub fn write(&mut self, chunk: &[u8]) {
        self.committed = true;
        self.body.extend_from_slice(chunk);
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Materializes the recorded response.
    pub fn into_response(self) -> Response<ProxyBody> {
        let mut response = Response::new(full(self.body.freeze()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
