use crate::common::resolve_under;
use crate::config::ProxyConfiguration;
use crate::content_type::MimeTable;
use crate::legacy::LegacyDispatcher;
use crate::recorder::ResponseRecorder;
use bytes::Bytes;
use hyper::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::{Method, Request, StatusCode};
use std::fs;
use std::path::{Path, PathBuf};

const HTML_404_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><title>404 Not Found</title></head>
<body>
    <h1>404 Not Found</h1>
    <p>The requested resource was not found on this server.</p>
</body>
</html>"#;

/// In-process legacy tier serving static files from the legacy htdocs tree,
/// laid out as `{root}/{host}/{path}`.
#[derive(Debug, Clone)]
pub struct HtdocsDispatcher {
    root: PathBuf,
    index_types: Vec<String>,
    mime_table: MimeTable,
}

impl HtdocsDispatcher {
    pub fn new(root: PathBuf, index_types: Vec<String>, mime_table: MimeTable) -> Self {
        Self {
            root,
            index_types,
            mime_table,
        }
    }

    pub fn from_config(config: &ProxyConfiguration) -> Self {
        Self::new(
            config.legacy_htdocs_path.clone(),
            config.ext_index_types.clone(),
            MimeTable::from_config(config),
        )
    }

    fn find_index(&self, dir: &Path) -> Option<PathBuf> {
        self.index_types
            .iter()
            .map(|ext| dir.join(format!("index.{}", ext.trim_start_matches('.'))))
            .find(|candidate| candidate.is_file())
    }

    fn mime_type(&self, file_path: &Path) -> String {
        let configured = file_path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.mime_table.lookup(&ext.to_lowercase()).map(str::to_string));

        configured.unwrap_or_else(|| {
            mime_guess::from_path(file_path)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        })
    }

    fn not_found(recorder: &mut ResponseRecorder) {
        recorder.set_header(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        recorder.write_status(StatusCode::NOT_FOUND);
        recorder.write(HTML_404_TEMPLATE.as_bytes());
    }

    fn serve_file(&self, recorder: &mut ResponseRecorder, file_path: &Path, is_head: bool) {
        let contents = match fs::read(file_path) {
            Ok(contents) => contents,
            Err(e) => {
                log::debug!("Cannot read {}: {}", file_path.display(), e);
                Self::not_found(recorder);
                return;
            }
        };

        match HeaderValue::from_str(&self.mime_type(file_path)) {
            Ok(value) => recorder.set_header(CONTENT_TYPE, value),
            Err(e) => log::warn!("Unusable MIME type for {}: {}", file_path.display(), e),
        }
        recorder.set_header(CONTENT_LENGTH, HeaderValue::from(contents.len()));
        recorder.write_status(StatusCode::OK);
        if !is_head {
            recorder.write(&contents);
        }
    }
}

impl LegacyDispatcher for HtdocsDispatcher {
    fn dispatch(&self, recorder: &mut ResponseRecorder, request: &Request<Bytes>) {
        let method = request.method();
        if method != Method::GET && method != Method::HEAD {
            recorder.set_header(ALLOW, HeaderValue::from_static("GET, HEAD"));
            recorder.write_status(StatusCode::METHOD_NOT_ALLOWED);
            return;
        }
        let is_head = method == Method::HEAD;

        let host = request.uri().host().unwrap_or_default();
        let Some(path) = resolve_under(&self.root, host, request.uri().path()) else {
            log::warn!("Rejected legacy path outside htdocs: {}", request.uri());
            recorder.write_status(StatusCode::FORBIDDEN);
            return;
        };

        let file_path = if path.is_dir() {
            match self.find_index(&path) {
                Some(index) => index,
                None => {
                    Self::not_found(recorder);
                    return;
                }
            }
        } else {
            path
        };

        if !file_path.is_file() {
            log::debug!("Legacy file not found: {}", file_path.display());
            Self::not_found(recorder);
            return;
        }

        log::debug!("Serving legacy file {}", file_path.display());
        self.serve_file(recorder, &file_path, is_head);
    }
}
