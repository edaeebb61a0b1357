//! Content-Type inference from file extensions.
//!
//! The request path's extension is consulted first, then the extension of
//! the file name the archive reports in `ZIPSVR_FILENAME`. The first one
//! with a non-empty mapping wins; Content-Encoding is set to gzip when that
//! same extension is listed as pre-compressed.

use crate::common::ARCHIVE_FILENAME_HEADER;
use crate::config::ProxyConfiguration;
use hyper::Response;
use hyper::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderValue};
use std::collections::{HashMap, HashSet};

/// Extension to MIME lookup plus the set of pre-gzipped extensions.
#[derive(Debug, Clone, Default)]
pub struct MimeTable {
    mime_types: HashMap<String, String>,
    gzipped: HashSet<String>,
}

/// Outcome of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType<'a> {
    pub mime: &'a str,
    pub gzipped: bool,
}

impl MimeTable {
    pub fn new(mime_types: HashMap<String, String>, gzipped: impl IntoIterator<Item = String>) -> Self {
        Self {
            mime_types: mime_types
                .into_iter()
                .map(|(ext, mime)| (normalize_extension(&ext), mime))
                .collect(),
            gzipped: gzipped.into_iter().map(|ext| normalize_extension(&ext)).collect(),
        }
    }

    pub fn from_config(config: &ProxyConfiguration) -> Self {
        Self::new(config.ext_mime_types.clone(), config.ext_gzipped_types.clone())
    }

    /// An entry mapped to the empty string counts as absent.
    pub fn lookup(&self, extension: &str) -> Option<&str> {
        self.mime_types
            .get(extension)
            .map(String::as_str)
            .filter(|mime| !mime.is_empty())
    }

    pub fn is_gzipped(&self, extension: &str) -> bool {
        self.gzipped.contains(extension)
    }

    pub fn resolve(&self, extension: &str) -> Option<ResolvedType<'_>> {
        if extension.is_empty() {
            return None;
        }
        self.lookup(extension).map(|mime| ResolvedType {
            mime,
            gzipped: self.is_gzipped(extension),
        })
    }

    /// Picks the type for a request path and an optional archive file name,
    /// request path first.
    pub fn resolve_for(&self, request_path: &str, archive_filename: Option<&str>) -> Option<ResolvedType<'_>> {
        let from_path = extension_of(request_path.trim());
        if let Some(resolved) = from_path.as_deref().and_then(|ext| self.resolve(ext)) {
            return Some(resolved);
        }
        let from_archive = archive_filename.and_then(extension_of);
        from_archive.as_deref().and_then(|ext| self.resolve(ext))
    }

    /// Applies the resolved type to the response headers. Leaves them
    /// untouched when neither extension resolves.
    pub fn apply<B>(&self, request_path: &str, response: &mut Response<B>) -> bool {
        let archive_filename = archive_filename(response.headers());
        let Some(resolved) = self.resolve_for(request_path, archive_filename.as_deref()) else {
            return false;
        };
        let Ok(value) = HeaderValue::from_str(resolved.mime) else {
            log::warn!("Unusable MIME type in mapping: {:?}", resolved.mime);
            return false;
        };

        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, value);
        if resolved.gzipped {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        true
    }
}

fn archive_filename(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ARCHIVE_FILENAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Lowercased extension of the last path segment, without the dot.
/// `None` when the segment has no dot or ends in one.
pub fn extension_of(path: &str) -> Option<String> {
    let segment = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn table() -> MimeTable {
        let mut mime_types = HashMap::new();
        mime_types.insert("png".to_string(), "image/png".to_string());
        mime_types.insert("json".to_string(), "application/json".to_string());
        mime_types.insert("svgz".to_string(), "image/svg+xml".to_string());
        mime_types.insert(".swf".to_string(), "application/x-shockwave-flash".to_string());
        mime_types.insert("blank".to_string(), String::new());
        MimeTable::new(mime_types, vec!["svgz".to_string(), "blank".to_string()])
    }

    fn response_with_filename(name: Option<&str>) -> Response<()> {
        let mut response = Response::new(());
        if let Some(name) = name {
            response
                .headers_mut()
                .insert(ARCHIVE_FILENAME_HEADER, HeaderValue::from_str(name).unwrap());
        }
        response
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("/assets/sprite.PNG"), Some("png".to_string()));
        assert_eq!(extension_of("/dir.v2/file"), None);
        assert_eq!(extension_of("/file."), None);
        assert_eq!(extension_of("/"), None);
        assert_eq!(extension_of("archive.tar.gz"), Some("gz".to_string()));
    }

    #[test]
    fn test_empty_mapping_counts_as_absent() {
        let table = table();
        assert_eq!(table.lookup("blank"), None);
        assert_eq!(table.resolve("blank"), None);
        assert_eq!(table.lookup("swf"), Some("application/x-shockwave-flash"));
    }

    #[test]
    fn test_mapped_extension_sets_type_and_gzip_only_when_listed() {
        let table = table();
        let mut png = response_with_filename(None);
        assert!(table.apply("/assets/sprite.png", &mut png));
        assert_eq!(png.headers()[CONTENT_TYPE], "image/png");
        assert!(png.headers().get(CONTENT_ENCODING).is_none());

        let mut svgz = response_with_filename(None);
        assert!(table.apply("/img/logo.SVGZ", &mut svgz));
        assert_eq!(svgz.headers()[CONTENT_TYPE], "image/svg+xml");
        assert_eq!(svgz.headers()[CONTENT_ENCODING], "gzip");
    }

    #[test]
    fn test_request_path_precedes_archive_filename() {
        let table = table();
        let mut response = response_with_filename(Some("b.png"));
        assert!(table.apply("/a.json", &mut response));
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_archive_filename_used_when_path_unmapped() {
        let table = table();
        let mut response = response_with_filename(Some("sprite.png"));
        assert!(table.apply("/assets/", &mut response));
        assert_eq!(response.headers()[CONTENT_TYPE], "image/png");

        let mut blank_path = response_with_filename(Some("sprite.png"));
        assert!(table.apply("/page.blank", &mut blank_path));
        assert_eq!(blank_path.headers()[CONTENT_TYPE], "image/png");
        assert!(blank_path.headers().get(CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_unresolved_leaves_headers_untouched() {
        let table = table();
        let mut response = response_with_filename(Some("data.bin"));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(!table.apply("/data.unknown", &mut response));
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");

        let mut bare = response_with_filename(None);
        assert!(!table.apply("/noext", &mut bare));
        assert!(bare.headers().get(CONTENT_TYPE).is_none());
    }
}
