//! Startup validation of the proxy configuration.
//!
//! Errors abort startup, warnings are logged and the proxy still runs.

use crate::config::ProxyConfiguration;
use std::collections::HashMap;

/// Comprehensive validation result
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self {
            is_valid: true,
            errors: vec![],
            warnings: vec![],
            suggestions: vec![],
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_suggestion(&mut self, suggestion: String) {
        self.suggestions.push(suggestion);
    }

    /// Logs warnings and suggestions; errors are left to the caller.
    pub fn log(&self) {
        for warning in &self.warnings {
            log::warn!("Configuration: {}", warning);
        }
        for suggestion in &self.suggestions {
            log::info!("Configuration suggestion: {}", suggestion);
        }
    }
}

pub fn validate(config: &ProxyConfiguration) -> ValidationResult {
    let mut result = ValidationResult::success();

    validate_ports(config, &mut result);
    validate_api_prefix(config, &mut result);
    validate_mime_types(config, &mut result);
    validate_legacy_tier(config, &mut result);
    validate_certificate(config, &mut result);

    result
}

fn validate_ports(config: &ProxyConfiguration, result: &mut ValidationResult) {
    let ports = [
        ("proxyPort", config.proxy_port),
        ("serverHTTPPort", config.server_http_port),
        ("externalLegacyPort", config.external_legacy_port),
    ];

    let mut seen: HashMap<u16, &str> = HashMap::new();
    for (name, port) in ports {
        if port == 0 {
            result.add_error(format!("{} must not be 0", name));
            continue;
        }
        // The external legacy port is only bound by another process when
        // legacy requests are forwarded.
        if name == "externalLegacyPort" && config.handle_legacy_requests {
            continue;
        }
        if let Some(other) = seen.insert(port, name) {
            result.add_error(format!("{} and {} both use port {}", other, name, port));
        }
    }
}

fn validate_api_prefix(config: &ProxyConfiguration, result: &mut ValidationResult) {
    if config.api_prefix.is_empty() {
        result.add_warning("apiPrefix is empty; API requests are not answered".to_string());
    } else if !config.api_prefix.starts_with('/') {
        result.add_error(format!("apiPrefix must start with '/': {}", config.api_prefix));
    } else if config.api_prefix.starts_with("/content") {
        result.add_error(format!("apiPrefix {} overlaps the /content route", config.api_prefix));
    }
}

fn validate_mime_types(config: &ProxyConfiguration, result: &mut ValidationResult) {
    for ext in config.ext_mime_types.keys() {
        if ext.starts_with('.') {
            result.add_warning(format!("extMimeTypes key {:?} has a leading dot", ext));
        }
    }

    for ext in &config.ext_gzipped_types {
        let key = ext.trim_start_matches('.').to_lowercase();
        let mapped = config
            .ext_mime_types
            .iter()
            .any(|(k, mime)| k.trim_start_matches('.').to_lowercase() == key && !mime.is_empty());
        if !mapped {
            result.add_warning(format!(
                "extGzippedTypes entry {:?} has no MIME mapping and never sets Content-Encoding",
                ext
            ));
        }
    }
}

fn validate_legacy_tier(config: &ProxyConfiguration, result: &mut ValidationResult) {
    if config.handle_legacy_requests && !config.legacy_htdocs_path.is_dir() {
        result.add_warning(format!(
            "legacyHTDOCSPath {} is not a directory; legacy fallback will answer 404",
            config.legacy_htdocs_path.display()
        ));
    }
    if !config.game_root_path.is_dir() {
        result.add_warning(format!(
            "gameRootPath {} is not a directory; every archive lookup will miss",
            config.game_root_path.display()
        ));
    }

    if config.use_infinity_server {
        if let Err(e) = url::Url::parse(&config.infinity_server_url) {
            result.add_error(format!(
                "infinityServerURL {:?} is not a valid URL: {}",
                config.infinity_server_url, e
            ));
        }
        result.add_suggestion("useInfinityServer is accepted but content is only served locally".to_string());
    }
}

fn validate_certificate(config: &ProxyConfiguration, result: &mut ValidationResult) {
    match (&config.mitm_certificate, &config.mitm_private_key) {
        (Some(_), None) | (None, Some(_)) => {
            result.add_error("mitmCertificate and mitmPrivateKey must be set together".to_string())
        }
        (Some(cert), Some(key)) => {
            for path in [cert, key] {
                if !path.is_file() {
                    result.add_error(format!("MITM file {} does not exist", path.display()));
                }
            }
        }
        (None, None) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn valid_config() -> (tempfile::TempDir, ProxyConfiguration) {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = ProxyConfiguration::default();
        config.game_root_path = dir.path().to_path_buf();
        config.legacy_htdocs_path = dir.path().to_path_buf();
        (dir, config)
    }

    #[test]
    fn test_validation_success() {
        let (_dir, config) = valid_config();
        let result = validate(&config);
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_validation_port_conflict() {
        let (_dir, mut config) = valid_config();
        config.server_http_port = config.proxy_port;
        let result = validate(&config);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("proxyPort and serverHTTPPort"));
    }

    #[test]
    fn test_external_port_conflict_only_matters_when_forwarding() {
        let (_dir, mut config) = valid_config();
        config.external_legacy_port = config.server_http_port;

        config.handle_legacy_requests = true;
        assert!(validate(&config).is_valid);

        config.handle_legacy_requests = false;
        assert!(!validate(&config).is_valid);
    }

    #[test]
    fn test_api_prefix_needs_leading_slash() {
        let (_dir, mut config) = valid_config();
        config.api_prefix = "fpProxy/api".to_string();
        assert!(!validate(&config).is_valid);
    }

    #[test]
    fn test_mime_warnings() {
        let (_dir, mut config) = valid_config();
        config.ext_mime_types.insert(".swf".to_string(), "application/x-shockwave-flash".to_string());
        config.ext_gzipped_types.push("svgz".to_string());

        let result = validate(&config);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_infinity_url_must_parse() {
        let (_dir, mut config) = valid_config();
        config.use_infinity_server = true;
        config.infinity_server_url = "not a url".to_string();
        assert!(!validate(&config).is_valid);
    }

    #[test]
    fn test_certificate_pair() {
        let (_dir, mut config) = valid_config();
        config.mitm_certificate = Some(PathBuf::from("/nonexistent/mitm.crt"));
        let result = validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("set together")));

        config.mitm_private_key = Some(PathBuf::from("/nonexistent/mitm.key"));
        let result = validate(&config);
        assert_eq!(result.errors.len(), 2);
    }
}
