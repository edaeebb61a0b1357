use crate::error::ProxyError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "proxySettings.json";

fn default_proxy_port() -> u16 {
    22500
}

fn default_server_http_port() -> u16 {
    22501
}

fn default_external_legacy_port() -> u16 {
    22600
}

fn default_api_prefix() -> String {
    "/fpProxy/api".to_string()
}

/// Ports in existing settings files are written as strings ("22500"),
/// newer ones as numbers. Both are accepted.
fn port_from_str_or_int<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) => text
            .trim()
            .parse::<u16>()
            .map_err(|e| serde::de::Error::custom(format!("invalid port '{}': {}", text, e))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(ProxyError::Config(format!(
                "Invalid log format: {}. Must be one of: text, json",
                s
            ))),
        }
    }
}

/// Process-wide settings. Built once at startup, then shared read-only
/// behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfiguration {
    #[serde(default)]
    pub allow_cross_domain: bool,
    #[serde(default)]
    pub verbose_logging: bool,
    #[serde(default = "default_proxy_port", deserialize_with = "port_from_str_or_int")]
    pub proxy_port: u16,
    // Port of the content-archive service the router rewrites requests to
    #[serde(
        rename = "serverHTTPPort",
        default = "default_server_http_port",
        deserialize_with = "port_from_str_or_int"
    )]
    pub server_http_port: u16,
    #[serde(default)]
    pub game_root_path: PathBuf,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default)]
    pub external_file_paths: Vec<String>,
    #[serde(default)]
    pub ext_script_types: Vec<String>,
    #[serde(default)]
    pub ext_index_types: Vec<String>,
    #[serde(default)]
    pub ext_mime_types: HashMap<String, String>,
    #[serde(default)]
    pub ext_gzipped_types: Vec<String>,
    #[serde(rename = "useMad4FP", default)]
    pub use_mad4fp: bool,
    /// `true` selects the in-process legacy dispatcher, `false` the
    /// external legacy server on `external_legacy_port`.
    #[serde(default)]
    pub handle_legacy_requests: bool,
    #[serde(
        default = "default_external_legacy_port",
        deserialize_with = "port_from_str_or_int"
    )]
    pub external_legacy_port: u16,
    #[serde(rename = "legacyHTDOCSPath", default)]
    pub legacy_htdocs_path: PathBuf,
    #[serde(default)]
    pub root_path: PathBuf,
    #[serde(rename = "legacyCGIBINPath", default)]
    pub legacy_cgibin_path: PathBuf,
    #[serde(default)]
    pub php_cgi_path: PathBuf,
    #[serde(default)]
    pub override_paths: Vec<String>,
    #[serde(default)]
    pub legacy_override_paths: Vec<String>,
    #[serde(default)]
    pub use_infinity_server: bool,
    #[serde(rename = "infinityServerURL", default)]
    pub infinity_server_url: String,
    #[serde(default)]
    pub mitm_certificate: Option<PathBuf>,
    #[serde(default)]
    pub mitm_private_key: Option<PathBuf>,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ProxyConfiguration {
    fn default() -> Self {
        Self {
            allow_cross_domain: false,
            verbose_logging: false,
            proxy_port: default_proxy_port(),
            server_http_port: default_server_http_port(),
            game_root_path: PathBuf::new(),
            api_prefix: default_api_prefix(),
            external_file_paths: Vec::new(),
            ext_script_types: Vec::new(),
            ext_index_types: vec!["html".to_string(), "htm".to_string()],
            ext_mime_types: HashMap::new(),
            ext_gzipped_types: Vec::new(),
            use_mad4fp: false,
            handle_legacy_requests: false,
            external_legacy_port: default_external_legacy_port(),
            legacy_htdocs_path: PathBuf::new(),
            root_path: PathBuf::new(),
            legacy_cgibin_path: PathBuf::new(),
            php_cgi_path: PathBuf::new(),
            override_paths: Vec::new(),
            legacy_override_paths: Vec::new(),
            use_infinity_server: false,
            infinity_server_url: String::new(),
            mitm_certificate: None,
            mitm_private_key: None,
            log_format: LogFormat::Text,
        }
    }
}

/// Values given on the command line. `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub verbose: bool,
    pub proxy_port: Option<u16>,
    pub server_http_port: Option<u16>,
    pub game_root_path: Option<String>,
    pub root_path: Option<String>,
    pub api_prefix: Option<String>,
    pub use_mad4fp: Option<bool>,
    pub external_legacy_port: Option<u16>,
    pub legacy_htdocs_path: Option<String>,
    pub php_cgi_path: Option<String>,
    pub use_infinity_server: Option<bool>,
    pub infinity_server_url: Option<String>,
    pub handle_legacy_requests: Option<bool>,
    pub log_format: Option<LogFormat>,
}

impl ProxyConfiguration {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProxyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: ProxyConfiguration = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ProxyError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Loads the file, applies command line overrides and resolves every
    /// path against the root path.
    pub fn load<P: AsRef<Path>>(path: P, overrides: &ConfigOverrides) -> Result<Self, ProxyError> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(overrides);
        config.resolve_paths()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if overrides.verbose {
            self.verbose_logging = true;
        }
        if let Some(port) = overrides.proxy_port {
            self.proxy_port = port;
        }
        if let Some(port) = overrides.server_http_port {
            self.server_http_port = port;
        }
        if let Some(path) = &overrides.game_root_path {
            self.game_root_path = PathBuf::from(path);
        }
        if let Some(path) = &overrides.root_path {
            self.root_path = PathBuf::from(path);
        }
        if let Some(prefix) = &overrides.api_prefix {
            self.api_prefix = prefix.clone();
        }
        if let Some(flag) = overrides.use_mad4fp {
            self.use_mad4fp = flag;
        }
        if let Some(port) = overrides.external_legacy_port {
            self.external_legacy_port = port;
        }
        if let Some(path) = &overrides.legacy_htdocs_path {
            self.legacy_htdocs_path = PathBuf::from(path);
        }
        if let Some(path) = &overrides.php_cgi_path {
            self.php_cgi_path = PathBuf::from(path);
        }
        if let Some(flag) = overrides.use_infinity_server {
            self.use_infinity_server = flag;
        }
        if let Some(url) = &overrides.infinity_server_url {
            self.infinity_server_url = url.clone();
        }
        if let Some(flag) = overrides.handle_legacy_requests {
            self.handle_legacy_requests = flag;
        }
        if let Some(format) = overrides.log_format {
            self.log_format = format;
        }
    }

    /// Makes `root_path` absolute and resolves the other filesystem paths
    /// relative to it. Absolute paths are kept as given.
    pub fn resolve_paths(&mut self) -> Result<(), ProxyError> {
        let root = strip_quotes(&self.root_path);
        let root = if root.as_os_str().is_empty() {
            std::env::current_dir()?
        } else {
            std::path::absolute(&root)
                .map_err(|e| ProxyError::Config(format!("Failed to get absolute root path: {}", e)))?
        };

        self.game_root_path = resolve_against(&root, &self.game_root_path)?;
        self.legacy_htdocs_path = resolve_against(&root, &self.legacy_htdocs_path)?;
        self.legacy_cgibin_path = resolve_against(&root, &self.legacy_cgibin_path)?;
        self.php_cgi_path = resolve_against(&root, &self.php_cgi_path)?;
        if let Some(cert) = &self.mitm_certificate {
            self.mitm_certificate = Some(resolve_against(&root, cert)?);
        }
        if let Some(key) = &self.mitm_private_key {
            self.mitm_private_key = Some(resolve_against(&root, key)?);
        }
        self.root_path = root;
        Ok(())
    }

    pub fn proxy_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.proxy_port))
    }

    pub fn archive_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.server_http_port))
    }

    pub fn external_legacy_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.external_legacy_port))
    }
}

fn strip_quotes(path: &Path) -> PathBuf {
    PathBuf::from(path.to_string_lossy().trim().trim_matches('"'))
}

fn resolve_against(root: &Path, path: &Path) -> Result<PathBuf, ProxyError> {
    let path = strip_quotes(path);
    let joined = root.join(&path);
    std::path::absolute(&joined).map_err(|e| {
        ProxyError::Config(format!("Failed to get absolute path for {}: {}", path.display(), e))
    })
}
