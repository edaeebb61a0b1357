pub mod archive_server;
pub mod common;
pub mod config;
pub mod config_validation;
pub mod connector;
pub mod content_type;
pub mod error;
pub mod finalizer;
pub mod forward_proxy;
pub mod htdocs;
pub mod legacy;
pub mod logging;
pub mod mitm;
pub mod proxy;
pub mod recorder;
pub mod request;
pub mod router;

pub use config::ProxyConfiguration;
pub use error::ProxyError;
pub use proxy::ProxyFactory;
pub use router::{FallbackDecision, ProxyRouter};
