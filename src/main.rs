use anyhow::{Context, bail};
use clap::Parser;
use content_archive_proxy::config::{ConfigOverrides, DEFAULT_CONFIG_FILE, LogFormat, ProxyConfiguration};
use content_archive_proxy::{config_validation, logging, proxy::ProxyFactory};
use log::{error, info};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser)]
#[clap(
    version,
    about = "Intercepting proxy that serves legacy game content from a local content archive"
)]
struct Args {
    #[clap(short, long, help = "Enable verbose (debug) logging")]
    verbose: bool,

    #[clap(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE, help = "Configuration file path")]
    config: String,

    #[clap(long, value_name = "FILE", help = "Write a configuration file with default values and exit")]
    generate_config: Option<String>,

    #[clap(long, value_name = "PORT", help = "Port the proxy listens on")]
    proxy_port: Option<u16>,

    #[clap(long, value_name = "PORT", help = "Port of the content archive server")]
    server_http_port: Option<u16>,

    #[clap(long, value_name = "DIR", help = "Directory holding archived game content")]
    game_root_path: Option<String>,

    #[clap(long, value_name = "DIR", help = "Root path other paths are resolved against")]
    root_path: Option<String>,

    #[clap(long, value_name = "PREFIX", help = "Prefix of archive API calls")]
    api_prefix: Option<String>,

    #[clap(long, value_name = "BOOL", help = "Use the Mad4FP content source")]
    use_mad4fp: Option<bool>,

    #[clap(long, value_name = "PORT", help = "Port of the external legacy server")]
    external_legacy_port: Option<u16>,

    #[clap(long, value_name = "DIR", help = "Legacy htdocs directory")]
    legacy_htdocs_path: Option<String>,

    #[clap(long, value_name = "FILE", help = "php-cgi executable")]
    php_cgi_path: Option<String>,

    #[clap(long, value_name = "BOOL", help = "Use the Infinity content server")]
    use_infinity_server: Option<bool>,

    #[clap(long, value_name = "URL", help = "Infinity content server URL")]
    infinity_server_url: Option<String>,

    #[clap(long, value_name = "BOOL", help = "Handle legacy requests in-process instead of forwarding them")]
    handle_legacy_requests: Option<bool>,

    #[clap(long, value_name = "FORMAT", help = "Log format: text or json")]
    log_format: Option<LogFormat>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            verbose: self.verbose,
            proxy_port: self.proxy_port,
            server_http_port: self.server_http_port,
            game_root_path: self.game_root_path.clone(),
            root_path: self.root_path.clone(),
            api_prefix: self.api_prefix.clone(),
            use_mad4fp: self.use_mad4fp,
            external_legacy_port: self.external_legacy_port,
            legacy_htdocs_path: self.legacy_htdocs_path.clone(),
            php_cgi_path: self.php_cgi_path.clone(),
            use_infinity_server: self.use_infinity_server,
            infinity_server_url: self.infinity_server_url.clone(),
            handle_legacy_requests: self.handle_legacy_requests,
            log_format: self.log_format,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(config_file) = &args.generate_config {
        ProxyConfiguration::default().to_file(config_file)?;
        println!("Default configuration written to {}", config_file);
        return Ok(());
    }

    if !Path::new(&args.config).exists() {
        bail!("Configuration file not found: {}", args.config);
    }
    let config = ProxyConfiguration::load(&args.config, &args.overrides())
        .with_context(|| format!("Failed to load {}", args.config))?;

    logging::init(config.verbose_logging, config.log_format)?;

    let validation = config_validation::validate(&config);
    validation.log();
    if !validation.is_valid {
        for e in &validation.errors {
            error!("Configuration error: {}", e);
        }
        bail!("Invalid configuration in {}", args.config);
    }

    info!("Root path: {}", config.root_path.display());
    info!("Game root path: {}", config.game_root_path.display());
    info!("Legacy htdocs path: {}", config.legacy_htdocs_path.display());
    info!("Legacy cgi-bin path: {}", config.legacy_cgibin_path.display());
    info!("php-cgi path: {}", config.php_cgi_path.display());

    let proxy = ProxyFactory::create(Arc::new(config))?;

    info!("Starting content archive proxy...");
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
        result = proxy.run() => {
            result.context("Proxy stopped")?;
        }
    }

    info!("Proxy stopped");
    Ok(())
}
