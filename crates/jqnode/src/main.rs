//! jqnode — JQOpenClaw headless node agent.
//!
//! Parses flags and the optional JSON config (CLI overrides file),
//! takes the single-instance lock, then runs the node application and
//! exits with its code.

use clap::Parser;
use jqnode::app::NodeApplication;
use jqnode::instance_lock::{self, INSTANCE_LOCK_TOKEN};
use jqnode::options::NodeOptions;
use rand::Rng;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*};

#[derive(Parser)]
#[command(name = "jqnode")]
#[command(about = "JQOpenClaw headless node")]
#[command(version)]
struct Cli {
    /// Gateway host (required)
    #[arg(long, value_name = "ip-or-host")]
    host: Option<String>,

    /// Gateway port (required)
    #[arg(long, value_name = "port")]
    port: Option<u16>,

    /// Gateway shared token (required)
    #[arg(long, value_name = "gateway-token")]
    token: Option<String>,

    /// Enable TLS (wss)
    #[arg(long)]
    tls: bool,

    /// Expected SHA-256 fingerprint for the gateway certificate
    #[arg(long = "tls-fingerprint", value_name = "sha256")]
    tls_fingerprint: Option<String>,

    /// Node display name
    #[arg(long = "display-name", value_name = "name")]
    display_name: Option<String>,

    /// Node instance id
    #[arg(long = "node-id", value_name = "id")]
    node_id: Option<String>,

    /// JSON config file path
    #[arg(long, value_name = "path")]
    config: Option<PathBuf>,

    /// Device identity file path
    #[arg(long = "identity-path", value_name = "path")]
    identity_path: Option<String>,

    /// File server base URI for screenshot upload
    #[arg(long = "file-server-uri", value_name = "uri")]
    file_server_uri: Option<String>,

    /// File server token sent in the X-Token header
    #[arg(long = "file-server-token", value_name = "token")]
    file_server_token: Option<String>,

    /// Device family for auth metadata
    #[arg(long = "device-family", value_name = "family")]
    device_family: Option<String>,

    /// Exit the process once registration succeeds
    #[arg(long = "exit-after-register")]
    exit_after_register: bool,
}

fn generate_default_display_name() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("JQOpenClawNode-{suffix:04}")
}

fn resolve_options(cli: Cli) -> Result<NodeOptions, String> {
    let mut options = NodeOptions::default();

    if let Some(config) = &cli.config {
        let config_path = config.to_string_lossy().trim().to_string();
        if !config_path.is_empty() {
            options.config_path = config_path.clone();
            options
                .apply_config_file(&PathBuf::from(config_path))
                .map_err(|e| e.to_string())?;
        }
    }

    if let Some(host) = cli.host {
        options.host = host.trim().to_string();
    }
    if let Some(port) = cli.port {
        options.port = port;
    }
    if let Some(token) = cli.token {
        options.token = token;
    }
    if cli.tls {
        options.tls = true;
    }
    if let Some(fingerprint) = cli.tls_fingerprint {
        options.tls_fingerprint = fingerprint.trim().to_string();
    }
    if let Some(display_name) = cli.display_name {
        options.display_name = display_name.trim().to_string();
    }
    if let Some(node_id) = cli.node_id {
        options.node_id = node_id;
    }
    if let Some(identity_path) = cli.identity_path {
        options.identity_path = identity_path;
    }
    if let Some(uri) = cli.file_server_uri {
        options.file_server_uri = uri.trim().to_string();
    }
    if let Some(token) = cli.file_server_token {
        options.file_server_token = token;
    }
    if let Some(family) = cli.device_family {
        options.device_family = family;
    }
    if cli.exit_after_register {
        options.exit_after_register = true;
    }

    if options.display_name.trim().is_empty() {
        options.display_name = generate_default_display_name();
    }

    options.validate().map_err(|e| e.to_string())?;
    Ok(options)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let _lock = match instance_lock::acquire(INSTANCE_LOCK_TOKEN) {
        Some(lock) => lock,
        None => {
            info!("another instance is already running");
            std::process::exit(1);
        }
    };

    let cli = Cli::parse();
    let options = match resolve_options(cli) {
        Ok(options) => options,
        Err(message) => {
            error!("{message}");
            std::process::exit(1);
        }
    };

    let exit_code = NodeApplication::new(options).run().await;
    std::process::exit(exit_code);
}
