//! Universal Control Plane server
//!
//! Loads the configuration, starts the control plane and serves the REST
//! API. `SIGHUP` re-reads the plane list from the configuration file.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use universal_control_plane::{
    ApiServer, ApiServerConfig, ControlPlane, Error, Result, UcpConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Universal Control Plane - one front door for resources across planes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(long, env = "UCP_CONFIG")]
    config: Option<PathBuf>,

    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:9443")]
    api_addr: String,

    /// Override the configured base path
    #[arg(long, env = "BASE_PATH")]
    base_path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the configuration JSON schema and exit
    #[arg(long)]
    print_config_schema: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config_schema {
        println!("{}", UcpConfig::json_schema()?);
        return Ok(());
    }

    init_logging(&args);

    let config = load_config(&args)?;

    info!("Starting Universal Control Plane");
    info!("  Version: {}", universal_control_plane::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Base path: '{}'", config.base_path);
    info!("  Planes: {}", config.planes.len());

    let control_plane = ControlPlane::start(config).await?;

    let api_config = ApiServerConfig {
        rest_addr: args
            .api_addr
            .parse()
            .map_err(|e| Error::Configuration(format!("Invalid REST API address: {}", e)))?,
    };
    let api_server = ApiServer::new(api_config, Arc::clone(&control_plane));

    spawn_reload_handler(&args, Arc::clone(&control_plane));

    let shutdown = api_server.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown.send(());
    });

    api_server.run().await?;
    control_plane.shutdown().await;

    info!("Control plane shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> Result<UcpConfig> {
    let mut config = match &args.config {
        Some(path) => UcpConfig::load(path)?,
        None => {
            warn!("No configuration file given, starting without planes");
            UcpConfig::default()
        }
    };
    if let Some(base_path) = &args.base_path {
        config.base_path = base_path.clone();
        config.validate()?;
    }
    Ok(config)
}

// =============================================================================
// Reload
// =============================================================================

#[cfg(unix)]
fn spawn_reload_handler(args: &Args, control_plane: Arc<ControlPlane>) {
    use tokio::signal::unix::{signal, SignalKind};

    let Some(path) = args.config.clone() else {
        return;
    };
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Configuration reload disabled: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("Reloading planes from {}", path.display());
            match UcpConfig::load(&path).and_then(|config| control_plane.reload(&config)) {
                Ok(events) => {
                    for event in events {
                        info!("  {:?}", event);
                    }
                }
                Err(e) => error!("Reload failed, keeping current planes: {}", e),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_handler(_args: &Args, _control_plane: Arc<ControlPlane>) {}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "tower_http=info", "aws_config=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
