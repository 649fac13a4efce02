// Gateway entrypoint.

mod app;
mod cache;
mod config;
mod controller;
mod health;
mod http;
mod logsink;
mod metrics;
mod middleware;
mod proxy;
mod registry;
mod shutdown;

use crate::config::Config;
use crate::shutdown::GracefulShutdown;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const CONFIG_PATH: &str = "cfg/midgate.cfg.yaml";
const CONFIG_PATH_LOCAL: &str = "cfg/midgate.cfg.local.yaml";

/// midgate - an HTTP API gateway that multiplexes upstreams behind URL
/// prefixes, with admission control, an opt-in response cache, and
/// bounded-retention request logging.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Custom config file path.
    #[arg(short, long, value_name = "FILE")]
    cfg: Option<PathBuf>,
}

/// Loads configuration from YAML, trying a local override first, falling
/// back to the default path, then to built-in defaults if neither exists.
fn load_cfg(path: Option<PathBuf>) -> Config {
    if let Some(custom_path) = path {
        return match Config::load(&custom_path) {
            Ok(cfg) => {
                info!(component = "config", event = "load_success", path = ?custom_path, "config loaded");
                cfg
            }
            Err(e) => {
                error!(component = "config", event = "load_failed", path = ?custom_path, error = %e, "falling back to defaults");
                Config::defaults()
            }
        };
    }

    match Config::load(PathBuf::from(CONFIG_PATH_LOCAL)) {
        Ok(cfg) => {
            info!(component = "config", event = "load_success", path = CONFIG_PATH_LOCAL, "config loaded");
            cfg
        }
        Err(_) => match Config::load(PathBuf::from(CONFIG_PATH)) {
            Ok(cfg) => {
                info!(component = "config", event = "load_success", path = CONFIG_PATH, "config loaded");
                cfg
            }
            Err(_) => {
                info!(component = "config", event = "defaults_used", "no config file found, using defaults");
                Config::defaults()
            }
        },
    }
}

fn configure_logger(cfg: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let log_level = cfg.logs.level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if cfg.is_prod() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tokio::runtime::Runtime::new()
        .context("failed to create tokio runtime")?
        .block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    let shutdown_token = CancellationToken::new();

    let cfg = load_cfg(args.cfg);
    configure_logger(&cfg);

    let graceful_shutdown = Arc::new(GracefulShutdown::new(shutdown_token.clone()));
    graceful_shutdown
        .set_graceful_timeout(Duration::from_secs(30))
        .await;

    let application = app::App::new(shutdown_token.clone(), cfg)
        .await
        .context("failed to initialize application")?;

    graceful_shutdown.add(1);
    application
        .serve(graceful_shutdown.clone())
        .await
        .context("failed to start server")?;

    if let Err(e) = graceful_shutdown.await_shutdown().await {
        error!(component = "main", event = "graceful_shutdown_failed", error = %e, "failed to gracefully shut down service");
        return Err(e);
    }

    Ok(())
}
