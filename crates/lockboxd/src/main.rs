//! lockboxd: lockbox vault server
//!
//! Usage:
//!   lockboxd [--config /etc/lockbox/config.toml] [--listen 0.0.0.0:42000]

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use lockbox_core::config::VaultConfig;

#[derive(Parser, Debug)]
#[command(name = "lockboxd", version, about = "lockbox vault server")]
struct Cli {
    /// Path to lockbox.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "LOCKBOX_CONFIG",
        default_value = "/etc/lockbox/config.toml"
    )]
    config: PathBuf,

    /// TCP listen address (overrides [daemon] socket and listen)
    #[arg(long, env = "LOCKBOX_LISTEN")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error); defaults to [daemon] log_level
    #[arg(long, env = "LOCKBOX_LOG")]
    log: Option<String>,

    /// Log format; defaults to [daemon] log_format
    #[arg(long, env = "LOCKBOX_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let mut config = VaultConfig::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.daemon.listen = Some(listen);
    }

    let level = cli.log.unwrap_or_else(|| config.daemon.log_level.clone());
    let format = cli.log_format.unwrap_or(match config.daemon.log_format.as_str() {
        "text" => LogFormat::Text,
        _ => LogFormat::Json,
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "lockboxd starting"
    );
    if !config_found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    lockboxd::daemon::run(config).await
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
