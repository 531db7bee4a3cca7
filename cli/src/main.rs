//! diagpull CLI - stdio entry point for the pull-diagnostics server.
//!
//! ```text
//! main() -> load ServerConfig -> init_tracing() -> Server::run(stdin, stdout)
//!                                                       |
//!                                                       v
//!                                      exit 0 after shutdown+exit, 1 otherwise
//! ```
//!
//! Stdout carries the protocol, so logs go to stderr or to a file.

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Mutex,
};

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use diagpull_lsp::{Server, ServerConfig, config_path};

#[derive(Debug, Parser)]
#[command(name = "diagpull", version, about = "Pull-diagnostics language server")]
struct Args {
    /// Config file (defaults to $DIAGPULL_CONFIG or ~/.config/diagpull/config.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Append logs to this file instead of stderr.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

/// Config load problems are reported after logging is up.
fn load_config(explicit: Option<&Path>) -> (ServerConfig, Option<String>) {
    let Some(path) = config_path(explicit) else {
        return (ServerConfig::default(), None);
    };
    match ServerConfig::load(&path) {
        Ok(Some(config)) => (config, None),
        Ok(None) => (ServerConfig::default(), None),
        Err(err) => (
            ServerConfig::default(),
            Some(format!("{err}; using default settings")),
        ),
    }
}

fn init_tracing(log_file: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    let mut warning = None;
    if let Some(path) = log_file {
        match open_log_file(path) {
            Ok(file) => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                    .with(env_filter)
                    .init();
                tracing::info!(path = %path.display(), "Logging initialized");
                return;
            }
            Err(e) => warning = Some(format!("Failed to open log file {}: {e}", path.display())),
        }
    }

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .with(env_filter)
        .init();
    if let Some(warning) = warning {
        tracing::warn!("{warning}");
    }
}

fn open_log_file(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let (config, config_warning) = load_config(args.config.as_deref());

    let log_file = args.log_file.clone().or_else(|| config.log_file.clone());
    init_tracing(log_file.as_deref());
    if let Some(warning) = config_warning {
        tracing::warn!("{warning}");
    }

    let exit = Server::new(config)
        .run(tokio::io::stdin(), tokio::io::stdout())
        .await?;

    if exit.shutdown_requested {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::warn!("Input closed without a shutdown request");
        Ok(ExitCode::from(1))
    }
}
