mod policy;
mod runner;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// HDMI-CEC to Sonos volume bridge with WiFi setup hotspot.
#[derive(Debug, Parser)]
#[command(name = "cec-sonos-bridge", version, about)]
struct Cli {
    /// Device settings file (TOML). Defaults to the settings built into the binary.
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Decide between setup and bridge mode, then switch to it (default).
    Startup,
    /// Run the setup hotspot and portal.
    Ap,
    /// Run the CEC bridge and admin panel.
    Bridge,
}

/// stdout for humans plus an ANSI-free copy in the log file the admin page
/// serves. The file is optional: without it we still log to stdout.
fn init_logging(log_file: &Path) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let opened = OpenOptions::new().create(true).append(true).open(log_file);
    let (file_layer, file_error) = match opened {
        Ok(file) => (
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        tracing::warn!("Cannot open log file {}: {}", log_file.display(), e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = runner::load_settings(cli.settings.as_deref())?;
    init_logging(&settings.paths.log_file);

    let backends = runner::Backends::build(&settings)?;
    let result = match cli.command.unwrap_or(Command::Startup) {
        Command::Startup => policy::startup::run(&settings, &backends, cli.settings.as_deref()).await,
        Command::Ap => policy::ap::run(&settings, &backends).await,
        Command::Bridge => policy::bridge::run(&settings, &backends).await,
    };

    if let Err(e) = result {
        tracing::error!("❌ {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
