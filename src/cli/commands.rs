use crate::config::WhiteboardConfig;
use crate::launch::{resolve_status, Whiteboard};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

/// Command-line interface of the whiteboard server
#[derive(Parser)]
#[command(name = "whiteboard")]
#[command(about = "Dynamic HTTP whiteboard", long_about = None)]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the providers declared in a configuration file
    Serve {
        /// Whiteboard configuration (YAML)
        #[arg(short, long, env = "WHITEBOARD_CONFIG")]
        config: PathBuf,

        /// Reload declared providers when the configuration file changes
        #[arg(long, default_value_t = false)]
        watch: bool,
    },
    /// Print the status document a configuration resolves to
    Status {
        /// Whiteboard configuration (YAML)
        #[arg(short, long, env = "WHITEBOARD_CONFIG")]
        config: PathBuf,

        /// Single-line JSON
        #[arg(long, default_value_t = false)]
        compact: bool,
    },
}

/// Execute a parsed command line.
///
/// # Errors
///
/// The configuration cannot be loaded, or the whiteboard cannot start.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve { config, watch } => serve(&config, watch),
        Commands::Status { config, compact } => {
            println!("{}", status_json(&config, compact)?);
            Ok(())
        }
    }
}

/// Status document for the configuration at `path`.
///
/// # Errors
///
/// The configuration cannot be loaded or does not validate.
pub fn status_json(path: &Path, compact: bool) -> Result<String> {
    let config = WhiteboardConfig::load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let status = resolve_status(&config)?;
    let json = if compact {
        serde_json::to_string(&status)?
    } else {
        serde_json::to_string_pretty(&status)?
    };
    Ok(json)
}

fn serve(path: &Path, watch: bool) -> Result<()> {
    let config = WhiteboardConfig::load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let mut whiteboard = Whiteboard::start(&config, path)?;
    if watch {
        whiteboard.watch()?;
    }
    wait_for_shutdown(whiteboard)
}

#[cfg(unix)]
fn wait_for_shutdown(mut whiteboard: Whiteboard) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;
    if let Some(signal) = signals.forever().next() {
        info!(signal, whiteboard = %whiteboard.name(), "Shutdown signal received");
    }
    whiteboard.close();
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown(whiteboard: Whiteboard) -> Result<()> {
    info!(whiteboard = %whiteboard.name(), "Serving until the listener exits");
    whiteboard.join()
}
