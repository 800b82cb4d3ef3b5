use clap::Parser;
use whiteboard::cli::{run_cli, Cli, Commands};
use whiteboard::logging::{init_logging_with_config, LogConfig};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // `status` writes its document to stdout; only a server logs there.
    if matches!(cli.command, Commands::Serve { .. }) {
        init_logging_with_config(&LogConfig::from_env())?;
    }
    run_cli(cli)
}
