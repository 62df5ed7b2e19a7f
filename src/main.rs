//! Prognos - command-line entry point

use clap::Parser;
use prognos::cli::{cmd_evaluate, cmd_run, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prognos=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, data } => cmd_run(&config, &data)?,
        Commands::Evaluate { config, data } => cmd_evaluate(&config, &data)?,
    }

    Ok(())
}
