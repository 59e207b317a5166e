mod cmd;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use task_api_core::config::DEFAULT_CONFIG_FILE;

#[derive(Parser)]
#[command(
    name = "task-api",
    about = "Webhook runner: expose pre-configured shell commands as HTTP endpoints",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file rendered by the deployment layer
    #[arg(long, short = 'c', global = true, env = "TASK_API_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook server
    Serve {
        /// Listen on this port instead of the one in the config file
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate the config file and list the actions it defines
    Check,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        Commands::Check => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Serve { port } => cmd::serve::run(&cli.config, port),
        Commands::Check => cmd::check::run(&cli.config, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
