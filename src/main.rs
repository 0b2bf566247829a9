use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod network;
mod sandbox;
mod session;
mod tool;

#[derive(Parser)]
#[command(name = "warden")]
#[command(
    author,
    version,
    about = "Run coding-agent tools in network-isolated containers"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tool session in a sandboxed container
    Run {
        /// Tool to run (overrides the configured default)
        #[arg(short, long)]
        tool: Option<String>,

        /// Network mode override: open, restricted, or allowlist
        #[arg(long, value_enum)]
        network: Option<config::NetworkMode>,

        /// Arguments passed through to the tool
        #[arg(trailing_var_arg = true)]
        prompt_args: Vec<String>,
    },

    /// Tear down a leftover session container and its firewall rules
    Down {
        /// Container name (e.g. warden-1a2b3c4d)
        container: String,
    },

    /// Show the effective configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("warden=debug")
    } else {
        EnvFilter::new("warden=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            tool,
            network,
            prompt_args,
        } => {
            commands::run::run(tool, network, prompt_args).await?;
        }
        Commands::Down { container } => {
            commands::down::run(container).await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
    }

    Ok(())
}
