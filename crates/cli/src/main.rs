//! coact CLI, the main entry point.
//!
//! Commands:
//! - `run`      — Run the agent on a task and report the trace
//! - `catalog`  — Show the guidance text for the configured catalog
//! - `config`   — Show the effective configuration

use clap::{Parser, Subcommand};

mod commands;
mod report;

#[derive(Parser)]
#[command(
    name = "coact",
    about = "coact: soft-guidance agent harness",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent on a task
    Run(commands::run::RunArgs),

    /// Show the category catalog as the agent sees it
    Catalog,

    /// Show the effective configuration as TOML
    Config {
        /// Print the config file path instead
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Catalog => commands::catalog::run()?,
        Commands::Config { path: true } => commands::config_cmd::path(),
        Commands::Config { path: false } => commands::config_cmd::show()?,
    }

    Ok(())
}
