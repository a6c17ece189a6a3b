use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod credential;
mod exec;
mod host;
mod lock;
mod manifest;
mod reconcile;
mod settings;
mod store;

use cli::apply::TargetArgs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Settings file (defaults to $REGAUTH_CONFIG, then ~/.config/regauth/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring registry credentials to the desired state
    Apply {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Show the steps `apply` would take without changing anything
    Plan {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// List registries present in a user's credential store
    #[command(visible_alias = "ls")]
    Status {
        /// Account to inspect (defaults to the current user)
        #[arg(long)]
        local_user: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let settings =
        settings::Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    match &cli.command {
        Commands::Apply { target } => cli::apply::apply(&settings, target)?,
        Commands::Plan { target } => cli::apply::plan(&settings, target)?,
        Commands::Status { local_user } => cli::status::status(local_user.as_deref())?,
    }

    Ok(())
}
