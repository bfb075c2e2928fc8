//! Zero Cost Website CLI - database migrations and lead maintenance.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! zc-cli migrate
//!
//! # Delete abandoned forms untouched for 90 days
//! zc-cli abandoned purge --older-than-days 90
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "zc-cli")]
#[command(author, version, about = "Zero Cost Website CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Maintain abandoned lead forms
    Abandoned {
        #[command(subcommand)]
        action: AbandonedAction,
    },
}

#[derive(Subcommand)]
enum AbandonedAction {
    /// Delete abandoned forms not updated within the window
    Purge {
        /// Age in days after which an abandoned form is deleted
        #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u32).range(1..=36_500))]
        older_than_days: u32,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Abandoned { action } => match action {
            AbandonedAction::Purge { older_than_days } => {
                let deleted = commands::abandoned::purge(older_than_days).await?;
                tracing::info!(deleted, older_than_days, "Abandoned forms purged");
            }
        },
    }
    Ok(())
}
