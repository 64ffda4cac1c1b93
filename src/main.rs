mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands, OptionCommands};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cxref=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::LoadCommands { path } => {
            cli::load_commands(&cli.db, &path)?;
        }
        Commands::Ingest { facts } => {
            cli::ingest(&cli.db, facts.as_deref())?;
        }
        Commands::NextFile => {
            cli::next_file(&cli.db)?;
        }
        Commands::Grep { usr, overrides } => {
            cli::grep(&cli.db, &usr, overrides)?;
        }
        Commands::FindDef { file, offset } => {
            cli::find_definition(&cli.db, &file, offset)?;
        }
        Commands::Remove { path } => {
            cli::remove(&cli.db, &path)?;
        }
        Commands::Clean => {
            cli::clean(&cli.db)?;
        }
        Commands::Stats => {
            cli::stats(&cli.db)?;
        }
        Commands::Opt { command } => match command {
            OptionCommands::Get { name, list } => {
                cli::option_get(&cli.db, &name, list)?;
            }
            OptionCommands::Set { name, values, list } => {
                cli::option_set(&cli.db, &name, &values, list)?;
            }
        },
    }

    Ok(())
}
