use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use aisway::cli::{self, Args, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Execute {
            actor,
            counterpart,
            technique,
            intensity,
            relationship_level,
            emotional_state,
            phase,
            provider,
            model,
            data_dir,
        } => {
            cli::handle_execute(
                actor,
                counterpart,
                technique,
                intensity,
                relationship_level,
                emotional_state,
                phase,
                provider,
                model,
                data_dir,
            )
            .await?;
        }
        Commands::Select {
            actor,
            counterpart,
            relationship_level,
            emotional_state,
            data_dir,
        } => {
            cli::handle_select(actor, counterpart, relationship_level, emotional_state, data_dir)
                .await?;
        }
        Commands::Check {
            actor,
            counterpart,
            technique,
            intensity,
            relationship_level,
            emotional_state,
            data_dir,
        } => {
            cli::handle_check(
                actor,
                counterpart,
                technique,
                intensity,
                relationship_level,
                emotional_state,
                data_dir,
            )
            .await?;
        }
        Commands::Stats { actor, technique, data_dir } => {
            cli::handle_stats(actor, technique, data_dir).await?;
        }
        Commands::History { actor, limit, data_dir } => {
            cli::handle_history(actor, limit, data_dir).await?;
        }
        Commands::Profile {
            actor,
            counterpart,
            add_vulnerability,
            immune,
            data_dir,
        } => {
            cli::handle_profile(actor, counterpart, add_vulnerability, immune, data_dir).await?;
        }
        Commands::Strategies => {
            cli::handle_strategies();
        }
    }

    Ok(())
}
