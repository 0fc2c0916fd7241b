//! Maintenance trainer - Main Entry Point

use clap::Parser;
use maintenance_trainer::cli::{cmd_families, cmd_predict, cmd_status, cmd_train, Cli, Commands, TrainArgs};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maintenance_trainer=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            train,
            test,
            config,
            artifact,
            min_score,
            parallel,
            tracking_uri,
            tracking_dir,
            no_tracking,
        } => {
            cmd_train(TrainArgs {
                train,
                test,
                config,
                artifact,
                min_score,
                parallel,
                tracking_uri,
                tracking_dir,
                no_tracking,
            })?;
        }
        Commands::Predict { model, data, output } => {
            cmd_predict(&model, &data, output.as_deref())?;
        }
        Commands::Families { config } => {
            cmd_families(config.as_deref())?;
        }
        Commands::Status { artifact } => {
            cmd_status(&artifact)?;
        }
    }

    Ok(())
}
