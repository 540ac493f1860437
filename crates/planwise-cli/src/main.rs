//! planwise - command-line client for the Planwise offline-first data layer

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands, ConfigCommands, DeadLetterCommands, QueueCommands};
use crate::commands::common::{open_service, CommandContext};
use crate::commands::completions::run_completions;
use crate::commands::config::{run_config_init, run_config_path, run_config_show};
use crate::commands::queue::{
    run_dead_letters_clear, run_dead_letters_list, run_dead_letters_requeue, run_queue_clear,
    run_queue_list,
};
use crate::commands::records::{run_add, run_delete, run_list, run_update};
use crate::commands::sync::{run_auto_sync, run_conflicts, run_status, run_sync};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("planwise_core=info,planwise=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = CommandContext {
        db_path: cli.db_path,
        offline: cli.offline,
        json: cli.json,
    };

    match cli.command {
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref())?,
        Commands::Config(command) => match command {
            ConfigCommands::Show => run_config_show(&context)?,
            ConfigCommands::Init { api_url, api_key } => run_config_init(api_url, api_key)?,
            ConfigCommands::Path => run_config_path()?,
        },
        command => {
            let service = open_service(&context)?;
            let result = match command {
                Commands::Add { table, fields } => {
                    run_add(&service, &context, &table, &fields).await
                }
                Commands::List {
                    table,
                    filters,
                    limit,
                } => run_list(&service, &context, &table, &filters, limit).await,
                Commands::Update { table, id, fields } => {
                    run_update(&service, &context, &table, &id, &fields).await
                }
                Commands::Delete { table, id } => run_delete(&service, &context, &table, &id).await,
                Commands::Status => run_status(&service, &context),
                Commands::Sync => run_sync(&service, &context).await,
                Commands::Queue(QueueCommands::List) => run_queue_list(&service, &context),
                Commands::Queue(QueueCommands::Clear) => run_queue_clear(&service),
                Commands::DeadLetters(DeadLetterCommands::List) => {
                    run_dead_letters_list(&service, &context)
                }
                Commands::DeadLetters(DeadLetterCommands::Requeue) => {
                    run_dead_letters_requeue(&service)
                }
                Commands::DeadLetters(DeadLetterCommands::Clear) => run_dead_letters_clear(&service),
                Commands::Conflicts { limit } => run_conflicts(&service, &context, limit),
                Commands::AutoSync { state } => run_auto_sync(&service, state),
                Commands::Completions { .. } | Commands::Config(_) => Ok(()),
            };
            service.dispose().await;
            result?;
        }
    }

    Ok(())
}
