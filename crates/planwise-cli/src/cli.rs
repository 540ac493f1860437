use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "planwise")]
#[command(about = "Manage Planwise data offline and sync it when you're back online")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Skip the hosted backend and work against the local store only
    #[arg(long, global = true)]
    pub offline: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a record
    #[command(alias = "new")]
    Add {
        /// Target table (tasks, categories, projects, events)
        table: String,
        /// Fields as field=value pairs; values are parsed as JSON when possible
        #[arg(required = true, value_name = "FIELD=VALUE")]
        fields: Vec<String>,
    },
    /// List the records of a table
    #[command(alias = "ls")]
    List {
        table: String,
        /// Equality filters as field=value pairs
        #[arg(value_name = "FIELD=VALUE")]
        filters: Vec<String>,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Update fields of a record
    #[command(alias = "edit")]
    Update {
        table: String,
        /// Record ID
        id: String,
        #[arg(required = true, value_name = "FIELD=VALUE")]
        fields: Vec<String>,
    },
    /// Delete a record
    #[command(alias = "rm")]
    Delete { table: String, id: String },
    /// Show connectivity, queue length and sync statistics
    Status,
    /// Replay queued changes and reconcile every table with the backend
    Sync,
    /// Inspect pending operations
    #[command(subcommand)]
    Queue(QueueCommands),
    /// Inspect operations that exceeded the retry ceiling
    #[command(subcommand)]
    DeadLetters(DeadLetterCommands),
    /// Show the sync conflict resolution log
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Turn background sync on or off for clients sharing this store
    AutoSync {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Manage sync settings
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Write completions to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queued operations in replay order
    List,
    /// Drop every queued operation without replaying it
    Clear,
}

#[derive(Subcommand)]
pub enum DeadLetterCommands {
    List,
    /// Move dead letters back onto the queue with a fresh retry budget
    Requeue,
    Clear,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective settings (secrets redacted)
    Show,
    /// Write backend settings to the config file
    Init {
        /// Backend base URL (https://...)
        #[arg(long)]
        api_url: String,
        /// Public API key
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Print the config file location
    Path,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub const fn enabled(self) -> bool {
        matches!(self, Self::On)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
