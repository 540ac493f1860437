use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] planwise_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Expected FIELD=VALUE, got '{0}'")]
    InvalidField(String),
    #[error("Field '{0}' is managed by sync and cannot be set")]
    ReservedField(String),
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Cannot sync while offline")]
    Offline,
    #[error(
        "Sync is not configured. Run `planwise config init --api-url <URL>` or set PLANWISE_API_URL."
    )]
    SyncNotConfigured,
}
