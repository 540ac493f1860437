use std::path::PathBuf;

use planwise_core::config::default_config_path;
use planwise_core::SyncSettings;

use crate::commands::common::{load_settings, print_json, CommandContext};
use crate::error::CliError;

fn config_path() -> Result<PathBuf, CliError> {
    default_config_path()
        .ok_or_else(|| CliError::Config("Failed to resolve a config directory".into()))
}

pub fn run_config_show(context: &CommandContext) -> Result<(), CliError> {
    let settings = load_settings(context)?;

    if context.json {
        let mut redacted = settings.clone();
        if redacted.api_key.is_some() {
            redacted.api_key = Some("[REDACTED]".into());
        }
        return print_json(&redacted);
    }

    println!("{settings:#?}");
    println!("db: {}", settings.resolved_db_path()?.display());
    if settings.access_token.is_some() {
        println!("session: provided by environment");
    }
    Ok(())
}

pub fn run_config_init(api_url: String, api_key: Option<String>) -> Result<(), CliError> {
    let path = config_path()?;
    let settings = init_settings(SyncSettings::load_from_path(&path)?, api_url, api_key)?;
    settings.save_to_path(&path)?;
    println!("{}", path.display());
    Ok(())
}

/// Point `settings` at a backend, keeping every other value.
pub fn init_settings(
    mut settings: SyncSettings,
    api_url: String,
    api_key: Option<String>,
) -> Result<SyncSettings, CliError> {
    settings.api_url = Some(api_url.trim().trim_end_matches('/').to_string());
    if api_key.is_some() {
        settings.api_key = api_key;
    }
    settings.validate()?;
    Ok(settings)
}

pub fn run_config_path() -> Result<(), CliError> {
    println!("{}", config_path()?.display());
    Ok(())
}
