use std::path::PathBuf;

use chrono::Utc;
use planwise_core::models::{QueuedOperation, SyncConflict};
use planwise_core::{Filter, Record, RemoteError, Served, SyncService, SyncSettings, TableName};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CliError;

/// Fields the sync core stamps itself
const MANAGED_FIELDS: [&str; 2] = ["created_at", "updated_at"];

/// Global flags shared by every command.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub db_path: Option<PathBuf>,
    pub offline: bool,
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct ServedItem<T: Serialize> {
    pub source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_operation: Option<String>,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub table: TableName,
    pub record_id: String,
    pub local_updated_at: i64,
    pub remote_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

pub fn load_settings(context: &CommandContext) -> Result<SyncSettings, CliError> {
    let mut settings = SyncSettings::load()?;
    if let Some(path) = &context.db_path {
        settings.db_path = Some(path.clone());
    }
    Ok(settings)
}

/// Open the local store and wire it to the configured backend.
pub fn open_service(context: &CommandContext) -> Result<SyncService, CliError> {
    let settings = load_settings(context)?;
    let service = SyncService::from_settings(&settings)?;
    if context.offline {
        service.set_online(false);
    }
    Ok(service)
}

pub fn parse_table(table: &str) -> Result<TableName, CliError> {
    Ok(table.parse::<TableName>()?)
}

pub fn normalize_record_id(id: &str) -> Result<String, CliError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(CliError::EmptyRecordId);
    }
    Ok(id.to_string())
}

/// Parse `field=value` arguments. Values that are valid JSON keep their type
/// (`done=true`, `priority=2`); anything else is taken as a string.
pub fn parse_fields(args: &[String]) -> Result<Map<String, Value>, CliError> {
    let mut fields = Map::new();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| CliError::InvalidField(arg.clone()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::InvalidField(arg.clone()));
        }
        if MANAGED_FIELDS.contains(&key) {
            return Err(CliError::ReservedField(key.to_string()));
        }
        fields.insert(key.to_string(), parse_value(value));
    }
    Ok(fields)
}

pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn parse_filter(args: &[String]) -> Result<Option<Filter>, CliError> {
    let fields = parse_fields(args)?;
    if fields.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        fields
            .into_iter()
            .fold(Filter::new(), |filter, (key, value)| filter.eq(key, value)),
    ))
}

pub fn served_to_item<T: Serialize + Clone>(served: &Served<T>) -> ServedItem<T> {
    match served {
        Served::Remote(value) => ServedItem {
            source: "remote",
            cause: None,
            queued_operation: None,
            data: value.clone(),
        },
        Served::Local {
            value,
            cause,
            operation,
        } => ServedItem {
            source: "local",
            cause: Some(cause.to_string()),
            queued_operation: operation.as_ref().map(|op| op.id.to_string()),
            data: value.clone(),
        },
    }
}

/// One-line note for results served from the local store.
pub fn local_fallback_note<T>(served: &Served<T>) -> Option<String> {
    let cause = served.cause()?;
    let reason = match cause {
        RemoteError::Offline => "offline".to_string(),
        other => other.to_string(),
    };
    Some(match served {
        Served::Local {
            operation: Some(_), ..
        } => format!("Saved locally and queued for sync ({reason})"),
        _ => format!("Served from the local store ({reason})"),
    })
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let short_id = short_id(record.id.as_str());
            let preview = record_preview(record, 40);
            let relative_time = format_relative_time(record.updated_at, now_ms);
            format!("{short_id:<13}  {preview:<40}  {relative_time}")
        })
        .collect()
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

/// Title-like field, falling back to the remaining fields as compact JSON.
pub fn record_preview(record: &Record, max_chars: usize) -> String {
    let text = record.title().map_or_else(
        || Value::Object(record.fields.clone()).to_string(),
        str::to_string,
    );
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_operation_lines(operations: &[QueuedOperation]) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            let mut line = format!(
                "{}  {:<6}  {}/{}",
                format_sync_timestamp(operation.timestamp),
                operation.kind.name(),
                operation.table,
                operation.record_id()
            );
            if operation.attempts > 0 {
                line.push_str(&format!("  attempts={}", operation.attempts));
            }
            if let Some(error) = &operation.last_error {
                line.push_str(&format!("  last_error={error}"));
            }
            line
        })
        .collect()
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        table: conflict.table,
        record_id: conflict.record_id.clone(),
        local_updated_at: conflict.local_updated_at,
        remote_updated_at: conflict.remote_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<17}  {}/{}  local={} remote={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.table,
                conflict.record_id,
                conflict.local_updated_at,
                conflict.remote_updated_at
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff_secs = (now_ms.saturating_sub(timestamp_ms) / 1000).max(0);

    if diff_secs < 60 {
        "just now".to_string()
    } else if diff_secs < 60 * 60 {
        format!("{}m ago", diff_secs / 60)
    } else if diff_secs < 24 * 60 * 60 {
        format!("{}h ago", diff_secs / (60 * 60))
    } else {
        format!("{}d ago", diff_secs / (24 * 60 * 60))
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
