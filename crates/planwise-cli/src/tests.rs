use std::sync::Arc;

use clap::Parser;
use planwise_core::models::SyncConflict;
use planwise_core::remote::MemoryRemoteStore;
use planwise_core::{LocalStore, Record, SyncOptions, SyncService, SyncSettings, TableName};
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};

use crate::cli::{Cli, Commands, CompletionShell, DeadLetterCommands, QueueCommands, Toggle};
use crate::commands::common::{
    format_record_lines, format_relative_time, format_sync_conflict_lines, local_fallback_note,
    normalize_record_id, parse_fields, parse_filter, parse_table, record_preview, CommandContext,
};
use crate::commands::completions::render_completions;
use crate::commands::config::init_settings;
use crate::commands::records::{run_add, run_delete, run_update};
use crate::commands::sync::{format_sync_report_lines, run_sync};
use crate::error::CliError;

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

fn record(fields: Value) -> Record {
    let Value::Object(map) = fields else {
        panic!("expected an object");
    };
    Record::new(map)
}

fn service_with(remote: Arc<MemoryRemoteStore>) -> SyncService {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    SyncService::new(store, remote, SyncOptions::default())
}

#[test]
fn cli_parses_add_with_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "planwise", "add", "tasks", "title=Ship", "done=false", "--offline", "--json",
    ])
    .unwrap();
    assert!(cli.offline);
    assert!(cli.json);
    let Commands::Add { table, fields } = cli.command else {
        panic!("expected add");
    };
    assert_eq!(table, "tasks");
    assert_eq!(fields, args(&["title=Ship", "done=false"]));
}

#[test]
fn cli_requires_fields_for_add_and_update() {
    assert!(Cli::try_parse_from(["planwise", "add", "tasks"]).is_err());
    assert!(Cli::try_parse_from(["planwise", "update", "tasks", "abc"]).is_err());
}

#[test]
fn cli_parses_nested_subcommands() {
    let cli = Cli::try_parse_from(["planwise", "queue", "clear"]).unwrap();
    assert!(matches!(cli.command, Commands::Queue(QueueCommands::Clear)));

    let cli = Cli::try_parse_from(["planwise", "dead-letters", "requeue"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::DeadLetters(DeadLetterCommands::Requeue)
    ));

    let cli = Cli::try_parse_from(["planwise", "auto-sync", "off"]).unwrap();
    assert!(matches!(cli.command, Commands::AutoSync { state: Toggle::Off }));
}

#[test]
fn cli_list_defaults() {
    let cli = Cli::try_parse_from(["planwise", "ls", "events", "project_id=7"]).unwrap();
    let Commands::List {
        table,
        filters,
        limit,
    } = cli.command
    else {
        panic!("expected list");
    };
    assert_eq!(table, "events");
    assert_eq!(filters, args(&["project_id=7"]));
    assert_eq!(limit, 20);
}

#[test]
fn parse_fields_keeps_json_types_and_falls_back_to_strings() {
    let fields = parse_fields(&args(&[
        "title=Write report",
        "priority=2",
        "done=true",
        "tags=[\"a\",\"b\"]",
        "code=\"007\"",
        "note=",
    ]))
    .unwrap();

    let mut expected = Map::new();
    expected.insert("title".into(), json!("Write report"));
    expected.insert("priority".into(), json!(2));
    expected.insert("done".into(), json!(true));
    expected.insert("tags".into(), json!(["a", "b"]));
    expected.insert("code".into(), json!("007"));
    expected.insert("note".into(), json!(""));
    assert_eq!(fields, expected);
}

#[test]
fn parse_fields_rejects_malformed_and_managed_fields() {
    assert!(matches!(
        parse_fields(&args(&["title"])),
        Err(CliError::InvalidField(_))
    ));
    assert!(matches!(
        parse_fields(&args(&["=value"])),
        Err(CliError::InvalidField(_))
    ));
    assert!(matches!(
        parse_fields(&args(&["updated_at=1"])),
        Err(CliError::ReservedField(field)) if field == "updated_at"
    ));
    assert!(parse_fields(&args(&["id=abc"])).is_ok());
}

#[test]
fn parse_filter_is_none_without_arguments() {
    assert_eq!(parse_filter(&[]).unwrap(), None);

    let filter = parse_filter(&args(&["done=false"])).unwrap().unwrap();
    assert!(filter.matches(&record(json!({"done": false}))));
    assert!(!filter.matches(&record(json!({"done": true}))));
}

#[test]
fn parse_table_and_record_id() {
    assert_eq!(parse_table("Tasks").unwrap(), TableName::Tasks);
    assert!(matches!(parse_table("notes"), Err(CliError::Core(_))));
    assert_eq!(normalize_record_id("  abc ").unwrap(), "abc");
    assert!(matches!(
        normalize_record_id("   "),
        Err(CliError::EmptyRecordId)
    ));
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn record_preview_prefers_title_and_truncates() {
    let titled = record(json!({"title": "  Plan   the\nsprint  "}));
    assert_eq!(record_preview(&titled, 40), "Plan the sprint");

    let named = record(json!({"name": "Work"}));
    assert_eq!(record_preview(&named, 40), "Work");

    let untitled = record(json!({"color": "#ff0000", "weight": 3}));
    assert_eq!(record_preview(&untitled, 12), "{\"color\":...");
}

#[test]
fn format_record_lines_pads_short_id() {
    let mut task = record(json!({"id": "0192f5c3-aaaa-7bbb-8ccc-dddddddddddd", "title": "Ship"}));
    task.updated_at = chrono::Utc::now().timestamp_millis();
    let lines = format_record_lines(&[task]);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("0192f5c3-aaaa  Ship"));
    assert!(lines[0].ends_with("just now"));
}

#[test]
fn format_sync_conflict_lines_shows_strategy_and_record() {
    let conflict = SyncConflict {
        id: 1,
        table: TableName::Projects,
        record_id: "p1".into(),
        local_updated_at: 10,
        remote_updated_at: 10,
        resolved_at: 0,
        strategy: "unattended-remote".into(),
    };
    let lines = format_sync_conflict_lines(&[conflict]);
    assert_eq!(
        lines,
        vec!["1970-01-01 00:00:00 UTC  unattended-remote  projects/p1  local=10 remote=10"]
    );
}

#[test]
fn init_settings_normalizes_url_and_keeps_other_values() {
    let existing = SyncSettings {
        api_key: Some("old-key".into()),
        max_attempts: Some(3),
        ..SyncSettings::default()
    };
    let settings = init_settings(existing, " https://db.example.com/ ".into(), None).unwrap();
    assert_eq!(settings.api_url.as_deref(), Some("https://db.example.com"));
    assert_eq!(settings.api_key.as_deref(), Some("old-key"));
    assert_eq!(settings.max_attempts, Some(3));

    assert!(init_settings(SyncSettings::default(), "db.example.com".into(), None).is_err());
}

#[test]
fn completions_reference_binary_name() {
    for shell in [CompletionShell::Bash, CompletionShell::Zsh, CompletionShell::Fish] {
        let script = String::from_utf8(render_completions(shell)).unwrap();
        assert!(script.contains("planwise"));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_add_is_queued_then_synced() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let service = service_with(remote.clone());
    let context = CommandContext {
        offline: true,
        ..CommandContext::default()
    };
    service.set_online(false);

    run_add(&service, &context, "tasks", &args(&["title=Offline task"]))
        .await
        .unwrap();
    assert_eq!(service.queue().peek_length(), 1);
    assert!(remote.records(TableName::Tasks).is_empty());

    assert!(matches!(
        run_sync(&service, &context).await,
        Err(CliError::Offline)
    ));

    service.set_online(true);
    run_sync(&service, &CommandContext::default()).await.unwrap();
    assert_eq!(service.queue().peek_length(), 0);
    let synced = remote.records(TableName::Tasks);
    assert_eq!(synced.len(), 1);
    assert_eq!(synced[0].title(), Some("Offline task"));
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_without_backend_reports_missing_configuration() {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let service = SyncService::new(
        store,
        Arc::new(MemoryRemoteStore::new()),
        SyncOptions {
            start_online: false,
            ..SyncOptions::default()
        },
    );
    assert!(matches!(
        run_sync(&service, &CommandContext::default()).await,
        Err(CliError::SyncNotConfigured)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn update_and_delete_fall_back_locally_when_remote_is_down() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let service = service_with(remote.clone());
    let context = CommandContext::default();

    let created = service
        .facade()
        .create(TableName::Projects, Map::new())
        .await
        .unwrap()
        .into_value();
    remote.set_available(false);

    run_update(
        &service,
        &context,
        "projects",
        created.id.as_str(),
        &args(&["name=Renamed"]),
    )
    .await
    .unwrap();
    let cached = service.store().get(TableName::Projects, &created.id).unwrap();
    assert_eq!(cached.title(), Some("Renamed"));

    run_delete(&service, &context, "projects", created.id.as_str())
        .await
        .unwrap();
    assert!(service.store().get(TableName::Projects, &created.id).is_none());
    assert_eq!(service.queue().peek_length(), 2);

    assert!(matches!(
        run_update(&service, &context, "projects", created.id.as_str(), &args(&["id=x"])).await,
        Err(CliError::ReservedField(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn local_fallback_note_mentions_queueing() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.set_available(false);
    let service = service_with(remote);

    let served = service
        .facade()
        .create(TableName::Categories, Map::new())
        .await
        .unwrap();
    let note = local_fallback_note(&served).unwrap();
    assert!(note.starts_with("Saved locally and queued for sync"));
    assert!(note.contains("connection refused"));
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_report_lines_summarize_tables() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.seed(TableName::Events, [record(json!({"title": "Standup"}))]);
    let service = service_with(remote);

    let planwise_core::SyncOutcome::Completed(report) = service.manual_sync().await.unwrap()
    else {
        panic!("expected a completed pass");
    };
    let lines = format_sync_report_lines(&report);
    assert_eq!(
        lines[0],
        "Replayed 0 queued operation(s), 0 failed, 0 dead-lettered"
    );
    assert!(lines
        .iter()
        .any(|line| line.starts_with("events      1 record(s): 1 pulled")));
    assert!(lines.last().unwrap().starts_with("Sync completed in"));
}
