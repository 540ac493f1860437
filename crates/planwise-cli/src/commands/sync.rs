use planwise_core::models::{SyncStats, SyncStatus};
use planwise_core::sync::TableReport;
use planwise_core::{SyncOutcome, SyncReport, SyncService};
use serde::Serialize;

use crate::cli::Toggle;
use crate::commands::common::{
    format_sync_conflict_lines, format_sync_timestamp, print_json, sync_conflict_to_item,
    CommandContext, SyncConflictItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct StatusItem {
    #[serde(flatten)]
    status: SyncStatus,
    auto_sync: bool,
    stats: SyncStats,
}

pub fn run_status(service: &SyncService, context: &CommandContext) -> Result<(), CliError> {
    let status = service.sync_status();
    let stats = service.sync_stats();
    let auto_sync = service.is_auto_sync_enabled();

    if context.json {
        return print_json(&StatusItem {
            status,
            auto_sync,
            stats,
        });
    }

    println!(
        "Connectivity:   {}",
        if status.is_online { "online" } else { "offline" }
    );
    println!("Queued:         {}", status.queue_length);
    if status.dead_letter_count > 0 {
        println!("Dead letters:   {}", status.dead_letter_count);
    }
    println!(
        "Last sync:      {}",
        status
            .last_sync_timestamp
            .map_or_else(|| "never".to_string(), format_sync_timestamp)
    );
    println!(
        "Syncs:          {} total, {} ok, {} failed (last took {}ms)",
        stats.total_syncs,
        stats.successful_syncs,
        stats.failed_syncs,
        stats.last_sync_duration_ms
    );
    println!("Auto-sync:      {}", if auto_sync { "on" } else { "off" });
    Ok(())
}

pub async fn run_sync(service: &SyncService, context: &CommandContext) -> Result<(), CliError> {
    let outcome = match service.manual_sync().await {
        Ok(outcome) => outcome,
        Err(planwise_core::Error::Offline) if context.offline => return Err(CliError::Offline),
        Err(planwise_core::Error::Offline) => return Err(CliError::SyncNotConfigured),
        Err(error) => return Err(error.into()),
    };

    if context.json {
        return print_json(&outcome);
    }

    match outcome {
        SyncOutcome::AlreadyRunning => println!("A sync is already in progress"),
        SyncOutcome::Completed(report) => {
            for line in format_sync_report_lines(&report) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

pub fn format_sync_report_lines(report: &SyncReport) -> Vec<String> {
    let drain = &report.drain;
    let mut lines = vec![format!(
        "Replayed {} queued operation(s), {} failed, {} dead-lettered",
        drain.processed, drain.failed, drain.dead_lettered
    )];
    lines.extend(report.tables.iter().map(format_table_report));

    let unresolved = report.unresolved_conflicts();
    if unresolved > 0 {
        lines.push(format!(
            "{unresolved} conflict(s) left unresolved; local versions kept"
        ));
    }
    lines.push(if report.succeeded() {
        format!("Sync completed in {}ms", report.duration_ms)
    } else {
        format!("Sync finished with errors in {}ms", report.duration_ms)
    });
    lines
}

fn format_table_report(table: &TableReport) -> String {
    match &table.error {
        Some(error) => format!("{:<11} failed: {error}", table.table.as_str()),
        None => format!(
            "{:<11} {} record(s): {} pulled, {} kept local, {} resolved",
            table.table.as_str(),
            table.merged,
            table.pulled,
            table.kept_local,
            table.resolved
        ),
    }
}

pub fn run_conflicts(
    service: &SyncService,
    context: &CommandContext,
    limit: usize,
) -> Result<(), CliError> {
    let conflicts = service.conflict_log(limit)?;

    if context.json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        return print_json(&json_items);
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_auto_sync(service: &SyncService, state: Toggle) -> Result<(), CliError> {
    service.set_auto_sync(state.enabled())?;
    println!(
        "Auto-sync {}",
        if state.enabled() { "enabled" } else { "disabled" }
    );
    Ok(())
}
