use planwise_core::{RecordId, SyncService};

use crate::commands::common::{
    format_record_lines, local_fallback_note, normalize_record_id, parse_fields, parse_filter,
    parse_table, print_json, served_to_item, short_id, CommandContext, ServedItem,
};
use crate::error::CliError;

pub async fn run_add(
    service: &SyncService,
    context: &CommandContext,
    table: &str,
    fields: &[String],
) -> Result<(), CliError> {
    let table = parse_table(table)?;
    let data = parse_fields(fields)?;
    let served = service.facade().create(table, data).await?;

    if context.json {
        return print_json(&served_to_item(&served));
    }
    if let Some(note) = local_fallback_note(&served) {
        eprintln!("{note}");
    }
    println!("{}", served.value().id);
    Ok(())
}

pub async fn run_list(
    service: &SyncService,
    context: &CommandContext,
    table: &str,
    filters: &[String],
    limit: usize,
) -> Result<(), CliError> {
    let table = parse_table(table)?;
    let filter = parse_filter(filters)?;
    let served = service.facade().read(table, filter.as_ref()).await?;

    let mut records = served.value().clone();
    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    records.truncate(limit);

    if context.json {
        let mut item = served_to_item(&served);
        item.data = records;
        return print_json(&item);
    }

    if let Some(note) = local_fallback_note(&served) {
        eprintln!("{note}");
    }
    if records.is_empty() {
        println!("No {table} found.");
        return Ok(());
    }
    for line in format_record_lines(&records) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_update(
    service: &SyncService,
    context: &CommandContext,
    table: &str,
    id: &str,
    fields: &[String],
) -> Result<(), CliError> {
    let table = parse_table(table)?;
    let id = RecordId::from(normalize_record_id(id)?);
    let updates = parse_fields(fields)?;
    if updates.contains_key("id") {
        return Err(CliError::ReservedField("id".into()));
    }

    let served = service.facade().update(table, &id, updates).await?;

    if context.json {
        return print_json(&served_to_item(&served));
    }
    if let Some(note) = local_fallback_note(&served) {
        eprintln!("{note}");
    }
    println!("Updated {table}/{}", short_id(id.as_str()));
    Ok(())
}

pub async fn run_delete(
    service: &SyncService,
    context: &CommandContext,
    table: &str,
    id: &str,
) -> Result<(), CliError> {
    let table = parse_table(table)?;
    let id = RecordId::from(normalize_record_id(id)?);
    let served = service.facade().delete(table, &id).await?;

    if context.json {
        let item = served_to_item(&served);
        return print_json(&ServedItem {
            source: item.source,
            cause: item.cause,
            queued_operation: item.queued_operation,
            data: id,
        });
    }
    if let Some(note) = local_fallback_note(&served) {
        eprintln!("{note}");
    }
    println!("Deleted {table}/{}", short_id(id.as_str()));
    Ok(())
}
