use planwise_core::SyncService;

use crate::commands::common::{format_operation_lines, print_json, CommandContext};
use crate::error::CliError;

pub fn run_queue_list(service: &SyncService, context: &CommandContext) -> Result<(), CliError> {
    let pending = service.queue().pending();

    if context.json {
        return print_json(&pending);
    }
    if pending.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }
    for line in format_operation_lines(&pending) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_queue_clear(service: &SyncService) -> Result<(), CliError> {
    let dropped = service.queue().peek_length();
    service.queue().clear()?;
    println!("Dropped {dropped} queued operation(s)");
    Ok(())
}

pub fn run_dead_letters_list(
    service: &SyncService,
    context: &CommandContext,
) -> Result<(), CliError> {
    let dead_letters = service.queue().dead_letters();

    if context.json {
        return print_json(&dead_letters);
    }
    if dead_letters.is_empty() {
        println!("No dead letters.");
        return Ok(());
    }
    for line in format_operation_lines(&dead_letters) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_dead_letters_requeue(service: &SyncService) -> Result<(), CliError> {
    let requeued = service.queue().requeue_dead_letters()?;
    println!("Requeued {requeued} operation(s)");
    Ok(())
}

pub fn run_dead_letters_clear(service: &SyncService) -> Result<(), CliError> {
    let dropped = service.queue().dead_letters().len();
    service.queue().clear_dead_letters()?;
    println!("Dropped {dropped} dead letter(s)");
    Ok(())
}
