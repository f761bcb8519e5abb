//! Logs command - view and manage the event log

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{Duration, TimeZone, Utc};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;
use giftaid_core::services::LoggingService;

use super::{get_giftaid_dir, get_logger};
use crate::output;

#[derive(Subcommand)]
pub enum LogsCommands {
    /// Show recent log entries
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Show only errors
        #[arg(long)]
        errors: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear old log entries
    Clear {
        /// Delete logs older than N days
        #[arg(long, default_value = "30")]
        older_than_days: u64,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show per-event counts and the database path
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn open_log() -> Result<Arc<LoggingService>> {
    get_logger().ok_or_else(|| {
        anyhow!(
            "Failed to open the event log in {}",
            get_giftaid_dir().display()
        )
    })
}

fn format_timestamp(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

pub fn run(command: LogsCommands) -> Result<()> {
    let log = open_log()?;
    match command {
        LogsCommands::List { limit, errors, json } => list(&log, limit, errors, json),
        LogsCommands::Clear {
            older_than_days,
            force,
            json,
        } => clear(&log, older_than_days, force, json),
        LogsCommands::Stats { json } => stats(&log, json),
    }
}

fn list(log: &LoggingService, limit: usize, errors_only: bool, json: bool) -> Result<()> {
    let entries = if errors_only {
        log.get_errors(limit)?
    } else {
        log.get_recent(limit)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        output::info("No log entries found.");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Time", "Event", "Claim", "Command", "Mode", "Error"]);
    for entry in entries {
        let error = entry.error_message.unwrap_or_default();
        table.add_row(vec![
            format_timestamp(entry.timestamp),
            entry.event,
            entry.claim_id.unwrap_or_default(),
            entry.command.unwrap_or_default(),
            entry.gateway_mode.unwrap_or_default(),
            error.as_str().red().to_string(),
        ]);
    }
    println!("{}", table);
    Ok(())
}

fn clear(log: &LoggingService, older_than_days: u64, force: bool, json: bool) -> Result<()> {
    let cutoff = Utc::now() - Duration::days(older_than_days as i64);

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete log entries older than {} days?", older_than_days))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let deleted = log.delete_before(cutoff.timestamp_millis())?;
    if json {
        println!("{}", serde_json::json!({ "deleted": deleted }));
    } else {
        output::success(&format!("Deleted {} log entries", deleted));
    }
    Ok(())
}

fn stats(log: &LoggingService, json: bool) -> Result<()> {
    let total = log.count()?;
    let errors = log.error_count()?;
    let by_event = log.event_counts()?;
    let size_bytes = std::fs::metadata(log.db_path()).map(|m| m.len()).unwrap_or(0);

    if json {
        let events: serde_json::Map<String, serde_json::Value> = by_event
            .into_iter()
            .map(|(event, count)| (event, serde_json::json!(count)))
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "total_entries": total,
                "error_count": errors,
                "events": events,
                "database_path": log.db_path().to_string_lossy(),
                "database_size_bytes": size_bytes
            })
        );
        return Ok(());
    }

    println!("{}", "Event log".bold());
    println!("  Entries: {} ({} with errors)", total, errors);
    println!("  Database: {} ({})", log.db_path().display(), output::format_size(size_bytes));

    if !by_event.is_empty() {
        let mut table = output::create_table();
        table.set_header(vec!["Event", "Count"]);
        for (event, count) in by_event {
            table.add_row(vec![event, count.to_string()]);
        }
        println!("{}", table);
    }
    Ok(())
}
