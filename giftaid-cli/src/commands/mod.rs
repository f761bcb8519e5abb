//! CLI command implementations

pub mod charity;
pub mod claim;
pub mod donation;
pub mod gateway;
pub mod logs;

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use uuid::Uuid;

use giftaid_core::domain::result::Result as CoreResult;
use giftaid_core::services::{EntryPoint, LogEvent, LoggingService};
use giftaid_core::{GiftAidContext, OperationResult};

static LOGGER: OnceLock<Option<Arc<LoggingService>>> = OnceLock::new();

/// Get the logging service for CLI operations
///
/// Opened once per process: the context, `emit` and the logs command all
/// write through the same DuckDB instance. Returns None if logging fails
/// to initialize (shouldn't block operations)
pub fn get_logger() -> Option<Arc<LoggingService>> {
    LOGGER
        .get_or_init(|| {
            let giftaid_dir = get_giftaid_dir();
            std::fs::create_dir_all(&giftaid_dir).ok()?;
            LoggingService::new(&giftaid_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION"))
                .ok()
                .map(Arc::new)
        })
        .clone()
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: Option<&LoggingService>, event: LogEvent) {
    if let Some(l) = logger {
        let _ = l.log(event);
    }
}

/// Get the giftaid directory from `GIFTAID_DIR` or default to `~/.giftaid`
pub fn get_giftaid_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("GIFTAID_DIR") {
        PathBuf::from(dir)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".giftaid")
    }
}

/// Open the context; lifecycle events go to the CLI event log
pub fn get_context() -> Result<GiftAidContext> {
    let giftaid_dir = get_giftaid_dir();
    GiftAidContext::open(&giftaid_dir, None, get_logger())
        .context("Failed to initialize giftaid context")
}

pub fn parse_id(kind: &str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| anyhow!("Invalid {} ID: {}", kind, raw))
}

/// Print a core result as JSON or through `render`
///
/// In JSON mode failures are printed as an `OperationResult` too; the
/// command still exits non-zero.
pub fn emit<T: Serialize>(
    json: bool,
    command: &str,
    result: CoreResult<T>,
    render: impl FnOnce(&T),
) -> Result<()> {
    let event = match &result {
        Ok(_) => LogEvent::new("command_executed").with_command(command),
        Err(e) => LogEvent::new("command_failed")
            .with_command(command)
            .with_error(e.to_string()),
    };
    log_event(get_logger().as_deref(), event);

    if json {
        let output: OperationResult<T> = result.into();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return match output.error {
            Some(error) => Err(anyhow!(error)),
            None => Ok(()),
        };
    }

    let value = result?;
    render(&value);
    Ok(())
}
