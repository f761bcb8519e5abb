//! Event log - structured, privacy-safe events in logs.duckdb
//!
//! Entries carry identifiers and outcomes only. Donor names, addresses,
//! amounts and gateway credentials never reach the log.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use chrono::Utc;
use duckdb::{Connection, Row};
use serde::{Deserialize, Serialize};

use crate::log_migrations::LOG_MIGRATIONS;

use super::migration::MigrationService;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Millisecond timestamp in the high bits, a wrapping sequence in the low 16
fn next_entry_id(timestamp_ms: i64) -> u64 {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    ((timestamp_ms.max(0) as u64) << 16) | seq
}

const ENTRY_COLUMNS: &str = "id, timestamp, entry_point, app_version, platform, \
     event, claim_id, gateway_mode, command, error_message, error_details";

/// Which front end wrote the entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPoint {
    Cli,
    /// Library callers embedding the core directly
    Service,
}

impl EntryPoint {
    fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::Cli => "cli",
            EntryPoint::Service => "service",
        }
    }
}

/// An event about to be written
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl LogEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn with_claim(mut self, claim_id: impl ToString) -> Self {
        self.claim_id = Some(claim_id.to_string());
        self
    }

    pub fn with_gateway_mode(mut self, mode: impl Into<String>) -> Self {
        self.gateway_mode = Some(mode.into());
        self
    }

    /// CLI subcommand that produced the event
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Error kind or outcome label, e.g. `timeout`
    pub fn with_error_details(mut self, details: impl Into<String>) -> Self {
        self.error_details = Some(details.into());
        self
    }
}

/// A stored entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    /// Unix milliseconds
    pub timestamp: i64,
    pub entry_point: String,
    pub app_version: String,
    pub platform: String,
    pub event: String,
    pub claim_id: Option<String>,
    pub gateway_mode: Option<String>,
    pub command: Option<String>,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
}

impl LogEntry {
    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            entry_point: row.get(2)?,
            app_version: row.get(3)?,
            platform: row.get(4)?,
            event: row.get(5)?,
            claim_id: row.get(6)?,
            gateway_mode: row.get(7)?,
            command: row.get(8)?,
            error_message: row.get(9)?,
            error_details: row.get(10)?,
        })
    }
}

/// Writes and reads the event log
///
/// Entry point, app version and platform are stamped on every entry from
/// the values given at construction.
pub struct LoggingService {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    entry_point: EntryPoint,
    app_version: String,
}

impl LoggingService {
    /// Open (or create) `logs.duckdb` in `giftaid_dir` and migrate it
    pub fn new(
        giftaid_dir: &Path,
        entry_point: EntryPoint,
        app_version: impl Into<String>,
    ) -> Result<Self> {
        let db_path = giftaid_dir.join("logs.duckdb");
        let conn = Connection::open(&db_path)?;
        MigrationService::with_migrations(&conn, LOG_MIGRATIONS).run_pending()?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            entry_point,
            app_version: app_version.into(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))
    }

    pub fn log(&self, event: LogEvent) -> Result<()> {
        let timestamp = Utc::now().timestamp_millis();
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO sys_logs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                ENTRY_COLUMNS
            ),
            duckdb::params![
                next_entry_id(timestamp),
                timestamp,
                self.entry_point.as_str(),
                &self.app_version,
                std::env::consts::OS,
                &event.event,
                &event.claim_id,
                &event.gateway_mode,
                &event.command,
                &event.error_message,
                &event.error_details,
            ],
        )?;
        Ok(())
    }

    pub fn log_event(&self, event: &str) -> Result<()> {
        self.log(LogEvent::new(event))
    }

    pub fn log_error(&self, event: &str, message: &str, details: Option<&str>) -> Result<()> {
        let mut entry = LogEvent::new(event).with_error(message);
        if let Some(d) = details {
            entry = entry.with_error_details(d);
        }
        self.log(entry)
    }

    fn query_entries(&self, errors_only: bool, limit: usize) -> Result<Vec<LogEntry>> {
        let filter = if errors_only {
            "WHERE error_message IS NOT NULL"
        } else {
            ""
        };
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_logs {} ORDER BY timestamp DESC, id DESC LIMIT ?",
            ENTRY_COLUMNS, filter
        ))?;
        let entries = stmt
            .query_map([limit as i64], LogEntry::from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Newest entries first
    pub fn get_recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        self.query_entries(false, limit)
    }

    /// Newest entries that recorded an error
    pub fn get_errors(&self, limit: usize) -> Result<Vec<LogEntry>> {
        self.query_entries(true, limit)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM sys_logs", [], |row| row.get(0))?)
    }

    pub fn error_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM sys_logs WHERE error_message IS NOT NULL",
            [],
            |row| row.get(0),
        )?)
    }

    /// Number of entries per event name, most frequent first
    pub fn event_counts(&self) -> Result<Vec<(String, u64)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT event, COUNT(*) AS n FROM sys_logs GROUP BY event ORDER BY n DESC, event",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(counts)
    }

    /// Delete entries older than `timestamp_ms` (unix ms)
    pub fn delete_before(&self, timestamp_ms: i64) -> Result<u64> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM sys_logs WHERE timestamp < ?", [timestamp_ms])?;
        Ok(deleted as u64)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn service(dir: &Path) -> LoggingService {
        LoggingService::new(dir, EntryPoint::Cli, "1.0.0").unwrap()
    }

    #[test]
    fn test_creates_log_database() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());
        assert!(service.db_path().exists());
        assert_eq!(service.count().unwrap(), 0);
    }

    #[test]
    fn test_entries_are_stamped() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());

        service.log_event("claim_created").unwrap();

        let entries = service.get_recent(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, "claim_created");
        assert_eq!(entries[0].entry_point, "cli");
        assert_eq!(entries[0].app_version, "1.0.0");
        assert_eq!(entries[0].platform, std::env::consts::OS);
    }

    #[test]
    fn test_claim_context_is_stored() {
        let dir = tempdir().unwrap();
        let service = LoggingService::new(dir.path(), EntryPoint::Service, "2.0.0").unwrap();
        let claim_id = uuid::Uuid::new_v4();

        service
            .log(
                LogEvent::new("claim_submitted")
                    .with_claim(claim_id)
                    .with_gateway_mode("test-gateway")
                    .with_command("claim submit"),
            )
            .unwrap();

        let entry = &service.get_recent(10).unwrap()[0];
        assert_eq!(entry.claim_id, Some(claim_id.to_string()));
        assert_eq!(entry.gateway_mode.as_deref(), Some("test-gateway"));
        assert_eq!(entry.command.as_deref(), Some("claim submit"));
        assert_eq!(entry.entry_point, "service");
    }

    #[test]
    fn test_error_entries_are_filtered() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());

        service
            .log_error("claim_submission_failed", "Gateway timed out", Some("timeout"))
            .unwrap();
        service.log_event("claim_created").unwrap();

        let errors = service.get_errors(10).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].event, "claim_submission_failed");
        assert_eq!(errors[0].error_message.as_deref(), Some("Gateway timed out"));
        assert_eq!(errors[0].error_details.as_deref(), Some("timeout"));
        assert_eq!(service.error_count().unwrap(), 1);
        assert_eq!(service.count().unwrap(), 2);
    }

    #[test]
    fn test_recent_is_newest_first_and_limited() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());

        for event in ["first", "second", "third"] {
            service.log_event(event).unwrap();
        }

        let entries = service.get_recent(2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, "third");
        assert_eq!(entries[1].event, "second");
    }

    #[test]
    fn test_event_counts() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());

        service.log_event("claim_polled").unwrap();
        service.log_event("claim_polled").unwrap();
        service.log_event("claim_created").unwrap();

        let counts = service.event_counts().unwrap();
        assert_eq!(counts[0], ("claim_polled".to_string(), 2));
        assert_eq!(counts[1], ("claim_created".to_string(), 1));
    }

    #[test]
    fn test_delete_before() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());

        service.log_event("claim_created").unwrap();
        service.log_event("claim_marked_ready").unwrap();

        assert_eq!(service.delete_before(0).unwrap(), 0);
        let deleted = service
            .delete_before(Utc::now().timestamp_millis() + 1000)
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(service.count().unwrap(), 0);
    }
}
